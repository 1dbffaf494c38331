use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};

use crate::error::{StoreError, StoreResult};
use crate::id::EntityType;
use crate::models::*;

use super::Deadline;
use super::from_row::{BUYER_COLS, ORDER_COLS, PRODUCT_COLS, query_all, query_one};

fn now() -> i64 {
    Utc::now().timestamp()
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

/// Map a write error, turning a collision on the gateway payment index into a typed error.
fn map_payment_link_error(e: rusqlite::Error, gateway_payment_id: &str) -> StoreError {
    if is_unique_violation(&e) {
        StoreError::DuplicateGatewayPaymentId(gateway_payment_id.to_string())
    } else {
        StoreError::Database(e)
    }
}

// ============ Buyers ============

/// Register a chat identity, refreshing the display name if it is already known.
pub fn upsert_buyer(conn: &Connection, id: i64, display_name: &str) -> StoreResult<Buyer> {
    let now = now();
    conn.execute(
        "INSERT INTO buyers (id, display_name, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)
         ON CONFLICT(id) DO UPDATE SET display_name = excluded.display_name, updated_at = excluded.updated_at",
        params![id, display_name, now],
    )?;
    get_buyer(conn, id)?.ok_or(StoreError::Database(rusqlite::Error::QueryReturnedNoRows))
}

pub fn get_buyer(conn: &Connection, id: i64) -> StoreResult<Option<Buyer>> {
    query_one(
        conn,
        &format!("SELECT {} FROM buyers WHERE id = ?1", BUYER_COLS),
        &[&id],
    )
}

// ============ Products ============

pub fn create_product(conn: &Connection, input: &CreateProduct) -> StoreResult<Product> {
    let product = Product {
        id: EntityType::Product.gen_id(),
        name: input.name.clone(),
        description: input.description.clone(),
        price_cents: input.price_cents,
        content: input.content.clone(),
        created_at: now(),
    };
    conn.execute(
        &format!("INSERT INTO products ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)", PRODUCT_COLS),
        params![
            &product.id,
            &product.name,
            &product.description,
            product.price_cents,
            &product.content,
            product.created_at
        ],
    )?;
    Ok(product)
}

pub fn get_product_by_id(conn: &Connection, id: &str) -> StoreResult<Option<Product>> {
    query_one(
        conn,
        &format!("SELECT {} FROM products WHERE id = ?1", PRODUCT_COLS),
        &[&id],
    )
}

/// Catalog in display order: cheapest first, then by name.
pub fn list_products(conn: &Connection) -> StoreResult<Vec<Product>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM products ORDER BY price_cents, name",
            PRODUCT_COLS
        ),
        &[],
    )
}

pub fn count_products(conn: &Connection) -> StoreResult<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM products", [], |row| row.get(0))?)
}

// ============ Orders ============

pub fn create_order(conn: &Connection, input: &CreateOrder) -> StoreResult<Order> {
    let now = now();
    let order = Order {
        id: EntityType::Order.gen_id(),
        buyer_id: input.buyer_id,
        product_id: input.product_id.clone(),
        status: OrderStatus::Pending,
        gateway_payment_id: input.gateway_payment_id.clone(),
        created_at: now,
        updated_at: now,
    };
    conn.execute(
        &format!("INSERT INTO orders ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)", ORDER_COLS),
        params![
            &order.id,
            order.buyer_id,
            &order.product_id,
            order.status.as_ref(),
            &order.gateway_payment_id,
            order.created_at,
            order.updated_at
        ],
    )
    .map_err(|e| match &order.gateway_payment_id {
        Some(gw) => map_payment_link_error(e, gw),
        None => StoreError::Database(e),
    })?;
    Ok(order)
}

pub fn get_order_by_id(conn: &Connection, id: &str) -> StoreResult<Option<Order>> {
    query_one(
        conn,
        &format!("SELECT {} FROM orders WHERE id = ?1", ORDER_COLS),
        &[&id],
    )
}

pub fn get_order_by_gateway_payment_id(
    conn: &Connection,
    gateway_payment_id: &str,
) -> StoreResult<Option<Order>> {
    query_one(
        conn,
        &format!("SELECT {} FROM orders WHERE gateway_payment_id = ?1", ORDER_COLS),
        &[&gateway_payment_id],
    )
}

/// Link a gateway payment to an order. Write-once: returns false (and writes nothing)
/// when the order is unknown or already carries a payment id.
pub fn attach_gateway_payment_id(
    conn: &Connection,
    order_id: &str,
    gateway_payment_id: &str,
) -> StoreResult<bool> {
    let affected = conn
        .execute(
            "UPDATE orders SET gateway_payment_id = ?1, updated_at = ?2
             WHERE id = ?3 AND gateway_payment_id IS NULL",
            params![gateway_payment_id, now(), order_id],
        )
        .map_err(|e| map_payment_link_error(e, gateway_payment_id))?;
    Ok(affected > 0)
}

/// Atomically move an order out of `Pending`.
///
/// The conditional UPDATE is the only write. When it matches nothing the
/// transaction is dropped (rolled back) and the current status is reported.
/// IMMEDIATE takes the write lock up front so two racing callers serialize
/// instead of failing a lock upgrade.
pub fn transition_order_if_pending(
    conn: &mut Connection,
    order_id: &str,
    new_status: OrderStatus,
) -> StoreResult<TransitionResult> {
    transition(conn, order_id, new_status, None)
}

/// Same as `transition_order_if_pending`, but rolls back instead of committing once
/// `deadline` has passed. A caller that was told the operation timed out must never
/// find the order changed behind its back.
pub fn transition_order_if_pending_within(
    conn: &mut Connection,
    order_id: &str,
    new_status: OrderStatus,
    deadline: &Deadline,
) -> StoreResult<TransitionResult> {
    transition(conn, order_id, new_status, Some(deadline))
}

fn transition(
    conn: &mut Connection,
    order_id: &str,
    new_status: OrderStatus,
    deadline: Option<&Deadline>,
) -> StoreResult<TransitionResult> {
    if !OrderStatus::Pending.can_transition_to(new_status) {
        return Err(StoreError::InvalidTransition {
            from: OrderStatus::Pending,
            to: new_status,
        });
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let affected = tx.execute(
        "UPDATE orders SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = 'pending'",
        params![new_status.as_ref(), now(), order_id],
    )?;

    if affected > 0 {
        if let Some(deadline) = deadline {
            // Dropping the transaction rolls it back
            deadline.check()?;
        }
        tx.commit()?;
        return Ok(TransitionResult::Transitioned);
    }

    let current: Option<String> = tx
        .query_row(
            "SELECT status FROM orders WHERE id = ?1",
            params![order_id],
            |row| row.get(0),
        )
        .optional()?;

    match current {
        Some(status) => {
            let status = status.parse::<OrderStatus>().map_err(|_| {
                StoreError::Database(rusqlite::Error::InvalidColumnType(
                    0,
                    "status".to_string(),
                    rusqlite::types::Type::Text,
                ))
            })?;
            Ok(TransitionResult::AlreadyTerminal(status))
        }
        None => Ok(TransitionResult::NotFound),
    }
}

/// Expire every `Pending` order created before `cutoff`. Each row is matched by the
/// same `status = 'pending'` condition as `transition_order_if_pending`, so a sweep
/// racing an approved payment cannot overwrite `Paid`.
pub fn expire_stale_orders(conn: &Connection, cutoff: i64) -> StoreResult<usize> {
    let expired = conn.execute(
        "UPDATE orders SET status = 'expired', updated_at = ?1
         WHERE status = 'pending' AND created_at < ?2",
        params![now(), cutoff],
    )?;
    Ok(expired)
}
