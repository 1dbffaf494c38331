//! Order storage invariants: payment link uniqueness, write-once links and
//! monotonic status

#[path = "../common/mod.rs"]
mod common;

use common::*;
use rusqlite::params;

fn setup_order() -> (rusqlite::Connection, Order) {
    let conn = setup_test_db();
    let buyer = insert_test_buyer(&conn, 42);
    let product = insert_test_product(&conn, "Ebook");
    let order = insert_test_order(&conn, buyer.id, &product.id, None).unwrap();
    (conn, order)
}

// ============ Creation ============

#[test]
fn test_create_order_defaults() {
    let (conn, order) = setup_order();

    assert!(order.id.starts_with("pd_ord_"));
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.gateway_payment_id, None);

    let stored = queries::get_order_by_id(&conn, &order.id).unwrap().unwrap();
    assert_eq!(stored, order);
}

#[test]
fn test_create_order_requires_known_buyer_and_product() {
    let conn = setup_test_db();
    let product = insert_test_product(&conn, "Ebook");
    insert_test_buyer(&conn, 1);

    let unknown_buyer = insert_test_order(&conn, 999, &product.id, None);
    assert!(matches!(unknown_buyer, Err(StoreError::Database(_))));

    let unknown_product = insert_test_order(&conn, 1, "pd_prod_missing", None);
    assert!(matches!(unknown_product, Err(StoreError::Database(_))));
}

#[test]
fn test_status_column_rejects_unknown_values() {
    let (conn, order) = setup_order();
    let result = conn.execute(
        "UPDATE orders SET status = 'refunded' WHERE id = ?1",
        params![order.id],
    );
    assert!(result.is_err(), "CHECK constraint should reject unknown status");
}

// ============ Gateway payment link ============

#[test]
fn test_duplicate_gateway_payment_id_on_create() {
    let conn = setup_test_db();
    insert_test_buyer(&conn, 1);
    let product = insert_test_product(&conn, "Ebook");

    insert_test_order(&conn, 1, &product.id, Some("555")).unwrap();
    let second = insert_test_order(&conn, 1, &product.id, Some("555"));

    match second {
        Err(StoreError::DuplicateGatewayPaymentId(id)) => assert_eq!(id, "555"),
        other => panic!("expected DuplicateGatewayPaymentId, got {:?}", other),
    }
}

#[test]
fn test_orders_without_payment_id_do_not_collide() {
    let conn = setup_test_db();
    insert_test_buyer(&conn, 1);
    let product = insert_test_product(&conn, "Ebook");

    insert_test_order(&conn, 1, &product.id, None).unwrap();
    insert_test_order(&conn, 1, &product.id, None).unwrap();
}

#[test]
fn test_attach_gateway_payment_id_is_write_once() {
    let (conn, order) = setup_order();

    assert!(queries::attach_gateway_payment_id(&conn, &order.id, "111").unwrap());
    assert!(!queries::attach_gateway_payment_id(&conn, &order.id, "222").unwrap());

    let stored = queries::get_order_by_id(&conn, &order.id).unwrap().unwrap();
    assert_eq!(stored.gateway_payment_id.as_deref(), Some("111"));
    assert_eq!(
        queries::get_order_by_gateway_payment_id(&conn, "111")
            .unwrap()
            .map(|o| o.id),
        Some(order.id)
    );
}

#[test]
fn test_attach_used_payment_id_to_another_order_fails() {
    let (conn, first) = setup_order();
    let second = insert_test_order(&conn, first.buyer_id, &first.product_id, None).unwrap();

    assert!(queries::attach_gateway_payment_id(&conn, &first.id, "777").unwrap());
    let result = queries::attach_gateway_payment_id(&conn, &second.id, "777");
    assert!(matches!(result, Err(StoreError::DuplicateGatewayPaymentId(_))));

    let second = queries::get_order_by_id(&conn, &second.id).unwrap().unwrap();
    assert_eq!(second.gateway_payment_id, None);
}

#[test]
fn test_trigger_blocks_rewriting_payment_id() {
    let (conn, order) = setup_order();
    queries::attach_gateway_payment_id(&conn, &order.id, "111").unwrap();

    let rewrite = conn.execute(
        "UPDATE orders SET gateway_payment_id = '999' WHERE id = ?1",
        params![order.id],
    );
    assert!(rewrite.is_err());

    let clear = conn.execute(
        "UPDATE orders SET gateway_payment_id = NULL WHERE id = ?1",
        params![order.id],
    );
    assert!(clear.is_err());
}

// ============ Status transitions ============

#[test]
fn test_transition_pending_to_paid_once() {
    let (mut conn, order) = setup_order();

    let first = queries::transition_order_if_pending(&mut conn, &order.id, OrderStatus::Paid);
    assert_eq!(first.unwrap(), TransitionResult::Transitioned);

    let second = queries::transition_order_if_pending(&mut conn, &order.id, OrderStatus::Paid);
    assert_eq!(
        second.unwrap(),
        TransitionResult::AlreadyTerminal(OrderStatus::Paid)
    );
}

#[test]
fn test_terminal_status_never_changes() {
    for terminal in [OrderStatus::Paid, OrderStatus::Expired, OrderStatus::Failed] {
        let (mut conn, order) = setup_order();
        queries::transition_order_if_pending(&mut conn, &order.id, terminal).unwrap();

        for next in [OrderStatus::Paid, OrderStatus::Expired, OrderStatus::Failed] {
            let result =
                queries::transition_order_if_pending(&mut conn, &order.id, next).unwrap();
            assert_eq!(result, TransitionResult::AlreadyTerminal(terminal));
        }

        let stored = queries::get_order_by_id(&conn, &order.id).unwrap().unwrap();
        assert_eq!(stored.status, terminal);
    }
}

#[test]
fn test_transition_to_pending_is_invalid() {
    let (mut conn, order) = setup_order();
    let result = queries::transition_order_if_pending(&mut conn, &order.id, OrderStatus::Pending);
    assert!(matches!(
        result,
        Err(StoreError::InvalidTransition {
            from: OrderStatus::Pending,
            to: OrderStatus::Pending
        })
    ));
}

#[test]
fn test_transition_unknown_order() {
    let mut conn = setup_test_db();
    let result = queries::transition_order_if_pending(
        &mut conn,
        "pd_ord_00000000000000000000000000000000",
        OrderStatus::Paid,
    );
    assert_eq!(result.unwrap(), TransitionResult::NotFound);
}

#[test]
fn test_trigger_blocks_raw_status_regression() {
    let (mut conn, order) = setup_order();
    queries::transition_order_if_pending(&mut conn, &order.id, OrderStatus::Paid).unwrap();

    let result = conn.execute(
        "UPDATE orders SET status = 'pending' WHERE id = ?1",
        params![order.id],
    );
    assert!(result.is_err(), "paid order must not return to pending");

    let stored = queries::get_order_by_id(&conn, &order.id).unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Paid);
}

// ============ Expiry ============

#[test]
fn test_expire_stale_orders_only_touches_old_pending() {
    let (mut conn, stale) = setup_order();
    let fresh = insert_test_order(&conn, stale.buyer_id, &stale.product_id, None).unwrap();
    let paid = insert_test_order(&conn, stale.buyer_id, &stale.product_id, None).unwrap();
    queries::transition_order_if_pending(&mut conn, &paid.id, OrderStatus::Paid).unwrap();

    let old = chrono::Utc::now().timestamp() - 2 * 3600;
    conn.execute(
        "UPDATE orders SET created_at = ?1 WHERE id IN (?2, ?3)",
        params![old, stale.id, paid.id],
    )
    .unwrap();

    let cutoff = chrono::Utc::now().timestamp() - 3600;
    assert_eq!(queries::expire_stale_orders(&conn, cutoff).unwrap(), 1);

    let status = |id: &str| queries::get_order_by_id(&conn, id).unwrap().unwrap().status;
    assert_eq!(status(&stale.id), OrderStatus::Expired);
    assert_eq!(status(&fresh.id), OrderStatus::Pending);
    assert_eq!(status(&paid.id), OrderStatus::Paid);

    // Nothing left to expire
    assert_eq!(queries::expire_stale_orders(&conn, cutoff).unwrap(), 0);
}

#[test]
fn test_expired_order_cannot_be_paid() {
    let (mut conn, order) = setup_order();
    let cutoff = chrono::Utc::now().timestamp() + 1;
    assert_eq!(queries::expire_stale_orders(&conn, cutoff).unwrap(), 1);

    let result = queries::transition_order_if_pending(&mut conn, &order.id, OrderStatus::Paid);
    assert_eq!(
        result.unwrap(),
        TransitionResult::AlreadyTerminal(OrderStatus::Expired)
    );
}

#[test]
fn test_transition_past_deadline_rolls_back() {
    let (mut conn, order) = setup_order();
    let deadline = Deadline::new("transition_if_pending", std::time::Duration::ZERO);

    let result = queries::transition_order_if_pending_within(
        &mut conn,
        &order.id,
        OrderStatus::Paid,
        &deadline,
    );
    assert!(matches!(
        result,
        Err(StoreError::Timeout { op: "transition_if_pending", .. })
    ));

    let stored = queries::get_order_by_id(&conn, &order.id).unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Pending);

    // The connection is usable again once the transaction is gone
    let result = queries::transition_order_if_pending(&mut conn, &order.id, OrderStatus::Paid);
    assert_eq!(result.unwrap(), TransitionResult::Transitioned);
}
