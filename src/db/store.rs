//! Async facade over the SQLite queries.
//!
//! Every operation checks a connection out of the pool on a blocking thread and is
//! bounded by `op_timeout`. The budget is enforced inside the blocking work as well:
//! pool checkout, SQLite's busy handler and the commit of a status transition all
//! stop at the same deadline, so an operation reported as timed out never commits
//! afterwards.

use std::time::{Duration, Instant};

use rusqlite::Connection;

use crate::error::{StoreError, StoreResult};
use crate::models::{
    Buyer, CreateOrder, CreateProduct, Order, OrderStatus, Product, TransitionResult,
};

use super::{DbPool, queries};

/// Extra wait for the blocking task after its deadline. The task checks the
/// deadline itself; this only covers a commit already in flight.
const DEADLINE_GRACE: Duration = Duration::from_millis(500);

/// Time budget of one storage operation.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    op: &'static str,
    budget: Duration,
    at: Instant,
}

impl Deadline {
    pub fn new(op: &'static str, budget: Duration) -> Self {
        Self {
            op,
            budget,
            at: Instant::now() + budget,
        }
    }

    /// Time left, or `StoreError::Timeout` once the deadline has passed.
    pub fn remaining(&self) -> StoreResult<Duration> {
        let left = self.at.saturating_duration_since(Instant::now());
        if left.is_zero() {
            return Err(self.expired());
        }
        Ok(left)
    }

    pub fn check(&self) -> StoreResult<()> {
        self.remaining().map(|_| ())
    }

    pub fn expired(&self) -> StoreError {
        StoreError::Timeout {
            op: self.op,
            after: self.budget,
        }
    }
}

#[derive(Clone)]
pub struct Store {
    pool: DbPool,
    op_timeout: Duration,
}

impl Store {
    pub fn new(pool: DbPool, op_timeout: Duration) -> Self {
        Self { pool, op_timeout }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn run<T, F>(&self, op: &'static str, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
    {
        self.run_within(op, move |conn, _| f(conn)).await
    }

    /// Like `run`, but hands the deadline to the query so it can refuse to commit late.
    async fn run_within<T, F>(&self, op: &'static str, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection, &Deadline) -> StoreResult<T> + Send + 'static,
    {
        let deadline = Deadline::new(op, self.op_timeout);
        let pool = self.pool.clone();
        let task = tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get_timeout(deadline.remaining()?)
                .map_err(|e| match deadline.check() {
                    Ok(()) => StoreError::Pool(e),
                    Err(expired) => expired,
                })?;
            conn.busy_timeout(deadline.remaining()?)?;
            f(&mut conn, &deadline)
        });

        let result = match tokio::time::timeout(self.op_timeout + DEADLINE_GRACE, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(StoreError::Task(e.to_string())),
            Err(_) => Err(deadline.expired()),
        };

        if let Err(StoreError::Timeout { .. }) = &result {
            tracing::error!("Storage operation {} timed out after {:?}", op, self.op_timeout);
        }
        result
    }

    // ============ Orders ============

    pub async fn create_order(&self, input: CreateOrder) -> StoreResult<Order> {
        self.run("create_order", move |conn| queries::create_order(conn, &input))
            .await
    }

    pub async fn find_order(&self, order_id: &str) -> StoreResult<Option<Order>> {
        let order_id = order_id.to_string();
        self.run("find_order", move |conn| queries::get_order_by_id(conn, &order_id))
            .await
    }

    pub async fn find_order_by_gateway_payment_id(
        &self,
        gateway_payment_id: &str,
    ) -> StoreResult<Option<Order>> {
        let gateway_payment_id = gateway_payment_id.to_string();
        self.run("find_order_by_gateway_payment_id", move |conn| {
            queries::get_order_by_gateway_payment_id(conn, &gateway_payment_id)
        })
        .await
    }

    pub async fn attach_gateway_payment_id(
        &self,
        order_id: &str,
        gateway_payment_id: &str,
    ) -> StoreResult<bool> {
        let order_id = order_id.to_string();
        let gateway_payment_id = gateway_payment_id.to_string();
        self.run("attach_gateway_payment_id", move |conn| {
            queries::attach_gateway_payment_id(conn, &order_id, &gateway_payment_id)
        })
        .await
    }

    pub async fn transition_if_pending(
        &self,
        order_id: &str,
        new_status: OrderStatus,
    ) -> StoreResult<TransitionResult> {
        let order_id = order_id.to_string();
        self.run_within("transition_if_pending", move |conn, deadline| {
            queries::transition_order_if_pending_within(conn, &order_id, new_status, deadline)
        })
        .await
    }

    pub async fn expire_stale_orders(&self, cutoff: i64) -> StoreResult<usize> {
        self.run("expire_stale_orders", move |conn| {
            queries::expire_stale_orders(conn, cutoff)
        })
        .await
    }

    // ============ Catalog (read-only for the payment flow) ============

    pub async fn find_product(&self, product_id: &str) -> StoreResult<Option<Product>> {
        let product_id = product_id.to_string();
        self.run("find_product", move |conn| {
            queries::get_product_by_id(conn, &product_id)
        })
        .await
    }

    pub async fn create_product(&self, input: CreateProduct) -> StoreResult<Product> {
        self.run("create_product", move |conn| queries::create_product(conn, &input))
            .await
    }

    pub async fn list_products(&self) -> StoreResult<Vec<Product>> {
        self.run("list_products", |conn| queries::list_products(conn))
            .await
    }

    pub async fn count_products(&self) -> StoreResult<i64> {
        self.run("count_products", |conn| queries::count_products(conn))
            .await
    }

    // ============ Buyer directory ============

    pub async fn find_buyer(&self, buyer_id: i64) -> StoreResult<Option<Buyer>> {
        self.run("find_buyer", move |conn| queries::get_buyer(conn, buyer_id))
            .await
    }

    pub async fn register_buyer(&self, buyer_id: i64, display_name: &str) -> StoreResult<Buyer> {
        let display_name = display_name.to_string();
        self.run("register_buyer", move |conn| {
            queries::upsert_buyer(conn, buyer_id, &display_name)
        })
        .await
    }
}
