use rusqlite::Connection;

/// Initialize the database schema.
///
/// Status monotonicity and write-once payment links are enforced here with
/// triggers, so no writer can bypass them, not only the conditional updates in
/// `queries`.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA foreign_keys = ON;

        -- Chat identities (id is the chat platform user id)
        CREATE TABLE IF NOT EXISTS buyers (
            id INTEGER PRIMARY KEY,
            display_name TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        -- Digital goods on sale
        CREATE TABLE IF NOT EXISTS products (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            description TEXT NOT NULL,
            price_cents INTEGER NOT NULL CHECK (price_cents > 0),
            content TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );

        -- Purchase attempts; id is the gateway external reference
        CREATE TABLE IF NOT EXISTS orders (
            id TEXT PRIMARY KEY,
            buyer_id INTEGER NOT NULL REFERENCES buyers(id),
            product_id TEXT NOT NULL REFERENCES products(id),
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'paid', 'expired', 'failed')),
            gateway_payment_id TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_orders_gateway_payment
            ON orders(gateway_payment_id) WHERE gateway_payment_id IS NOT NULL;
        CREATE INDEX IF NOT EXISTS idx_orders_pending_created
            ON orders(created_at) WHERE status = 'pending';
        CREATE INDEX IF NOT EXISTS idx_orders_buyer ON orders(buyer_id);

        CREATE TRIGGER IF NOT EXISTS trg_orders_status_terminal
        BEFORE UPDATE OF status ON orders
        WHEN OLD.status <> 'pending' AND NEW.status <> OLD.status
        BEGIN
            SELECT RAISE(ABORT, 'order status is terminal');
        END;

        CREATE TRIGGER IF NOT EXISTS trg_orders_gateway_payment_write_once
        BEFORE UPDATE OF gateway_payment_id ON orders
        WHEN OLD.gateway_payment_id IS NOT NULL
            AND (NEW.gateway_payment_id IS NULL OR NEW.gateway_payment_id <> OLD.gateway_payment_id)
        BEGIN
            SELECT RAISE(ABORT, 'gateway_payment_id is write-once');
        END;
        "#,
    )
}
