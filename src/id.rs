//! Prefixed ID generation for pixdrop entities.
//!
//! Format: `pd_{entity}_{uuid_simple}` (32 hex chars, no hyphens). Order IDs travel
//! to the gateway as the payment's external reference, so anything coming back
//! from the gateway is checked against this format before touching the database.

use uuid::Uuid;

/// Parse a gateway external reference back into an order ID.
pub fn parse_order_id(reference: &str) -> Option<&str> {
    let reference = reference.trim();
    let suffix = reference.strip_prefix("pd_ord_")?;
    is_hex_suffix(suffix).then_some(reference)
}

fn is_hex_suffix(s: &str) -> bool {
    s.len() == 32 && s.chars().all(|c| c.is_ascii_hexdigit())
}

#[derive(Debug, Clone, Copy)]
pub enum EntityType {
    Order,
    Product,
}

impl EntityType {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Order => "pd_ord",
            Self::Product => "pd_prod",
        }
    }

    pub fn gen_id(&self) -> String {
        format!("{}_{}", self.prefix(), Uuid::new_v4().as_simple())
    }
}
