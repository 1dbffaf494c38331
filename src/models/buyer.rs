use serde::{Deserialize, Serialize};

/// A chat identity that can place orders. The id is the chat platform's user id,
/// which doubles as the chat id for direct messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Buyer {
    pub id: i64,
    pub display_name: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Buyer {
    /// Synthetic payer email handed to the gateway, which requires one.
    pub fn payer_email(&self, domain: &str) -> String {
        format!("user_{}@{}", self.id, domain)
    }
}
