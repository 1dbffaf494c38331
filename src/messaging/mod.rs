mod telegram;

pub use telegram::*;

use async_trait::async_trait;

use crate::error::MessagingError;

/// Outbound messages to a buyer's chat.
#[async_trait]
pub trait ChatMessenger: Send + Sync {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), MessagingError>;

    async fn send_image(
        &self,
        chat_id: i64,
        image: Vec<u8>,
        caption: &str,
    ) -> Result<(), MessagingError>;
}
