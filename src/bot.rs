//! Buyer-facing chat front-end.
//!
//! Long-polls the Bot API and routes two actions: `/start` registers the buyer and
//! lists the catalog, and a buy action (`buy_<product_id>` button or
//! `/buy <product_id>`) runs checkout. Everything else is ignored.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::checkout::CheckoutService;
use crate::db::Store;
use crate::error::{MessagingError, StoreResult};
use crate::messaging::{ChatMessenger, TelegramMessenger, Update};
use crate::models::Product;

pub const BUY_CALLBACK_PREFIX: &str = "buy_";
pub const EMPTY_CATALOG_TEXT: &str = "Sorry, there are no products available right now.";

/// How long one `getUpdates` request waits for new updates.
pub const POLL_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    Start {
        buyer_id: i64,
        first_name: String,
        display_name: String,
    },
    Buy {
        buyer_id: i64,
        product_id: String,
    },
}

/// Command name without a `@botname` suffix, e.g. `/start@shop_bot` -> `/start`.
fn command_name(token: &str) -> &str {
    token.split('@').next().unwrap_or(token)
}

impl BotCommand {
    pub fn from_update(update: &Update) -> Option<Self> {
        if let Some(callback) = &update.callback_query {
            let product_id = callback
                .data
                .as_deref()?
                .strip_prefix(BUY_CALLBACK_PREFIX)?
                .trim();
            if product_id.is_empty() {
                return None;
            }
            return Some(BotCommand::Buy {
                buyer_id: callback.from.id,
                product_id: product_id.to_string(),
            });
        }

        let message = update.message.as_ref()?;
        let from = message.from.as_ref()?;
        let mut words = message.text.as_deref()?.split_whitespace();

        match command_name(words.next()?) {
            "/start" => {
                let full_name = from.full_name();
                let display_name = if !full_name.trim().is_empty() {
                    full_name
                } else {
                    from.username.clone().unwrap_or_else(|| from.id.to_string())
                };
                Some(BotCommand::Start {
                    buyer_id: from.id,
                    first_name: from.first_name.clone(),
                    display_name,
                })
            }
            "/buy" => Some(BotCommand::Buy {
                buyer_id: from.id,
                product_id: words.next()?.to_string(),
            }),
            _ => None,
        }
    }
}

/// Greeting plus the catalog, one buy command per product.
pub fn welcome_message(first_name: &str, products: &[Product]) -> String {
    let mut text = format!(
        "Hello, {}! Welcome to our digital content store.\n\n",
        first_name
    );
    if products.is_empty() {
        text.push_str(EMPTY_CATALOG_TEXT);
        return text;
    }

    text.push_str("Available products:\n");
    for product in products {
        text.push_str(&format!(
            "\n{} - R$ {}\n{}\n/buy {}\n",
            product.name,
            product.price_decimal(),
            product.description,
            product.id
        ));
    }
    text
}

pub struct BotDispatcher {
    store: Store,
    checkout: CheckoutService,
    messenger: Arc<dyn ChatMessenger>,
}

impl BotDispatcher {
    pub fn new(store: Store, checkout: CheckoutService, messenger: Arc<dyn ChatMessenger>) -> Self {
        Self {
            store,
            checkout,
            messenger,
        }
    }

    pub async fn handle(&self, command: BotCommand) -> StoreResult<()> {
        match command {
            BotCommand::Start {
                buyer_id,
                first_name,
                display_name,
            } => {
                let buyer = self.store.register_buyer(buyer_id, &display_name).await?;
                tracing::info!("Registered buyer {} ({})", buyer.id, buyer.display_name);

                let products = self.store.list_products().await?;
                let text = welcome_message(&first_name, &products);
                if let Err(e) = self.messenger.send_text(buyer_id, &text).await {
                    tracing::warn!("Failed to greet buyer {}: {}", buyer_id, e);
                }
            }
            BotCommand::Buy {
                buyer_id,
                product_id,
            } => {
                let outcome = self.checkout.start_checkout(buyer_id, &product_id).await?;
                tracing::debug!("Checkout for buyer {}: {:?}", buyer_id, outcome);
            }
        }
        Ok(())
    }
}

/// One `getUpdates` round. Returns the offset for the next round, which confirms
/// every update seen here to the Bot API, including ones that failed to process.
pub async fn poll_once(
    bot: &TelegramMessenger,
    dispatcher: &BotDispatcher,
    offset: i64,
    poll_timeout: Duration,
) -> Result<i64, MessagingError> {
    let updates = bot.get_updates(offset, poll_timeout).await?;

    let mut next_offset = offset;
    for update in updates {
        next_offset = next_offset.max(update.update_id + 1);

        if let Some(callback) = &update.callback_query {
            if let Err(e) = bot.answer_callback_query(&callback.id).await {
                tracing::debug!("Failed to answer callback query {}: {}", callback.id, e);
            }
        }

        let Some(command) = BotCommand::from_update(&update) else {
            continue;
        };
        if let Err(e) = dispatcher.handle(command).await {
            tracing::error!("Failed to handle update {}: {}", update.update_id, e);
        }
    }
    Ok(next_offset)
}

/// Spawns the long-polling loop. Transport failures are retried after a short delay.
pub fn spawn_polling(bot: TelegramMessenger, dispatcher: Arc<BotDispatcher>) -> JoinHandle<()> {
    tracing::info!("Telegram polling started");

    tokio::spawn(async move {
        let mut offset = 0;
        loop {
            match poll_once(&bot, &dispatcher, offset, POLL_TIMEOUT).await {
                Ok(next) => offset = next,
                Err(e) => {
                    tracing::warn!("Telegram polling failed: {}", e);
                    tokio::time::sleep(POLL_RETRY_DELAY).await;
                }
            }
        }
    })
}
