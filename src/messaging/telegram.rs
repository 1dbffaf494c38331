use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, multipart};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::MessagingError;

use super::ChatMessenger;

pub const TELEGRAM_API_URL: &str = "https://api.telegram.org";

/// Every request URL embeds the bot token, and reqwest errors print their URL.
fn http_error(e: reqwest::Error) -> MessagingError {
    MessagingError::Http(e.without_url())
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct GetUpdatesRequest {
    offset: i64,
    timeout: u64,
    allowed_updates: [&'static str; 2],
}

#[derive(Debug, Serialize)]
struct AnswerCallbackQueryRequest<'a> {
    callback_query_id: &'a str,
}

/// Envelope every Bot API method answers with.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

impl User {
    pub fn full_name(&self) -> String {
        match &self.last_name {
            Some(last) if !last.is_empty() => format!("{} {}", self.first_name, last),
            _ => self.first_name.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    #[serde(default)]
    pub data: Option<String>,
}

/// One entry of a `getUpdates` answer. Kinds other than messages and callback
/// queries are not requested and deserialize with both fields empty.
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

/// Telegram Bot API client.
#[derive(Clone)]
pub struct TelegramMessenger {
    client: Client,
    token: String,
    api_base: String,
}

impl TelegramMessenger {
    pub fn new(token: &str, timeout: Duration) -> Result<Self, MessagingError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(http_error)?;
        Ok(Self {
            client,
            token: token.to_string(),
            api_base: TELEGRAM_API_URL.to_string(),
        })
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    async fn read<T: DeserializeOwned>(response: Response) -> Result<Option<T>, MessagingError> {
        let status = response.status();
        let body: ApiResponse<T> = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                return Err(MessagingError::Rejected(format!(
                    "HTTP {} with unreadable body: {}",
                    status,
                    e.without_url()
                )));
            }
        };

        if !body.ok {
            return Err(MessagingError::Rejected(
                body.description
                    .unwrap_or_else(|| format!("HTTP {}", status)),
            ));
        }
        Ok(body.result)
    }

    async fn check(response: Response) -> Result<(), MessagingError> {
        Self::read::<serde_json::Value>(response).await.map(|_| ())
    }

    /// Long-poll for updates after `offset`. The request outlives the client's
    /// default timeout by the poll duration.
    pub async fn get_updates(
        &self,
        offset: i64,
        poll_timeout: Duration,
    ) -> Result<Vec<Update>, MessagingError> {
        let response = self
            .client
            .post(self.method_url("getUpdates"))
            .timeout(poll_timeout + Duration::from_secs(10))
            .json(&GetUpdatesRequest {
                offset,
                timeout: poll_timeout.as_secs(),
                allowed_updates: ["message", "callback_query"],
            })
            .send()
            .await
            .map_err(http_error)?;
        Ok(Self::read(response).await?.unwrap_or_default())
    }

    /// Stop the client-side spinner on a pressed inline button.
    pub async fn answer_callback_query(&self, callback_query_id: &str) -> Result<(), MessagingError> {
        let response = self
            .client
            .post(self.method_url("answerCallbackQuery"))
            .json(&AnswerCallbackQueryRequest { callback_query_id })
            .send()
            .await
            .map_err(http_error)?;
        Self::check(response).await
    }
}

#[async_trait]
impl ChatMessenger for TelegramMessenger {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), MessagingError> {
        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&SendMessageRequest { chat_id, text })
            .send()
            .await
            .map_err(http_error)?;
        Self::check(response).await
    }

    async fn send_image(
        &self,
        chat_id: i64,
        image: Vec<u8>,
        caption: &str,
    ) -> Result<(), MessagingError> {
        let photo = multipart::Part::bytes(image)
            .file_name("qr.png")
            .mime_str("image/png")
            .map_err(http_error)?;
        let form = multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", caption.to_string())
            .part("photo", photo);

        let response = self
            .client
            .post(self.method_url("sendPhoto"))
            .multipart(form)
            .send()
            .await
            .map_err(http_error)?;
        Self::check(response).await
    }
}
