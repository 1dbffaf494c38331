use std::env;
use std::time::Duration;

use crate::error::ConfigError;
use crate::payments::{MERCADO_PAGO_API_URL, MercadoPagoConfig};

#[derive(Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub base_url: String,
    pub webhook_secret: String,
    pub mercado_pago_access_token: String,
    pub telegram_token: String,
    pub payer_email_domain: String,
    pub gateway_timeout: Duration,
    pub db_timeout: Duration,
    /// Age at which pending orders expire. `None` disables the sweep.
    pub order_expiry: Option<Duration>,
    /// Run the buyer-facing bot by long-polling `getUpdates`.
    pub bot_polling: bool,
    pub dev_mode: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database_path", &self.database_path)
            .field("base_url", &self.base_url)
            .field("payer_email_domain", &self.payer_email_domain)
            .field("gateway_timeout", &self.gateway_timeout)
            .field("db_timeout", &self.db_timeout)
            .field("order_expiry", &self.order_expiry)
            .field("bot_polling", &self.bot_polling)
            .field("dev_mode", &self.dev_mode)
            .finish_non_exhaustive()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from any variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let required = |name: &'static str| get(name).ok_or(ConfigError::Missing(name));

        let dev_mode = get("PIXDROP_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = get("HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port: u16 = parse_or(&get, "PORT", 8000)?;

        let base_url = get("BASE_URL")
            .unwrap_or_else(|| format!("http://{}:{}", host, port))
            .trim_end_matches('/')
            .to_string();

        let expiry_minutes: u64 = parse_or(&get, "ORDER_EXPIRY_MINUTES", 60)?;

        Ok(Self {
            host,
            port,
            database_path: get("DATABASE_PATH").unwrap_or_else(|| "pixdrop.db".to_string()),
            base_url,
            webhook_secret: required("WEBHOOK_SECRET")?,
            mercado_pago_access_token: required("MERCADO_PAGO_ACCESS_TOKEN")?,
            telegram_token: required("TELEGRAM_TOKEN")?,
            payer_email_domain: get("PAYER_EMAIL_DOMAIN")
                .unwrap_or_else(|| "pixdrop.local".to_string()),
            gateway_timeout: Duration::from_secs(parse_or(&get, "GATEWAY_TIMEOUT_SECS", 10)?),
            db_timeout: Duration::from_secs(parse_or(&get, "DB_TIMEOUT_SECS", 5)?),
            order_expiry: (expiry_minutes > 0).then(|| Duration::from_secs(expiry_minutes * 60)),
            bot_polling: parse_or(&get, "TELEGRAM_POLLING", true)?,
            dev_mode,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn notification_url(&self) -> String {
        format!("{}/webhook/mercadopago", self.base_url)
    }

    pub fn mercado_pago(&self) -> MercadoPagoConfig {
        MercadoPagoConfig {
            access_token: self.mercado_pago_access_token.clone(),
            api_base: MERCADO_PAGO_API_URL.to_string(),
            notification_url: self.notification_url(),
            payer_email_domain: self.payer_email_domain.clone(),
            timeout: self.gateway_timeout,
        }
    }
}

fn parse_or<T, G>(get: &G, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}
