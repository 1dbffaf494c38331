use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pixdrop::bot::{self, BotDispatcher};
use pixdrop::checkout::CheckoutService;
use pixdrop::config::Config;
use pixdrop::db::{AppState, Store, create_pool, init_db};
use pixdrop::delivery::DeliveryNotifier;
use pixdrop::handlers;
use pixdrop::messaging::{ChatMessenger, TelegramMessenger};
use pixdrop::models::CreateProduct;
use pixdrop::payments::{MercadoPagoClient, PaymentGateway};
use pixdrop::reconcile::ReconciliationEngine;

#[derive(Parser, Debug)]
#[command(name = "pixdrop")]
#[command(about = "PIX payment webhooks and content delivery for a chat storefront")]
struct Cli {
    /// Seed the catalog with a test product (dev mode only)
    #[arg(long)]
    seed: bool,
}

/// Inserts a one-cent test product when the catalog is empty.
async fn seed_dev_data(store: &Store) {
    match store.count_products().await {
        Ok(0) => {}
        Ok(_) => {
            tracing::info!("Catalog already has products, skipping seed");
            return;
        }
        Err(e) => {
            tracing::error!("Failed to count products for seeding: {}", e);
            return;
        }
    }

    let input = CreateProduct {
        name: "TEST 1".to_string(),
        description: "Test product for payment flow checks".to_string(),
        price_cents: 1,
        content: "https://example.com/content/unlocked".to_string(),
    };

    match store.create_product(input).await {
        Ok(product) => {
            tracing::info!("============================================");
            tracing::info!("SEEDED DEV PRODUCT");
            tracing::info!("Product: {} (id: {})", product.name, product.id);
            tracing::info!("Price: {}", product.price_decimal());
            tracing::info!("============================================");
        }
        Err(e) => tracing::error!("Failed to seed dev product: {}", e),
    }
}

/// Spawns a background task that expires stale pending orders.
/// Runs every 5 minutes.
fn spawn_expiry_task(store: Store, max_age: Duration) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(5 * 60);

        loop {
            tokio::time::sleep(interval).await;

            let cutoff = chrono::Utc::now().timestamp() - max_age.as_secs() as i64;
            match store.expire_stale_orders(cutoff).await {
                Ok(count) if count > 0 => {
                    tracing::info!("Expired {} stale pending orders", count);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("Failed to expire stale orders: {}", e);
                }
            }
        }
    });

    tracing::info!(
        "Order expiry task started (runs every 5 minutes, max age {:?})",
        max_age
    );
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pixdrop=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }

    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");
    {
        let conn = db_pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize database");
    }
    let store = Store::new(db_pool, config.db_timeout);

    let gateway: Arc<dyn PaymentGateway> = Arc::new(
        MercadoPagoClient::new(config.mercado_pago()).expect("Failed to build gateway client"),
    );
    let telegram = TelegramMessenger::new(&config.telegram_token, config.gateway_timeout)
        .expect("Failed to build Telegram client");
    let messenger: Arc<dyn ChatMessenger> = Arc::new(telegram.clone());

    let engine = ReconciliationEngine::new(
        gateway.clone(),
        store.clone(),
        DeliveryNotifier::new(messenger.clone()),
    );

    let state = AppState {
        store: store.clone(),
        engine: Arc::new(engine),
        webhook_secret: config.webhook_secret.clone(),
    };

    if cli.seed {
        if !config.dev_mode {
            tracing::warn!("--seed flag ignored: not in dev mode (set PIXDROP_ENV=dev)");
        } else {
            seed_dev_data(&store).await;
        }
    }

    if let Some(max_age) = config.order_expiry {
        spawn_expiry_task(store.clone(), max_age);
    }

    if config.bot_polling {
        let checkout = CheckoutService::new(gateway.clone(), store.clone(), messenger.clone());
        let dispatcher = BotDispatcher::new(store.clone(), checkout, messenger.clone());
        bot::spawn_polling(telegram, Arc::new(dispatcher));
    } else {
        tracing::info!("Telegram polling disabled (TELEGRAM_POLLING=false)");
    }

    let app = Router::new()
        .merge(handlers::public::router())
        .merge(handlers::webhooks::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("pixdrop listening on {}", addr);
    tracing::info!("Webhook URL: {}", config.notification_url());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Failed to start server");
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}
