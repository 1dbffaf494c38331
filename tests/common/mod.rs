//! Test utilities, fakes and fixtures for pixdrop integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use rusqlite::Connection;
use tower::ServiceExt;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

pub use pixdrop::db::{AppState, Deadline, Store, create_memory_pool, create_pool, init_db, queries};
pub use pixdrop::delivery::DeliveryNotifier;
pub use pixdrop::error::{GatewayError, MessagingError, StoreError};
pub use pixdrop::handlers;
pub use pixdrop::messaging::ChatMessenger;
pub use pixdrop::models::*;
pub use pixdrop::payments::{PaymentDescriptor, PaymentGateway, PaymentStatus};
pub use pixdrop::reconcile::{ReconcileOutcome, ReconciliationEngine};
pub use pixdrop::signature::{build_manifest, compute_signature};

pub const TEST_SECRET: &str = "whsec_test_secret";
pub const QR_PNG: &[u8] = b"\x89PNG\r\n\x1a\nfake-qr";

// ============================================================================
// Fake gateway
// ============================================================================

/// In-memory payment gateway. Payments are created pending and changed by tests.
#[derive(Default)]
pub struct FakeGateway {
    payments: Mutex<HashMap<String, PaymentDescriptor>>,
    next_id: AtomicU64,
    fetches: AtomicUsize,
    creates: AtomicUsize,
    fail_fetch: AtomicBool,
    fail_create: AtomicBool,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1000),
            ..Default::default()
        }
    }

    /// Register or replace what the gateway reports for `payment_id`.
    pub fn set_payment(&self, payment_id: &str, status: &str, external_reference: Option<&str>) {
        self.payments.lock().unwrap().insert(
            payment_id.to_string(),
            PaymentDescriptor {
                id: payment_id.to_string(),
                status: PaymentStatus::from_gateway(status),
                external_reference: external_reference.map(str::to_string),
                qr_code: None,
                qr_code_base64: None,
            },
        );
    }

    pub fn approve(&self, payment_id: &str) {
        let mut payments = self.payments.lock().unwrap();
        let payment = payments.get_mut(payment_id).expect("unknown fake payment");
        payment.status = PaymentStatus::Approved;
    }

    pub fn fail_fetches(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn fail_creates(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn create_payment(
        &self,
        order: &Order,
        _product: &Product,
        _buyer: &Buyer,
    ) -> Result<PaymentDescriptor, GatewayError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(GatewayError::Api {
                status: 503,
                body: "unavailable".into(),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        let payment = PaymentDescriptor {
            id: id.clone(),
            status: PaymentStatus::Pending,
            external_reference: Some(order.id.clone()),
            qr_code: Some(format!("00020126PIX{}", id)),
            qr_code_base64: Some(BASE64.encode(QR_PNG)),
        };
        self.payments.lock().unwrap().insert(id, payment.clone());
        Ok(payment)
    }

    async fn fetch_status(
        &self,
        gateway_payment_id: &str,
    ) -> Result<PaymentDescriptor, GatewayError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(GatewayError::Api {
                status: 500,
                body: "internal".into(),
            });
        }

        self.payments
            .lock()
            .unwrap()
            .get(gateway_payment_id)
            .cloned()
            .ok_or(GatewayError::Api {
                status: 404,
                body: "not found".into(),
            })
    }
}

// ============================================================================
// Recording messenger
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentImage {
    pub chat_id: i64,
    pub image: Vec<u8>,
    pub caption: String,
}

#[derive(Default)]
pub struct RecordingMessenger {
    texts: Mutex<Vec<(i64, String)>>,
    images: Mutex<Vec<SentImage>>,
    fail: AtomicBool,
}

impl RecordingMessenger {
    pub fn fail_sends(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn texts(&self) -> Vec<(i64, String)> {
        self.texts.lock().unwrap().clone()
    }

    pub fn images(&self) -> Vec<SentImage> {
        self.images.lock().unwrap().clone()
    }

    /// Texts that carry purchased content.
    pub fn deliveries(&self) -> Vec<(i64, String)> {
        self.texts()
            .into_iter()
            .filter(|(_, text)| text.starts_with("Payment approved!"))
            .collect()
    }
}

#[async_trait]
impl ChatMessenger for RecordingMessenger {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), MessagingError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(MessagingError::Rejected("Forbidden: bot was blocked by the user".into()));
        }
        self.texts.lock().unwrap().push((chat_id, text.to_string()));
        Ok(())
    }

    async fn send_image(
        &self,
        chat_id: i64,
        image: Vec<u8>,
        caption: &str,
    ) -> Result<(), MessagingError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(MessagingError::Rejected("Forbidden: bot was blocked by the user".into()));
        }
        self.images.lock().unwrap().push(SentImage {
            chat_id,
            image,
            caption: caption.to_string(),
        });
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct TestHarness {
    pub store: Store,
    pub gateway: Arc<FakeGateway>,
    pub messenger: Arc<RecordingMessenger>,
    pub engine: Arc<ReconciliationEngine>,
}

/// In-memory store with schema, fake gateway and recording messenger.
pub fn setup() -> TestHarness {
    setup_with_pool(create_memory_pool().expect("Failed to create pool"))
}

/// Harness over a caller-supplied pool, e.g. a file-backed one with several connections.
pub fn setup_with_pool(pool: pixdrop::db::DbPool) -> TestHarness {
    {
        let conn = pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize schema");
    }
    let store = Store::new(pool, Duration::from_secs(5));
    let gateway = Arc::new(FakeGateway::new());
    let messenger = Arc::new(RecordingMessenger::default());
    let engine = Arc::new(ReconciliationEngine::new(
        gateway.clone(),
        store.clone(),
        DeliveryNotifier::new(messenger.clone()),
    ));

    TestHarness {
        store,
        gateway,
        messenger,
        engine,
    }
}

impl TestHarness {
    pub fn app(&self) -> Router {
        self.app_with_secret(TEST_SECRET)
    }

    pub fn app_with_secret(&self, secret: &str) -> Router {
        let state = AppState {
            store: self.store.clone(),
            engine: self.engine.clone(),
            webhook_secret: secret.to_string(),
        };
        Router::new()
            .merge(handlers::public::router())
            .merge(handlers::webhooks::router())
            .with_state(state)
    }

    pub async fn order(&self, order_id: &str) -> Order {
        self.store
            .find_order(order_id)
            .await
            .unwrap()
            .expect("order should exist")
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub async fn create_test_buyer(store: &Store, id: i64) -> Buyer {
    store
        .register_buyer(id, &format!("Buyer {}", id))
        .await
        .expect("Failed to register buyer")
}

pub async fn create_test_product(store: &Store, name: &str) -> Product {
    store
        .create_product(CreateProduct {
            name: name.to_string(),
            description: format!("{} description", name),
            price_cents: 1990,
            content: format!("https://example.com/content/{}", name.to_lowercase()),
        })
        .await
        .expect("Failed to create product")
}

/// Pending order linked to `gateway_payment_id`, which the fake gateway reports as
/// pending with the order as external reference.
pub async fn create_pending_order(
    h: &TestHarness,
    buyer_id: i64,
    product: &Product,
    gateway_payment_id: &str,
) -> Order {
    let order = h
        .store
        .create_order(CreateOrder {
            buyer_id,
            product_id: product.id.clone(),
            gateway_payment_id: None,
        })
        .await
        .expect("Failed to create order");
    assert!(
        h.store
            .attach_gateway_payment_id(&order.id, gateway_payment_id)
            .await
            .unwrap()
    );
    h.gateway
        .set_payment(gateway_payment_id, "pending", Some(order.id.as_str()));
    h.order(&order.id).await
}

/// Create an in-memory test database with schema initialized
pub fn setup_test_db() -> Connection {
    let conn = Connection::open_in_memory().expect("Failed to create in-memory database");
    init_db(&conn).expect("Failed to initialize schema");
    conn
}

pub fn insert_test_buyer(conn: &Connection, id: i64) -> Buyer {
    queries::upsert_buyer(conn, id, &format!("Buyer {}", id)).expect("Failed to insert buyer")
}

pub fn insert_test_product(conn: &Connection, name: &str) -> Product {
    queries::create_product(
        conn,
        &CreateProduct {
            name: name.to_string(),
            description: format!("{} description", name),
            price_cents: 500,
            content: format!("https://example.com/content/{}", name.to_lowercase()),
        },
    )
    .expect("Failed to insert product")
}

pub fn insert_test_order(
    conn: &Connection,
    buyer_id: i64,
    product_id: &str,
    gateway_payment_id: Option<&str>,
) -> std::result::Result<Order, StoreError> {
    queries::create_order(
        conn,
        &CreateOrder {
            buyer_id,
            product_id: product_id.to_string(),
            gateway_payment_id: gateway_payment_id.map(str::to_string),
        },
    )
}

// ============================================================================
// Webhook requests
// ============================================================================

pub fn notification_body(payment_id: &str) -> String {
    serde_json::json!({
        "action": "payment.updated",
        "type": "payment",
        "data": { "id": payment_id }
    })
    .to_string()
}

/// Webhook request signed the way the gateway signs it.
pub fn signed_request(secret: &str, payment_id: &str, request_id: &str) -> Request<Body> {
    let ts = "1700000000";
    let v1 = compute_signature(secret, &build_manifest(payment_id, request_id, ts)).unwrap();
    webhook_request(
        payment_id,
        Some(format!("ts={},v1={}", ts, v1).as_str()),
        Some(request_id),
        notification_body(payment_id),
    )
}

pub fn webhook_request(
    payment_id: &str,
    signature: Option<&str>,
    request_id: Option<&str>,
    body: String,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(format!("/webhook/mercadopago?data.id={}&type=payment", payment_id))
        .header("content-type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header("x-signature", signature);
    }
    if let Some(request_id) = request_id {
        builder = builder.header("x-request-id", request_id);
    }
    builder.body(Body::from(body)).unwrap()
}

pub async fn send(app: Router, request: Request<Body>) -> (StatusCode, String) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8_lossy(&body).into_owned())
}

// ============================================================================
// Log capture
// ============================================================================

#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub level: Level,
    pub fields: HashMap<String, String>,
}

/// Tracing layer that keeps every event for assertions.
#[derive(Clone, Default)]
pub struct CapturedEvents(Arc<Mutex<Vec<CapturedEvent>>>);

impl CapturedEvents {
    pub fn events(&self) -> Vec<CapturedEvent> {
        self.0.lock().unwrap().clone()
    }

    pub fn security_events(&self) -> Vec<CapturedEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.fields.get("security_event").map(String::as_str) == Some("true"))
            .collect()
    }
}

struct FieldRecorder(HashMap<String, String>);

impl Visit for FieldRecorder {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0
            .insert(field.name().to_string(), format!("{:?}", value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }
}

impl<S: Subscriber> Layer<S> for CapturedEvents {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut recorder = FieldRecorder(HashMap::new());
        event.record(&mut recorder);
        self.0.lock().unwrap().push(CapturedEvent {
            level: *event.metadata().level(),
            fields: recorder.0,
        });
    }
}

// ============================================================================
// Mock HTTP upstreams
// ============================================================================

/// Serve `router` on an ephemeral local port and return its base URL.
pub async fn spawn_mock_server(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}
