//! Shared helpers: a router over a temporary database and a local mock of
//! the payment providers and the rate API.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::{
    Router,
    body::Body,
    extract::{Path, State},
    http::{Request, StatusCode},
    routing::{get, post},
};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::sync::Mutex;
use tower::ServiceExt;

pub use storefront::config::{Config, GatewayBootstrap};
pub use storefront::crypto::{MasterKey, hmac_sha512_hex};
pub use storefront::db::{AppState, create_pool, init_db, queries};
pub use storefront::jwt::SessionKeys;
pub use storefront::middleware::ClientRateLimiter;
pub use storefront::models::*;
pub use storefront::payments::bootstrap_gateways;
pub use storefront::payments::nowpayments::sort_keys;

pub const CALLBACK_SECRET: &str = "blockonomics-callback-secret";
pub const IPN_SECRET: &str = "nowpayments-ipn-secret";
pub const PAYPAL_WEBHOOK_ID: &str = "WH-TEST-1";
pub const PASSWORD: &str = "correct horse battery";

/// Mock BTC price: 1 BTC = 50,000 USD
pub const BTC_USD: f64 = 50_000.0;

// ============ Provider mock ============

#[derive(Clone, Default)]
struct MockState {
    rates_up: bool,
    seq: Arc<AtomicUsize>,
    /// PayPal order id -> amount value from the create request
    paypal_orders: Arc<Mutex<HashMap<String, String>>>,
}

impl MockState {
    fn next(&self) -> usize {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }
}

async fn mock_prices(State(mock): State<MockState>) -> (StatusCode, axum::Json<Value>) {
    if !mock.rates_up {
        return (StatusCode::SERVICE_UNAVAILABLE, axum::Json(json!({"error": "down"})));
    }
    (
        StatusCode::OK,
        axum::Json(json!({"bitcoin": {"usd": BTC_USD}, "monero": {"usd": 160.0}})),
    )
}

async fn mock_new_address(State(mock): State<MockState>) -> axum::Json<Value> {
    axum::Json(json!({"address": format!("bc1qmockaddress{:04}", mock.next())}))
}

async fn mock_nowpayments_create(
    State(mock): State<MockState>,
    axum::Json(body): axum::Json<Value>,
) -> axum::Json<Value> {
    let n = mock.next();
    axum::Json(json!({
        "payment_id": 5_000_000 + n,
        "pay_address": format!("4MockMoneroAddress{:04}", n),
        "pay_amount": 0.25,
        "payment_status": "waiting",
        "order_id": body["order_id"],
    }))
}

async fn mock_paypal_token() -> axum::Json<Value> {
    axum::Json(json!({"access_token": "mock-access-token", "expires_in": 3600}))
}

async fn mock_paypal_create(
    State(mock): State<MockState>,
    axum::Json(body): axum::Json<Value>,
) -> axum::Json<Value> {
    let id = format!("PAYPAL-ORDER-{}", mock.next());
    let value = body
        .pointer("/purchase_units/0/amount/value")
        .and_then(Value::as_str)
        .unwrap_or("0.00")
        .to_string();
    mock.paypal_orders.lock().await.insert(id.clone(), value);
    axum::Json(json!({
        "id": id,
        "status": "CREATED",
        "links": [{"href": format!("https://paypal.test/checkoutnow?token={}", id), "rel": "approve"}]
    }))
}

async fn mock_paypal_capture(
    State(mock): State<MockState>,
    Path(id): Path<String>,
) -> (StatusCode, axum::Json<Value>) {
    let Some(value) = mock.paypal_orders.lock().await.get(&id).cloned() else {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            axum::Json(json!({"name": "UNPROCESSABLE_ENTITY"})),
        );
    };
    (
        StatusCode::CREATED,
        axum::Json(json!({
            "id": id,
            "status": "COMPLETED",
            "purchase_units": [{
                "payments": {"captures": [{
                    "id": format!("CAPTURE-{}", id),
                    "status": "COMPLETED",
                    "amount": {"currency_code": "USD", "value": value}
                }]}
            }]
        })),
    )
}

async fn mock_paypal_verify(axum::Json(body): axum::Json<Value>) -> axum::Json<Value> {
    let ok = body["transmission_sig"] == "valid-signature" && body["webhook_id"] == PAYPAL_WEBHOOK_ID;
    axum::Json(json!({"verification_status": if ok { "SUCCESS" } else { "FAILURE" }}))
}

/// Serve the provider mock on an ephemeral port and return its base URL.
pub async fn spawn_provider_mock(rates_up: bool) -> String {
    let mock = MockState {
        rates_up,
        ..Default::default()
    };
    let app = Router::new()
        .route("/simple/price", get(mock_prices))
        .route("/api/new_address", post(mock_new_address))
        .route("/v1/payment", post(mock_nowpayments_create))
        .route("/v1/oauth2/token", post(mock_paypal_token))
        .route("/v2/checkout/orders", post(mock_paypal_create))
        .route("/v2/checkout/orders/{id}/capture", post(mock_paypal_capture))
        .route("/v1/notifications/verify-webhook-signature", post(mock_paypal_verify))
        .with_state(mock);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

// ============ App setup ============

pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    _dir: TempDir,
}

pub struct Options {
    pub rates_up: bool,
    pub rate_limit_per_minute: u32,
    pub admin_email: Option<String>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            rates_up: true,
            rate_limit_per_minute: 10_000,
            admin_email: Some("admin@example.com".to_string()),
        }
    }
}

fn test_config(dir: &TempDir, mock_url: &str, options: &Options) -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        database_path: dir.path().join("test.db").to_string_lossy().into_owned(),
        base_url: "http://api.store.test".to_string(),
        frontend_url: "http://store.test".to_string(),
        dev_mode: true,
        jwt_secret: None,
        jwt_ttl_hours: 1,
        master_key: None,
        bootstrap_admin_email: options.admin_email.clone(),
        rates_api_url: mock_url.to_string(),
        rates_ttl_secs: 300,
        rates_min_interval_ms: 0,
        blockonomics_api_url: mock_url.to_string(),
        nowpayments_api_url: mock_url.to_string(),
        paypal_api_url: mock_url.to_string(),
        http_timeout_secs: 5,
        expiry_sweep_secs: 0,
        rate_limit_per_minute: options.rate_limit_per_minute,
        bootstrap: GatewayBootstrap {
            blockonomics_api_key: Some("blockonomics-api-key".to_string()),
            blockonomics_callback_secret: Some(CALLBACK_SECRET.to_string()),
            nowpayments_api_key: Some("nowpayments-api-key".to_string()),
            nowpayments_ipn_secret: Some(IPN_SECRET.to_string()),
            paypal_client_id: Some("paypal-client-id".to_string()),
            paypal_client_secret: Some("paypal-client-secret".to_string()),
            paypal_webhook_id: Some(PAYPAL_WEBHOOK_ID.to_string()),
        },
    }
}

pub async fn setup() -> TestApp {
    setup_with(Options::default()).await
}

pub async fn setup_with(options: Options) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let mock_url = spawn_provider_mock(options.rates_up).await;
    let config = test_config(&dir, &mock_url, &options);

    let pool = create_pool(&config.database_path).unwrap();
    let master_key = MasterKey::generate();
    {
        let conn = pool.get().unwrap();
        init_db(&conn).unwrap();
        bootstrap_gateways(&conn, &master_key, &config.bootstrap).unwrap();
    }

    let sessions = SessionKeys::new(b"integration-test-secret-integration-test", 1);
    let state = AppState::new(&config, pool, master_key, sessions).unwrap();
    let app = storefront::handlers::app(state.clone());

    TestApp {
        app,
        state,
        _dir: dir,
    }
}

// ============ Requests ============

pub fn json_request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, json)
    }

    /// Send and return the body as text (webhook replies are plain text).
    pub async fn send_text(&self, request: Request<Body>) -> (StatusCode, String) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8_lossy(&body).into_owned())
    }

    pub async fn call(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        self.send(json_request(method, uri, token, body)).await
    }

    /// Register an account and return its session token.
    pub async fn register(&self, email: &str) -> String {
        let (status, body) = self
            .call(
                "POST",
                "/api/auth/register",
                None,
                Some(json!({"email": email, "name": "Test Customer", "password": PASSWORD})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "register failed: {}", body);
        body["token"].as_str().unwrap().to_string()
    }

    pub fn seed_product(&self, slug: &str, price_cents: i64, stock: i64) -> Product {
        let conn = self.state.db.get().unwrap();
        queries::create_product(
            &conn,
            &CreateProduct {
                slug: slug.to_string(),
                name: format!("Product {}", slug),
                description: String::new(),
                price_cents,
                currency: None,
                stock,
            },
        )
        .unwrap()
    }

    /// Put `quantity` of the product in the cart and check out. Returns the order JSON.
    pub async fn place_order(&self, token: &str, product_id: &str, quantity: i64, method: &str) -> Value {
        let (status, body) = self
            .call(
                "POST",
                "/api/cart/items",
                Some(token),
                Some(json!({"product_id": product_id, "quantity": quantity})),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "add to cart failed: {}", body);

        let (status, body) = self
            .call(
                "POST",
                "/api/orders",
                Some(token),
                Some(json!({"shipping_address": shipping_address(), "payment_method": method})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "checkout failed: {}", body);
        body
    }

    pub fn payment(&self, payment_id: &str) -> Payment {
        let conn = self.state.db.get().unwrap();
        queries::get_payment_by_id(&conn, payment_id).unwrap().unwrap()
    }

    pub fn order(&self, order_id: &str) -> Order {
        let conn = self.state.db.get().unwrap();
        queries::get_order_by_id(&conn, order_id).unwrap().unwrap()
    }

    pub fn product(&self, product_id: &str) -> Product {
        let conn = self.state.db.get().unwrap();
        queries::get_product_by_id(&conn, product_id).unwrap().unwrap()
    }
}

pub fn shipping_address() -> Value {
    json!({
        "name": "Ada Lovelace",
        "line1": "12 Analytical Row",
        "city": "London",
        "postal_code": "N1 9GU",
        "country": "GB"
    })
}

/// `x-nowpayments-sig` for an IPN body.
pub fn nowpayments_signature(body: &Value) -> String {
    let canonical = serde_json::to_string(&sort_keys(body.clone())).unwrap();
    hmac_sha512_hex(IPN_SECRET.as_bytes(), canonical.as_bytes()).unwrap()
}
