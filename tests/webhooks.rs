//! Provider callbacks: verification, status mapping, replay protection.

use axum::{body::Body, http::{Request, StatusCode}};
use serde_json::{Value, json};

mod common;
use common::*;

/// Place an order and open a payment for it. Returns (order id, payment JSON).
async fn open_payment(t: &TestApp, email: &str, method: &str, path: &str) -> (String, Value) {
    let token = t.register(email).await;
    let product = t.seed_product(&format!("item-{}", email.replace(['@', '.'], "-")), 2500, 10);
    let order = t.place_order(&token, &product.id, 2, method).await;
    let order_id = order["id"].as_str().unwrap().to_string();
    let (status, payment) = t
        .call("POST", path, Some(&token), Some(json!({"order_id": order_id})))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", payment);
    (order_id, payment)
}

fn blockonomics_callback(status: i64, addr: &str, value: i64, txid: &str, secret: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(format!(
            "/api/payments/webhook/blockonomics?status={}&addr={}&value={}&txid={}&secret={}",
            status, addr, value, txid, secret
        ))
        .body(Body::empty())
        .unwrap()
}

fn nowpayments_ipn(body: &Value, signature: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/payments/webhook/nowpayments")
        .header("content-type", "application/json");
    if let Some(sig) = signature {
        builder = builder.header("x-nowpayments-sig", sig);
    }
    builder
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

fn paypal_webhook(event: &Value, transmission_sig: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/payments/webhook/paypal")
        .header("content-type", "application/json")
        .header("paypal-auth-algo", "SHA256withRSA")
        .header("paypal-cert-url", "https://api.paypal.com/certs/test")
        .header("paypal-transmission-id", "transmission-1")
        .header("paypal-transmission-sig", transmission_sig)
        .header("paypal-transmission-time", "2026-01-01T00:00:00Z")
        .body(Body::from(serde_json::to_vec(event).unwrap()))
        .unwrap()
}

// ============ Blockonomics ============

#[tokio::test]
async fn test_blockonomics_confirmed_payment_completes_order() {
    let t = setup().await;
    let (order_id, payment) = open_payment(&t, "bc-ok@example.com", "bitcoin", "/api/payments/bitcoin").await;
    let addr = payment["address"].as_str().unwrap();
    let payment_id = payment["payment_id"].as_str().unwrap();

    let (status, _) = t
        .send_text(blockonomics_callback(0, addr, 100_000, "tx-1", CALLBACK_SECRET))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(t.payment(payment_id).status, PaymentStatus::AwaitingConfirmation);
    assert_eq!(t.order(&order_id).payment_status, PaymentStatus::AwaitingConfirmation);

    let (status, _) = t
        .send_text(blockonomics_callback(2, addr, 100_000, "tx-1", CALLBACK_SECRET))
        .await;
    assert_eq!(status, StatusCode::OK);

    let stored = t.payment(payment_id);
    assert_eq!(stored.status, PaymentStatus::Completed);
    assert_eq!(stored.received_atomic, Some(100_000));
    assert_eq!(stored.confirmations, 2);
    assert_eq!(stored.txid.as_deref(), Some("tx-1"));
    assert!(stored.completed_at.is_some());

    let order = t.order(&order_id);
    assert_eq!(order.status, OrderStatus::Paid);
    assert_eq!(order.payment_status, PaymentStatus::Completed);
}

#[tokio::test]
async fn test_blockonomics_lower_threshold_completes_early() {
    let t = setup().await;
    let admin = t.register("admin@example.com").await;
    let (status, _) = t
        .call(
            "PUT",
            "/api/admin/gateways/blockonomics",
            Some(&admin),
            Some(json!({"required_confirmations": 1})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (order_id, payment) = open_payment(&t, "bc-fast@example.com", "bitcoin", "/api/payments/bitcoin").await;
    let addr = payment["address"].as_str().unwrap();

    t.send_text(blockonomics_callback(1, addr, 100_000, "tx-fast", CALLBACK_SECRET))
        .await;
    assert_eq!(t.order(&order_id).status, OrderStatus::Paid);
}

#[tokio::test]
async fn test_blockonomics_short_payment_is_underpaid() {
    let t = setup().await;
    let (order_id, payment) = open_payment(&t, "bc-short@example.com", "bitcoin", "/api/payments/bitcoin").await;
    let addr = payment["address"].as_str().unwrap();

    let (status, _) = t
        .send_text(blockonomics_callback(2, addr, 60_000, "tx-short", CALLBACK_SECRET))
        .await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(
        t.payment(payment["payment_id"].as_str().unwrap()).status,
        PaymentStatus::Underpaid
    );
    let order = t.order(&order_id);
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.payment_status, PaymentStatus::Underpaid);
}

#[tokio::test]
async fn test_blockonomics_within_tolerance_completes() {
    let t = setup().await;
    let (_, payment) = open_payment(&t, "bc-tol@example.com", "bitcoin", "/api/payments/bitcoin").await;
    let addr = payment["address"].as_str().unwrap();

    // Default tolerance is 1%
    t.send_text(blockonomics_callback(2, addr, 99_000, "tx-tol", CALLBACK_SECRET))
        .await;
    assert_eq!(
        t.payment(payment["payment_id"].as_str().unwrap()).status,
        PaymentStatus::Completed
    );
}

#[tokio::test]
async fn test_blockonomics_bad_secret_is_rejected() {
    let t = setup().await;
    let (_, payment) = open_payment(&t, "bc-bad@example.com", "bitcoin", "/api/payments/bitcoin").await;
    let addr = payment["address"].as_str().unwrap();

    let (status, _) = t
        .send_text(blockonomics_callback(2, addr, 100_000, "tx-forged", "guess"))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        t.payment(payment["payment_id"].as_str().unwrap()).status,
        PaymentStatus::Pending
    );
}

#[tokio::test]
async fn test_blockonomics_malformed_and_unknown() {
    let t = setup().await;

    let (status, _) = t
        .send_text(
            Request::builder()
                .uri("/api/payments/webhook/blockonomics?status=2&addr=x")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = t
        .send_text(blockonomics_callback(2, "bc1qnobody", 1_000, "tx-x", CALLBACK_SECRET))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Unknown address");
}

#[tokio::test]
async fn test_blockonomics_replay_is_acknowledged_once() {
    let t = setup().await;
    let (_, payment) = open_payment(&t, "bc-replay@example.com", "bitcoin", "/api/payments/bitcoin").await;
    let addr = payment["address"].as_str().unwrap();

    let (_, first) = t
        .send_text(blockonomics_callback(1, addr, 100_000, "tx-r", CALLBACK_SECRET))
        .await;
    let (status, second) = t
        .send_text(blockonomics_callback(1, addr, 100_000, "tx-r", CALLBACK_SECRET))
        .await;
    assert_eq!(first, "OK");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second, "Already processed");
}

#[tokio::test]
async fn test_late_bitcoin_funds_are_credited() {
    let t = setup().await;
    let (order_id, payment) = open_payment(&t, "bc-late@example.com", "bitcoin", "/api/payments/bitcoin").await;
    let payment_id = payment["payment_id"].as_str().unwrap();
    {
        let mut conn = t.state.db.get().unwrap();
        conn.execute(
            "UPDATE payments SET expires_at = ?1 WHERE id = ?2",
            rusqlite::params![queries::now() - 60, payment_id],
        )
        .unwrap();
        let expired =
            storefront::payments::processing::expire_stale_payments(&mut conn, queries::now()).unwrap();
        assert_eq!(expired, 1);
    }
    assert_eq!(t.order(&order_id).payment_status, PaymentStatus::Expired);

    let addr = payment["address"].as_str().unwrap();
    t.send_text(blockonomics_callback(2, addr, 100_000, "tx-late", CALLBACK_SECRET))
        .await;

    assert_eq!(t.payment(payment_id).status, PaymentStatus::Completed);
    assert_eq!(t.order(&order_id).status, OrderStatus::Paid);
}

// ============ NowPayments ============

fn ipn_body(payment: &Payment, status: &str, actually_paid: f64) -> Value {
    let provider_ref: u64 = payment.provider_ref.as_deref().unwrap().parse().unwrap();
    json!({
        "payment_id": provider_ref,
        "payment_status": status,
        "pay_address": payment.address,
        "pay_amount": 0.25,
        "actually_paid": actually_paid,
        "order_id": payment.order_id,
        "price_amount": 50,
        "price_currency": "usd"
    })
}

#[tokio::test]
async fn test_nowpayments_finished_completes_order() {
    let t = setup().await;
    let (order_id, created) = open_payment(&t, "np-ok@example.com", "monero", "/api/payments/monero").await;
    let payment = t.payment(created["payment_id"].as_str().unwrap());

    let body = ipn_body(&payment, "finished", 0.25);
    let (status, reply) = t
        .send_text(nowpayments_ipn(&body, Some(&nowpayments_signature(&body))))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply, "OK");

    let stored = t.payment(&payment.id);
    assert_eq!(stored.status, PaymentStatus::Completed);
    assert_eq!(stored.received_atomic, Some(250_000_000_000));
    assert_eq!(t.order(&order_id).status, OrderStatus::Paid);
}

#[tokio::test]
async fn test_nowpayments_finished_short_is_underpaid() {
    let t = setup().await;
    let (_, created) = open_payment(&t, "np-short@example.com", "monero", "/api/payments/monero").await;
    let payment = t.payment(created["payment_id"].as_str().unwrap());

    let body = ipn_body(&payment, "finished", 0.2);
    t.send_text(nowpayments_ipn(&body, Some(&nowpayments_signature(&body))))
        .await;
    assert_eq!(t.payment(&payment.id).status, PaymentStatus::Underpaid);
}

#[tokio::test]
async fn test_nowpayments_expired_invoice() {
    let t = setup().await;
    let (order_id, created) = open_payment(&t, "np-exp@example.com", "monero", "/api/payments/monero").await;
    let payment = t.payment(created["payment_id"].as_str().unwrap());

    let body = ipn_body(&payment, "expired", 0.0);
    let (status, _) = t
        .send_text(nowpayments_ipn(&body, Some(&nowpayments_signature(&body))))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(t.payment(&payment.id).status, PaymentStatus::Expired);
    assert_eq!(t.order(&order_id).payment_status, PaymentStatus::Expired);
}

#[tokio::test]
async fn test_nowpayments_signature_checks() {
    let t = setup().await;
    let (_, created) = open_payment(&t, "np-sig@example.com", "monero", "/api/payments/monero").await;
    let payment = t.payment(created["payment_id"].as_str().unwrap());
    let body = ipn_body(&payment, "finished", 0.25);

    let (status, _) = t.send_text(nowpayments_ipn(&body, None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = t
        .send_text(nowpayments_ipn(&body, Some(&"0".repeat(128))))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Signed over a different body
    let mut tampered = body.clone();
    tampered["actually_paid"] = json!(5.0);
    let (status, _) = t
        .send_text(nowpayments_ipn(&tampered, Some(&nowpayments_signature(&body))))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    assert_eq!(t.payment(&payment.id).status, PaymentStatus::Pending);
}

#[tokio::test]
async fn test_nowpayments_duplicate_ipn() {
    let t = setup().await;
    let (_, created) = open_payment(&t, "np-dup@example.com", "monero", "/api/payments/monero").await;
    let payment = t.payment(created["payment_id"].as_str().unwrap());

    let body = ipn_body(&payment, "confirming", 0.25);
    let sig = nowpayments_signature(&body);
    let (_, first) = t.send_text(nowpayments_ipn(&body, Some(&sig))).await;
    let (_, second) = t.send_text(nowpayments_ipn(&body, Some(&sig))).await;
    assert_eq!(first, "OK");
    assert_eq!(second, "Already processed");
    assert_eq!(t.payment(&payment.id).status, PaymentStatus::AwaitingConfirmation);
}

#[tokio::test]
async fn test_nowpayments_completed_payment_never_regresses() {
    let t = setup().await;
    let (_, created) = open_payment(&t, "np-regress@example.com", "monero", "/api/payments/monero").await;
    let payment = t.payment(created["payment_id"].as_str().unwrap());

    let finished = ipn_body(&payment, "finished", 0.25);
    t.send_text(nowpayments_ipn(&finished, Some(&nowpayments_signature(&finished))))
        .await;

    let failed = ipn_body(&payment, "failed", 0.25);
    let (status, reply) = t
        .send_text(nowpayments_ipn(&failed, Some(&nowpayments_signature(&failed))))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply, "Transition ignored");
    assert_eq!(t.payment(&payment.id).status, PaymentStatus::Completed);
}

// ============ PayPal ============

fn capture_event(event_id: &str, paypal_order_id: &str, value: &str) -> Value {
    json!({
        "id": event_id,
        "event_type": "PAYMENT.CAPTURE.COMPLETED",
        "resource": {
            "id": "CAPTURE-WEBHOOK-1",
            "status": "COMPLETED",
            "amount": {"currency_code": "USD", "value": value},
            "supplementary_data": {"related_ids": {"order_id": paypal_order_id}}
        }
    })
}

#[tokio::test]
async fn test_paypal_capture_webhook_completes_order() {
    let t = setup().await;
    let (order_id, created) =
        open_payment(&t, "pp-ok@example.com", "paypal", "/api/payments/paypal/create").await;
    let paypal_order_id = created["paypal_order_id"].as_str().unwrap();

    let event = capture_event("WH-EVENT-1", paypal_order_id, "50.00");
    let (status, reply) = t.send_text(paypal_webhook(&event, "valid-signature")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply, "OK");

    let order = t.order(&order_id);
    assert_eq!(order.status, OrderStatus::Paid);
    match order.payment_details {
        Some(PaymentDetails::PayPal { capture_id, .. }) => {
            assert_eq!(capture_id.as_deref(), Some("CAPTURE-WEBHOOK-1"))
        }
        other => panic!("unexpected payment details: {:?}", other),
    }

    let (_, replay) = t.send_text(paypal_webhook(&event, "valid-signature")).await;
    assert_eq!(replay, "Already processed");
}

#[tokio::test]
async fn test_paypal_short_capture_is_underpaid() {
    let t = setup().await;
    let (order_id, created) =
        open_payment(&t, "pp-short@example.com", "paypal", "/api/payments/paypal/create").await;
    let paypal_order_id = created["paypal_order_id"].as_str().unwrap();

    let event = capture_event("WH-EVENT-2", paypal_order_id, "10.00");
    t.send_text(paypal_webhook(&event, "valid-signature")).await;

    let order = t.order(&order_id);
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.payment_status, PaymentStatus::Underpaid);
}

fn refund_event(event_id: &str, event_type: &str, paypal_order_id: &str, value: &str) -> Value {
    json!({
        "id": event_id,
        "event_type": event_type,
        "resource": {
            "id": format!("REFUND-{}", event_id),
            "status": "COMPLETED",
            "amount": {"currency_code": "USD", "value": value},
            "supplementary_data": {"related_ids": {"order_id": paypal_order_id, "capture_id": "CAPTURE-WEBHOOK-1"}}
        }
    })
}

#[tokio::test]
async fn test_paypal_refund_closes_paid_order() {
    let t = setup().await;
    let (order_id, created) =
        open_payment(&t, "pp-refund@example.com", "paypal", "/api/payments/paypal/create").await;
    let paypal_order_id = created["paypal_order_id"].as_str().unwrap();
    let payment_id = created["payment_id"].as_str().unwrap();

    let capture = capture_event("WH-EVENT-10", paypal_order_id, "50.00");
    t.send_text(paypal_webhook(&capture, "valid-signature")).await;
    assert_eq!(t.order(&order_id).status, OrderStatus::Paid);

    // A partial refund keeps the order paid
    let partial = refund_event("WH-EVENT-11", "PAYMENT.CAPTURE.REFUNDED", paypal_order_id, "5.00");
    let (status, reply) = t.send_text(paypal_webhook(&partial, "valid-signature")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply, "Partial refund");
    assert_eq!(t.order(&order_id).status, OrderStatus::Paid);

    let full = refund_event("WH-EVENT-12", "PAYMENT.CAPTURE.REFUNDED", paypal_order_id, "50.00");
    let (status, reply) = t.send_text(paypal_webhook(&full, "valid-signature")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply, "OK");

    let order = t.order(&order_id);
    assert_eq!(order.status, OrderStatus::Refunded);
    assert_eq!(order.payment_status, PaymentStatus::Refunded);
    let payment = t.payment(payment_id);
    assert_eq!(payment.status, PaymentStatus::Refunded);
    assert_eq!(payment.received_atomic, Some(5000));

    let conn = t.state.db.get().unwrap();
    let summary = queries::sales_summary(&conn).unwrap();
    assert_eq!(summary.paid_orders, 0);
    assert_eq!(summary.revenue_cents, 0);
}

#[tokio::test]
async fn test_paypal_reversal_after_capture() {
    let t = setup().await;
    let (order_id, created) =
        open_payment(&t, "pp-reversal@example.com", "paypal", "/api/payments/paypal/create").await;
    let paypal_order_id = created["paypal_order_id"].as_str().unwrap();

    let capture = capture_event("WH-EVENT-20", paypal_order_id, "50.00");
    t.send_text(paypal_webhook(&capture, "valid-signature")).await;

    let reversal = refund_event("WH-EVENT-21", "PAYMENT.CAPTURE.REVERSED", paypal_order_id, "50.00");
    let (_, reply) = t.send_text(paypal_webhook(&reversal, "valid-signature")).await;
    assert_eq!(reply, "OK");
    assert_eq!(t.order(&order_id).status, OrderStatus::Refunded);

    // A late capture replay cannot make it paid again
    let again = capture_event("WH-EVENT-22", paypal_order_id, "50.00");
    let (_, reply) = t.send_text(paypal_webhook(&again, "valid-signature")).await;
    assert_eq!(reply, "Transition ignored");
    assert_eq!(t.order(&order_id).status, OrderStatus::Refunded);
}

#[tokio::test]
async fn test_paypal_unverified_webhook_is_rejected() {
    let t = setup().await;
    let (order_id, created) =
        open_payment(&t, "pp-bad@example.com", "paypal", "/api/payments/paypal/create").await;
    let paypal_order_id = created["paypal_order_id"].as_str().unwrap();

    let event = capture_event("WH-EVENT-3", paypal_order_id, "50.00");
    let (status, _) = t.send_text(paypal_webhook(&event, "forged")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(t.order(&order_id).status, OrderStatus::Pending);

    let (status, _) = t
        .send_text(
            Request::builder()
                .method("POST")
                .uri("/api/payments/webhook/paypal")
                .body(Body::from("not json"))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_paypal_unhandled_event_is_ignored() {
    let t = setup().await;
    let event = json!({
        "id": "WH-EVENT-4",
        "event_type": "BILLING.PLAN.CREATED",
        "resource": {"id": "P-1"}
    });
    let (status, reply) = t.send_text(paypal_webhook(&event, "valid-signature")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply, "Event ignored");
}
