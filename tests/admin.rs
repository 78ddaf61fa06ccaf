//! Admin endpoints: order review, gateway configuration and reports.

use axum::http::StatusCode;
use serde_json::json;

mod common;
use common::*;

#[tokio::test]
async fn test_bootstrap_admin_email_gets_admin_role() {
    let t = setup().await;
    let admin = t.register("admin@example.com").await;
    let customer = t.register("customer@example.com").await;

    let (status, me) = t.call("GET", "/api/auth/me", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["role"], "admin");

    let (status, _) = t.call("GET", "/api/admin/orders", Some(&customer), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = t.call("GET", "/api/admin/orders", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_role_change_invalidates_old_tokens() {
    let t = setup().await;
    let old_token = t.register("promoted@example.com").await;
    {
        let conn = t.state.db.get().unwrap();
        conn.execute(
            "UPDATE users SET role = 'admin' WHERE email = 'promoted@example.com'",
            [],
        )
        .unwrap();
    }

    let (status, _) = t.call("GET", "/api/auth/me", Some(&old_token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, login) = t
        .call(
            "POST",
            "/api/auth/login",
            None,
            Some(json!({"email": "promoted@example.com", "password": PASSWORD})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let fresh = login["token"].as_str().unwrap();
    let (status, _) = t.call("GET", "/api/admin/orders", Some(fresh), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_admin_lists_and_filters_orders() {
    let t = setup().await;
    let admin = t.register("admin@example.com").await;
    let customer = t.register("shopper@example.com").await;
    let product = t.seed_product("privacy-filter", 1000, 50);

    let mut order_ids = Vec::new();
    for _ in 0..3 {
        let order = t.place_order(&customer, &product.id, 1, "bitcoin").await;
        order_ids.push(order["id"].as_str().unwrap().to_string());
    }
    {
        let conn = t.state.db.get().unwrap();
        queries::mirror_payment_status(&conn, &order_ids[0], PaymentMethod::Bitcoin, PaymentStatus::Completed)
            .unwrap();
    }

    let (status, page) = t
        .call("GET", "/api/admin/orders?limit=2", Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 3);
    assert_eq!(page["limit"], 2);
    assert_eq!(page["items"].as_array().unwrap().len(), 2);

    let (_, paid) = t
        .call("GET", "/api/admin/orders?payment_status=completed", Some(&admin), None)
        .await;
    assert_eq!(paid["total"], 1);
    assert_eq!(paid["items"][0]["id"], order_ids[0].as_str());

    let (_, clamped) = t
        .call("GET", "/api/admin/orders?limit=100000", Some(&admin), None)
        .await;
    assert_eq!(clamped["limit"], 200);

    let (status, detail) = t
        .call("GET", &format!("/api/admin/orders/{}", order_ids[1]), Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["items"][0]["product_id"], product.id.as_str());

    let (status, _) = t
        .call("GET", "/api/admin/orders/missing", Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_gateway_credentials_are_masked() {
    let t = setup().await;
    let admin = t.register("admin@example.com").await;

    let (status, gateways) = t.call("GET", "/api/admin/gateways", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    let gateways = gateways.as_array().unwrap();
    assert_eq!(gateways.len(), 3);

    let nowpayments = gateways
        .iter()
        .find(|g| g["provider"] == "nowpayments")
        .unwrap();
    assert_eq!(nowpayments["enabled"], true);
    let api_key = nowpayments["credentials"]["api_key"].as_str().unwrap();
    assert_ne!(api_key, "nowpayments-api-key");
    assert!(api_key.starts_with("nowpayme"));
    assert!(nowpayments.get("credentials_encrypted").is_none());
}

#[tokio::test]
async fn test_gateway_update_validation() {
    let t = setup().await;
    let admin = t.register("admin@example.com").await;

    let (status, _) = t
        .call(
            "PUT",
            "/api/admin/gateways/blockonomics",
            Some(&admin),
            Some(json!({"credentials": {"provider": "paypal", "client_id": "a", "client_secret": "b", "webhook_id": "c"}})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = t
        .call(
            "PUT",
            "/api/admin/gateways/blockonomics",
            Some(&admin),
            Some(json!({"underpayment_tolerance_bps": 5000})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Blockonomics never reports more than two confirmations
    let (status, _) = t
        .call(
            "PUT",
            "/api/admin/gateways/blockonomics",
            Some(&admin),
            Some(json!({"required_confirmations": 3})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // NowPayments settles on its own `finished` status
    let (status, _) = t
        .call(
            "PUT",
            "/api/admin/gateways/nowpayments",
            Some(&admin),
            Some(json!({"required_confirmations": 10})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = t
        .call("PUT", "/api/admin/gateways/stripe", Some(&admin), Some(json!({"enabled": true})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_gateway_update_applies_settings_and_credentials() {
    let t = setup().await;
    let admin = t.register("admin@example.com").await;

    let (status, view) = t
        .call(
            "PUT",
            "/api/admin/gateways/blockonomics",
            Some(&admin),
            Some(json!({
                "required_confirmations": 1,
                "payment_window_minutes": 45,
                "credentials": {"provider": "blockonomics", "api_key": "rotated-api-key-0001", "callback_secret": "rotated-callback-secret"}
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", view);
    assert_eq!(view["required_confirmations"], 1);
    assert_eq!(view["payment_window_minutes"], 45);
    assert!(view["credentials"]["api_key"].as_str().unwrap().starts_with("rotated-"));

    // The old callback secret stops working
    let conn = t.state.db.get().unwrap();
    let gateway = storefront::payments::load_gateway(&conn, &t.state.master_key, GatewayProvider::Blockonomics)
        .unwrap()
        .unwrap();
    match gateway.credentials {
        GatewayCredentials::Blockonomics(c) => assert_eq!(c.callback_secret, "rotated-callback-secret"),
        other => panic!("unexpected credentials: {:?}", other),
    }
}

#[tokio::test]
async fn test_disabling_gateway_blocks_new_payments() {
    let t = setup().await;
    let admin = t.register("admin@example.com").await;
    let customer = t.register("blocked@example.com").await;
    let product = t.seed_product("kill-switch", 2000, 5);
    let order = t.place_order(&customer, &product.id, 1, "paypal").await;

    let (status, view) = t
        .call("PUT", "/api/admin/gateways/paypal", Some(&admin), Some(json!({"enabled": false})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["enabled"], false);

    let (status, _) = t
        .call(
            "POST",
            "/api/payments/paypal/create",
            Some(&customer),
            Some(json!({"order_id": order["id"]})),
        )
        .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_sales_summary() {
    let t = setup().await;
    let admin = t.register("admin@example.com").await;
    let customer = t.register("summary@example.com").await;
    let product = t.seed_product("summary-item", 1500, 10);

    let paid = t.place_order(&customer, &product.id, 2, "bitcoin").await;
    t.place_order(&customer, &product.id, 1, "monero").await;
    {
        let conn = t.state.db.get().unwrap();
        queries::mirror_payment_status(
            &conn,
            paid["id"].as_str().unwrap(),
            PaymentMethod::Bitcoin,
            PaymentStatus::Completed,
        )
        .unwrap();
    }

    let (status, summary) = t
        .call("GET", "/api/admin/reports/summary", Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["paid_orders"], 1);
    assert_eq!(summary["revenue_cents"], 3000);

    let counts = summary["by_payment_status"].as_array().unwrap();
    let count_for = |s: &str| {
        counts
            .iter()
            .find(|c| c["payment_status"] == s)
            .map(|c| c["orders"].as_i64().unwrap())
    };
    assert_eq!(count_for("completed"), Some(1));
    assert_eq!(count_for("pending"), Some(1));
}
