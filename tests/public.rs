//! Unauthenticated catalogue, rates and health endpoints.

use axum::http::StatusCode;

mod common;
use common::*;

#[tokio::test]
async fn test_health() {
    let t = setup().await;
    let (status, body) = t.call("GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_catalogue_lists_active_products() {
    let t = setup().await;
    let visible = t.seed_product("signal-jammer-pouch", 3500, 2);
    let hidden = t.seed_product("discontinued", 100, 0);
    {
        let conn = t.state.db.get().unwrap();
        queries::set_product_active(&conn, &hidden.id, false).unwrap();
    }

    let (status, products) = t.call("GET", "/api/products", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let slugs: Vec<&str> = products
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["slug"].as_str().unwrap())
        .collect();
    assert_eq!(slugs, vec!["signal-jammer-pouch"]);

    let (status, product) = t
        .call("GET", "/api/products/signal-jammer-pouch", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(product["id"], visible.id.as_str());
    assert_eq!(product["price_cents"], 3500);
}

#[tokio::test]
async fn test_rates_are_live_then_cached() {
    let t = setup().await;

    let (status, first) = t.call("GET", "/api/payments/rates", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["rates"][0]["coin"], "BTC");
    assert_eq!(first["rates"][0]["usd"], BTC_USD);
    assert_eq!(first["rates"][0]["source"], "live");

    let (_, second) = t.call("GET", "/api/payments/rates", None, None).await;
    assert_eq!(second["rates"][0]["source"], "cached");
    assert_eq!(second["rates"][1]["coin"], "XMR");
    assert_eq!(second["rates"][1]["source"], "cached");
}
