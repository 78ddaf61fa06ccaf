//! Row mapping for query results.

use std::str::FromStr;

use rusqlite::{Connection, Params, Row, types::Type};
use serde::de::DeserializeOwned;

use crate::error::Result;
use crate::models::*;

pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

pub const USER_COLS: &str = "id, email, name, role, password_hash, created_at";

pub const PRODUCT_COLS: &str =
    "id, slug, name, description, price_cents, currency, stock, active, created_at, updated_at";

pub const CART_LINE_COLS: &str = "c.product_id, p.slug, p.name, p.price_cents, c.quantity, p.stock";

pub const ORDER_COLS: &str = "id, user_id, email, status, payment_status, payment_method, total_cents, currency, shipping_address, payment_details, idempotency_key, created_at, updated_at, paid_at";

pub const ORDER_ITEM_COLS: &str = "id, order_id, product_id, name, unit_price_cents, quantity";

pub const PAYMENT_COLS: &str = "id, order_id, method, status, amount_cents, currency, crypto_currency, expected_atomic, received_atomic, exchange_rate, address, provider_ref, txid, confirmations, expires_at, created_at, updated_at, completed_at";

pub const GATEWAY_COLS: &str = "provider, enabled, required_confirmations, payment_window_minutes, underpayment_tolerance_bps, credentials_encrypted, updated_at";

fn conversion_error(idx: usize, e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

/// Parse a strum-backed enum stored as TEXT.
fn parse_enum<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = strum::ParseError>,
{
    row.get::<_, String>(idx)?
        .parse()
        .map_err(|e| conversion_error(idx, e))
}

fn parse_enum_opt<T>(row: &Row, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr<Err = strum::ParseError>,
{
    row.get::<_, Option<String>>(idx)?
        .map(|s| s.parse().map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn parse_json<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn parse_json_opt<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<Option<T>> {
    row.get::<_, Option<String>>(idx)?
        .map(|raw| serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

impl FromRow for User {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(User {
            id: row.get(0)?,
            email: row.get(1)?,
            name: row.get(2)?,
            role: parse_enum(row, 3)?,
            password_hash: row.get(4)?,
            created_at: row.get(5)?,
        })
    }
}

impl FromRow for Product {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Product {
            id: row.get(0)?,
            slug: row.get(1)?,
            name: row.get(2)?,
            description: row.get(3)?,
            price_cents: row.get(4)?,
            currency: row.get(5)?,
            stock: row.get(6)?,
            active: row.get::<_, i32>(7)? != 0,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }
}

impl FromRow for CartLine {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let unit_price_cents: i64 = row.get(3)?;
        let quantity: i64 = row.get(4)?;
        Ok(CartLine {
            product_id: row.get(0)?,
            slug: row.get(1)?,
            name: row.get(2)?,
            unit_price_cents,
            quantity,
            line_total_cents: unit_price_cents * quantity,
            available: row.get(5)?,
        })
    }
}

impl FromRow for Order {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Order {
            id: row.get(0)?,
            user_id: row.get(1)?,
            email: row.get(2)?,
            status: parse_enum(row, 3)?,
            payment_status: parse_enum(row, 4)?,
            payment_method: parse_enum(row, 5)?,
            total_cents: row.get(6)?,
            currency: row.get(7)?,
            shipping_address: parse_json(row, 8)?,
            payment_details: parse_json_opt(row, 9)?,
            idempotency_key: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
            paid_at: row.get(13)?,
        })
    }
}

impl FromRow for OrderItem {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(OrderItem {
            id: row.get(0)?,
            order_id: row.get(1)?,
            product_id: row.get(2)?,
            name: row.get(3)?,
            unit_price_cents: row.get(4)?,
            quantity: row.get(5)?,
        })
    }
}

impl FromRow for Payment {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Payment {
            id: row.get(0)?,
            order_id: row.get(1)?,
            method: parse_enum(row, 2)?,
            status: parse_enum(row, 3)?,
            amount_cents: row.get(4)?,
            currency: row.get(5)?,
            crypto_currency: parse_enum_opt(row, 6)?,
            expected_atomic: row.get(7)?,
            received_atomic: row.get(8)?,
            exchange_rate: row.get(9)?,
            address: row.get(10)?,
            provider_ref: row.get(11)?,
            txid: row.get(12)?,
            confirmations: row.get(13)?,
            expires_at: row.get(14)?,
            created_at: row.get(15)?,
            updated_at: row.get(16)?,
            completed_at: row.get(17)?,
        })
    }
}

impl FromRow for PaymentGateway {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(PaymentGateway {
            provider: parse_enum(row, 0)?,
            enabled: row.get::<_, i32>(1)? != 0,
            settings: GatewaySettings {
                required_confirmations: row.get(2)?,
                payment_window_minutes: row.get(3)?,
                underpayment_tolerance_bps: row.get(4)?,
            },
            credentials_encrypted: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }
}

pub fn query_one<T: FromRow, P: Params>(conn: &Connection, sql: &str, params: P) -> Result<Option<T>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    match rows.next()? {
        Some(row) => Ok(Some(T::from_row(row)?)),
        None => Ok(None),
    }
}

pub fn query_all<T: FromRow, P: Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, |row| T::from_row(row))?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}
