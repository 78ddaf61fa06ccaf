use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params, types::Value};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::*;

use super::from_row::{
    CART_LINE_COLS, GATEWAY_COLS, ORDER_COLS, ORDER_ITEM_COLS, PAYMENT_COLS, PRODUCT_COLS,
    USER_COLS, query_all, query_one,
};

pub fn now() -> i64 {
    Utc::now().timestamp()
}

fn gen_id() -> String {
    Uuid::new_v4().to_string()
}

/// Builder for dynamic UPDATE statements with optional fields.
/// Combines multiple field updates into a single query.
struct UpdateBuilder {
    table: &'static str,
    key_column: &'static str,
    key: String,
    fields: Vec<(&'static str, Value)>,
    track_updated_at: bool,
}

impl UpdateBuilder {
    fn new(table: &'static str, key: &str) -> Self {
        Self::keyed(table, "id", key)
    }

    fn keyed(table: &'static str, key_column: &'static str, key: &str) -> Self {
        Self {
            table,
            key_column,
            key: key.to_string(),
            fields: Vec::new(),
            track_updated_at: false,
        }
    }

    fn with_updated_at(mut self) -> Self {
        self.track_updated_at = true;
        self
    }

    fn set(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.fields.push((column, value.into()));
        self
    }

    fn set_opt<V: Into<Value>>(self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.set(column, v),
            None => self,
        }
    }

    fn execute(mut self, conn: &Connection) -> Result<bool> {
        if self.fields.is_empty() {
            return Ok(false);
        }
        if self.track_updated_at {
            self.fields.push(("updated_at", now().into()));
        }
        let sets: Vec<String> = self
            .fields
            .iter()
            .map(|(col, _)| format!("{} = ?", col))
            .collect();
        let mut values: Vec<Value> = self.fields.into_iter().map(|(_, v)| v).collect();
        values.push(self.key.into());
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?",
            self.table,
            sets.join(", "),
            self.key_column
        );
        let affected = conn.execute(&sql, rusqlite::params_from_iter(values))?;
        Ok(affected > 0)
    }
}

// ============ Users ============

pub fn create_user(
    conn: &Connection,
    email: &str,
    name: &str,
    password_hash: &str,
    role: UserRole,
) -> Result<User> {
    let id = gen_id();
    let now = now();

    let inserted = conn.execute(
        "INSERT OR IGNORE INTO users (id, email, name, role, password_hash, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![&id, email, name, role.as_ref(), password_hash, now],
    )?;
    if inserted == 0 {
        return Err(AppError::Conflict("An account with this email already exists".into()));
    }

    Ok(User {
        id,
        email: email.to_string(),
        name: name.to_string(),
        role,
        password_hash: password_hash.to_string(),
        created_at: now,
    })
}

pub fn get_user_by_id(conn: &Connection, id: &str) -> Result<Option<User>> {
    query_one(
        conn,
        &format!("SELECT {} FROM users WHERE id = ?1", USER_COLS),
        params![id],
    )
}

pub fn get_user_by_email(conn: &Connection, email: &str) -> Result<Option<User>> {
    query_one(
        conn,
        &format!("SELECT {} FROM users WHERE email = ?1", USER_COLS),
        params![email.trim()],
    )
}

// ============ Products ============

pub fn create_product(conn: &Connection, input: &CreateProduct) -> Result<Product> {
    let id = gen_id();
    let now = now();
    let currency = input.currency.clone().unwrap_or_else(|| "USD".to_string());

    conn.execute(
        "INSERT INTO products (id, slug, name, description, price_cents, currency, stock, active, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8, ?8)",
        params![
            &id,
            &input.slug,
            &input.name,
            &input.description,
            input.price_cents,
            &currency,
            input.stock,
            now
        ],
    )?;

    Ok(Product {
        id,
        slug: input.slug.clone(),
        name: input.name.clone(),
        description: input.description.clone(),
        price_cents: input.price_cents,
        currency,
        stock: input.stock,
        active: true,
        created_at: now,
        updated_at: now,
    })
}

pub fn get_product_by_id(conn: &Connection, id: &str) -> Result<Option<Product>> {
    query_one(
        conn,
        &format!("SELECT {} FROM products WHERE id = ?1", PRODUCT_COLS),
        params![id],
    )
}

pub fn get_product_by_slug(conn: &Connection, slug: &str) -> Result<Option<Product>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM products WHERE slug = ?1 AND active = 1",
            PRODUCT_COLS
        ),
        params![slug],
    )
}

pub fn list_active_products(conn: &Connection) -> Result<Vec<Product>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM products WHERE active = 1 ORDER BY name",
            PRODUCT_COLS
        ),
        params![],
    )
}

pub fn set_product_active(conn: &Connection, id: &str, active: bool) -> Result<bool> {
    UpdateBuilder::new("products", id)
        .with_updated_at()
        .set("active", active as i32)
        .execute(conn)
}

// ============ Cart ============

pub fn get_cart(conn: &Connection, user_id: &str) -> Result<Cart> {
    let lines = query_all(
        conn,
        &format!(
            "SELECT {} FROM cart_items c
             JOIN products p ON p.id = c.product_id
             WHERE c.user_id = ?1 AND p.active = 1
             ORDER BY c.added_at, p.name",
            CART_LINE_COLS
        ),
        params![user_id],
    )?;
    Ok(Cart::from_lines(lines))
}

/// Add `quantity` units of a product, merging with an existing line.
pub fn add_cart_item(conn: &Connection, user_id: &str, product_id: &str, quantity: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO cart_items (user_id, product_id, quantity, added_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (user_id, product_id) DO UPDATE SET quantity = quantity + excluded.quantity",
        params![user_id, product_id, quantity, now()],
    )?;
    Ok(())
}

pub fn get_cart_quantity(conn: &Connection, user_id: &str, product_id: &str) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT quantity FROM cart_items WHERE user_id = ?1 AND product_id = ?2",
            params![user_id, product_id],
            |row| row.get(0),
        )
        .optional()?)
}

pub fn set_cart_item_quantity(
    conn: &Connection,
    user_id: &str,
    product_id: &str,
    quantity: i64,
) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE cart_items SET quantity = ?1 WHERE user_id = ?2 AND product_id = ?3",
        params![quantity, user_id, product_id],
    )?;
    Ok(updated > 0)
}

pub fn remove_cart_item(conn: &Connection, user_id: &str, product_id: &str) -> Result<bool> {
    let deleted = conn.execute(
        "DELETE FROM cart_items WHERE user_id = ?1 AND product_id = ?2",
        params![user_id, product_id],
    )?;
    Ok(deleted > 0)
}

pub fn clear_cart(conn: &Connection, user_id: &str) -> Result<usize> {
    Ok(conn.execute("DELETE FROM cart_items WHERE user_id = ?1", params![user_id])?)
}

// ============ Orders ============

/// Result of a checkout attempt.
pub struct CheckoutOutcome {
    pub order: OrderWithItems,
    /// False when an earlier request with the same idempotency key already created it
    pub created: bool,
}

/// Turn the user's cart into an order.
///
/// Runs in an IMMEDIATE transaction so concurrent checkouts from the same cart
/// serialize: the first one empties the cart, the second finds nothing to buy.
/// Stock is decremented with a guarded UPDATE, never below zero.
pub fn create_order_from_cart(conn: &mut Connection, input: &CreateOrder) -> Result<CheckoutOutcome> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    if let Some(key) = &input.idempotency_key {
        let existing: Option<Order> = query_one(
            &tx,
            &format!(
                "SELECT {} FROM orders WHERE user_id = ?1 AND idempotency_key = ?2",
                ORDER_COLS
            ),
            params![&input.user_id, key],
        )?;
        if let Some(order) = existing {
            let items = list_order_items(&tx, &order.id)?;
            return Ok(CheckoutOutcome {
                order: OrderWithItems {
                    order,
                    items,
                    payments: Vec::new(),
                },
                created: false,
            });
        }
    }

    let cart = get_cart(&tx, &input.user_id)?;
    if cart.is_empty() {
        return Err(AppError::BadRequest("Cart is empty".into()));
    }

    for line in &cart.items {
        let updated = tx.execute(
            "UPDATE products SET stock = stock - ?1, updated_at = ?2
             WHERE id = ?3 AND stock >= ?1",
            params![line.quantity, now(), &line.product_id],
        )?;
        if updated == 0 {
            // Dropping the transaction rolls back earlier decrements
            return Err(AppError::Conflict(format!(
                "Insufficient stock for {} ({} available)",
                line.name, line.available
            )));
        }
    }

    let id = gen_id();
    let now = now();
    let shipping = serde_json::to_string(&input.shipping_address)?;

    tx.execute(
        "INSERT INTO orders (id, user_id, email, status, payment_status, payment_method, total_cents, currency, shipping_address, idempotency_key, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
        params![
            &id,
            &input.user_id,
            &input.email,
            OrderStatus::Pending.as_ref(),
            PaymentStatus::Pending.as_ref(),
            input.payment_method.as_ref(),
            cart.total_cents,
            &cart.currency,
            &shipping,
            &input.idempotency_key,
            now
        ],
    )?;

    let mut items = Vec::with_capacity(cart.items.len());
    for line in &cart.items {
        let item = OrderItem {
            id: gen_id(),
            order_id: id.clone(),
            product_id: line.product_id.clone(),
            name: line.name.clone(),
            unit_price_cents: line.unit_price_cents,
            quantity: line.quantity,
        };
        tx.execute(
            "INSERT INTO order_items (id, order_id, product_id, name, unit_price_cents, quantity)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                &item.id,
                &item.order_id,
                &item.product_id,
                &item.name,
                item.unit_price_cents,
                item.quantity
            ],
        )?;
        items.push(item);
    }

    clear_cart(&tx, &input.user_id)?;
    tx.commit()?;

    Ok(CheckoutOutcome {
        order: OrderWithItems {
            order: Order {
                id,
                user_id: input.user_id.clone(),
                email: input.email.clone(),
                status: OrderStatus::Pending,
                payment_status: PaymentStatus::Pending,
                payment_method: input.payment_method,
                total_cents: cart.total_cents,
                currency: cart.currency,
                shipping_address: input.shipping_address.clone(),
                payment_details: None,
                idempotency_key: input.idempotency_key.clone(),
                created_at: now,
                updated_at: now,
                paid_at: None,
            },
            items,
            payments: Vec::new(),
        },
        created: true,
    })
}

pub fn get_order_by_id(conn: &Connection, id: &str) -> Result<Option<Order>> {
    query_one(
        conn,
        &format!("SELECT {} FROM orders WHERE id = ?1", ORDER_COLS),
        params![id],
    )
}

/// Fetch an order only if it belongs to `user_id`.
pub fn get_order_for_user(conn: &Connection, id: &str, user_id: &str) -> Result<Option<Order>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM orders WHERE id = ?1 AND user_id = ?2",
            ORDER_COLS
        ),
        params![id, user_id],
    )
}

pub fn list_orders_for_user(conn: &Connection, user_id: &str) -> Result<Vec<Order>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM orders WHERE user_id = ?1 ORDER BY created_at DESC",
            ORDER_COLS
        ),
        params![user_id],
    )
}

pub fn list_orders_paginated(
    conn: &Connection,
    payment_status: Option<PaymentStatus>,
    limit: i64,
    offset: i64,
) -> Result<(Vec<Order>, i64)> {
    let status = payment_status.map(|s| s.as_ref().to_string());
    let total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM orders WHERE ?1 IS NULL OR payment_status = ?1",
        params![&status],
        |row| row.get(0),
    )?;
    let items = query_all(
        conn,
        &format!(
            "SELECT {} FROM orders WHERE ?1 IS NULL OR payment_status = ?1
             ORDER BY created_at DESC LIMIT ?2 OFFSET ?3",
            ORDER_COLS
        ),
        params![&status, limit, offset],
    )?;
    Ok((items, total))
}

pub fn list_order_items(conn: &Connection, order_id: &str) -> Result<Vec<OrderItem>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM order_items WHERE order_id = ?1 ORDER BY name",
            ORDER_ITEM_COLS
        ),
        params![order_id],
    )
}

pub fn load_order_details(conn: &Connection, order: Order) -> Result<OrderWithItems> {
    let items = list_order_items(conn, &order.id)?;
    let payments = list_payments_for_order(conn, &order.id)?;
    Ok(OrderWithItems {
        order,
        items,
        payments,
    })
}

pub fn set_order_payment_details(
    conn: &Connection,
    order_id: &str,
    details: Option<&PaymentDetails>,
) -> Result<bool> {
    let value = match details {
        Some(d) => Value::Text(serde_json::to_string(d)?),
        None => Value::Null,
    };
    UpdateBuilder::new("orders", order_id)
        .with_updated_at()
        .set("payment_details", value)
        .execute(conn)
}

/// Switch an order to a new payment attempt.
pub fn reset_order_payment(conn: &Connection, order_id: &str, method: PaymentMethod) -> Result<bool> {
    UpdateBuilder::new("orders", order_id)
        .with_updated_at()
        .set("payment_method", method.as_ref().to_string())
        .set("payment_status", PaymentStatus::Pending.as_ref().to_string())
        .set("payment_details", Value::Null)
        .execute(conn)
}

/// Mirror a payment status onto its order. Completed payments mark the order paid,
/// refunds close it as refunded. Otherwise only pending orders are touched.
pub fn mirror_payment_status(
    conn: &Connection,
    order_id: &str,
    method: PaymentMethod,
    status: PaymentStatus,
) -> Result<bool> {
    let now = now();
    let updated = match status {
        PaymentStatus::Completed => conn.execute(
            "UPDATE orders SET payment_status = ?1, payment_method = ?2, status = ?3, paid_at = ?4, updated_at = ?4
             WHERE id = ?5 AND status = ?6",
            params![
                status.as_ref(),
                method.as_ref(),
                OrderStatus::Paid.as_ref(),
                now,
                order_id,
                OrderStatus::Pending.as_ref()
            ],
        )?,
        PaymentStatus::Refunded => conn.execute(
            "UPDATE orders SET payment_status = ?1, status = ?2, updated_at = ?3
             WHERE id = ?4 AND status IN (?5, ?6)",
            params![
                status.as_ref(),
                OrderStatus::Refunded.as_ref(),
                now,
                order_id,
                OrderStatus::Pending.as_ref(),
                OrderStatus::Paid.as_ref()
            ],
        )?,
        _ => conn.execute(
            "UPDATE orders SET payment_status = ?1, updated_at = ?2
             WHERE id = ?3 AND status = ?4",
            params![status.as_ref(), now, order_id, OrderStatus::Pending.as_ref()],
        )?,
    };
    Ok(updated > 0)
}

/// Cancel an unpaid order and put its items back in stock.
///
/// Refused once any payment attempt has seen funds, since those need a refund
/// rather than a cancellation.
pub fn cancel_order(conn: &mut Connection, order_id: &str) -> Result<bool> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    if list_payments_for_order(&tx, order_id)?
        .iter()
        .any(|p| p.funds_observed() || p.status == PaymentStatus::Completed)
    {
        return Err(AppError::Conflict(
            "Funds were received for this order; it cannot be cancelled".into(),
        ));
    }

    let cancelled = tx.execute(
        "UPDATE orders SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
        params![
            OrderStatus::Cancelled.as_ref(),
            now(),
            order_id,
            OrderStatus::Pending.as_ref()
        ],
    )?;
    if cancelled == 0 {
        return Ok(false);
    }

    for item in list_order_items(&tx, order_id)? {
        tx.execute(
            "UPDATE products SET stock = stock + ?1, updated_at = ?2 WHERE id = ?3",
            params![item.quantity, now(), &item.product_id],
        )?;
    }

    tx.execute(
        "UPDATE payments SET status = ?1, updated_at = ?2 WHERE order_id = ?3 AND status = ?4",
        params![
            PaymentStatus::Expired.as_ref(),
            now(),
            order_id,
            PaymentStatus::Pending.as_ref()
        ],
    )?;

    tx.commit()?;
    Ok(true)
}

#[derive(Debug, serde::Serialize)]
pub struct PaymentStatusCount {
    pub payment_status: PaymentStatus,
    pub orders: i64,
}

#[derive(Debug, serde::Serialize)]
pub struct SalesSummary {
    pub by_payment_status: Vec<PaymentStatusCount>,
    pub paid_orders: i64,
    pub revenue_cents: i64,
}

pub fn sales_summary(conn: &Connection) -> Result<SalesSummary> {
    let mut stmt = conn.prepare(
        "SELECT payment_status, COUNT(*) FROM orders GROUP BY payment_status ORDER BY payment_status",
    )?;
    let rows = stmt.query_map(params![], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;

    let mut by_payment_status = Vec::new();
    for row in rows {
        let (status, orders) = row?;
        match status.parse() {
            Ok(payment_status) => by_payment_status.push(PaymentStatusCount {
                payment_status,
                orders,
            }),
            Err(_) => tracing::warn!("Unknown payment_status in orders table: {}", status),
        }
    }

    let (paid_orders, revenue_cents): (i64, i64) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(total_cents), 0) FROM orders WHERE status = ?1",
        params![OrderStatus::Paid.as_ref()],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    Ok(SalesSummary {
        by_payment_status,
        paid_orders,
        revenue_cents,
    })
}

// ============ Payments ============

pub fn insert_payment(
    conn: &Connection,
    order: &Order,
    method: PaymentMethod,
    expires_at: Option<i64>,
) -> Result<Payment> {
    let id = gen_id();
    let now = now();
    let crypto_currency = method.crypto_currency();

    conn.execute(
        "INSERT INTO payments (id, order_id, method, status, amount_cents, currency, crypto_currency, expires_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
        params![
            &id,
            &order.id,
            method.as_ref(),
            PaymentStatus::Pending.as_ref(),
            order.total_cents,
            &order.currency,
            crypto_currency.map(|c| c.as_ref().to_string()),
            expires_at,
            now
        ],
    )?;

    Ok(Payment {
        id,
        order_id: order.id.clone(),
        method,
        status: PaymentStatus::Pending,
        amount_cents: order.total_cents,
        currency: order.currency.clone(),
        crypto_currency,
        expected_atomic: None,
        received_atomic: None,
        exchange_rate: None,
        address: None,
        provider_ref: None,
        txid: None,
        confirmations: 0,
        expires_at,
        created_at: now,
        updated_at: now,
        completed_at: None,
    })
}

pub fn get_payment_by_id(conn: &Connection, id: &str) -> Result<Option<Payment>> {
    query_one(
        conn,
        &format!("SELECT {} FROM payments WHERE id = ?1", PAYMENT_COLS),
        params![id],
    )
}

pub fn get_payment_by_address(conn: &Connection, address: &str) -> Result<Option<Payment>> {
    query_one(
        conn,
        &format!("SELECT {} FROM payments WHERE address = ?1", PAYMENT_COLS),
        params![address],
    )
}

pub fn get_payment_by_provider_ref(
    conn: &Connection,
    method: PaymentMethod,
    provider_ref: &str,
) -> Result<Option<Payment>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM payments WHERE method = ?1 AND provider_ref = ?2",
            PAYMENT_COLS
        ),
        params![method.as_ref(), provider_ref],
    )
}

pub fn list_payments_for_order(conn: &Connection, order_id: &str) -> Result<Vec<Payment>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM payments WHERE order_id = ?1 ORDER BY created_at DESC, rowid DESC",
            PAYMENT_COLS
        ),
        params![order_id],
    )
}

pub fn latest_payment_for_order(conn: &Connection, order_id: &str) -> Result<Option<Payment>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM payments WHERE order_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT 1",
            PAYMENT_COLS
        ),
        params![order_id],
    )
}

pub fn set_payment_instructions(
    conn: &Connection,
    payment_id: &str,
    instructions: &PaymentInstructions,
) -> Result<bool> {
    UpdateBuilder::new("payments", payment_id)
        .with_updated_at()
        .set_opt(
            "crypto_currency",
            instructions.crypto_currency.map(|c| c.as_ref().to_string()),
        )
        .set_opt("expected_atomic", instructions.expected_atomic)
        .set_opt("exchange_rate", instructions.exchange_rate)
        .set_opt("address", instructions.address.clone())
        .set_opt("provider_ref", instructions.provider_ref.clone())
        .set_opt("expires_at", instructions.expires_at)
        .execute(conn)
}

/// Compare-and-swap a payment's status.
///
/// Returns `Ok(false)` when the row no longer has status `from`, meaning a
/// concurrent update won the race.
pub fn update_payment_status(
    conn: &Connection,
    payment_id: &str,
    from: PaymentStatus,
    to: PaymentStatus,
) -> Result<bool> {
    let now = now();
    let completed_at = matches!(to, PaymentStatus::Completed).then_some(now);
    let affected = conn.execute(
        "UPDATE payments SET status = ?1, updated_at = ?2, completed_at = COALESCE(completed_at, ?3)
         WHERE id = ?4 AND status = ?5",
        params![to.as_ref(), now, completed_at, payment_id, from.as_ref()],
    )?;
    Ok(affected > 0)
}

/// Record what the provider observed on-chain (or in its ledger).
pub fn update_payment_observation(
    conn: &Connection,
    payment_id: &str,
    received_atomic: Option<i64>,
    confirmations: Option<i64>,
    txid: Option<&str>,
) -> Result<bool> {
    UpdateBuilder::new("payments", payment_id)
        .with_updated_at()
        .set_opt("received_atomic", received_atomic)
        .set_opt("confirmations", confirmations)
        .set_opt("txid", txid.map(String::from))
        .execute(conn)
}

/// Payments that can still expire and whose window has closed.
pub fn list_expirable_payments(conn: &Connection, now: i64) -> Result<Vec<Payment>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM payments
             WHERE status IN (?1, ?2) AND expires_at IS NOT NULL AND expires_at < ?3
             ORDER BY expires_at",
            PAYMENT_COLS
        ),
        params![
            PaymentStatus::Pending.as_ref(),
            PaymentStatus::Underpaid.as_ref(),
            now
        ],
    )
}

// ============ Payment Gateways ============

pub fn get_gateway(conn: &Connection, provider: GatewayProvider) -> Result<Option<PaymentGateway>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM payment_gateways WHERE provider = ?1",
            GATEWAY_COLS
        ),
        params![provider.as_ref()],
    )
}

pub fn list_gateways(conn: &Connection) -> Result<Vec<PaymentGateway>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM payment_gateways ORDER BY provider",
            GATEWAY_COLS
        ),
        params![],
    )
}

/// Create the gateway row with provider defaults if it does not exist yet.
pub fn ensure_gateway(conn: &Connection, provider: GatewayProvider) -> Result<()> {
    let defaults = provider.defaults();
    conn.execute(
        "INSERT OR IGNORE INTO payment_gateways
         (provider, enabled, required_confirmations, payment_window_minutes, underpayment_tolerance_bps, updated_at)
         VALUES (?1, 0, ?2, ?3, ?4, ?5)",
        params![
            provider.as_ref(),
            defaults.required_confirmations,
            defaults.payment_window_minutes,
            defaults.underpayment_tolerance_bps,
            now()
        ],
    )?;
    Ok(())
}

pub fn update_gateway(
    conn: &Connection,
    provider: GatewayProvider,
    input: &UpdateGateway,
    credentials_encrypted: Option<Vec<u8>>,
) -> Result<bool> {
    ensure_gateway(conn, provider)?;
    UpdateBuilder::keyed("payment_gateways", "provider", provider.as_ref())
        .with_updated_at()
        .set_opt("enabled", input.enabled.map(|e| e as i32))
        .set_opt("required_confirmations", input.required_confirmations)
        .set_opt("payment_window_minutes", input.payment_window_minutes)
        .set_opt("underpayment_tolerance_bps", input.underpayment_tolerance_bps)
        .set_opt("credentials_encrypted", credentials_encrypted)
        .execute(conn)
}

// ============ Webhook Event Deduplication ============

/// Atomically record a webhook event, returning true if this is a new event.
/// Returns false if the event was already processed (replay or provider retry).
pub fn try_record_webhook_event(
    conn: &Connection,
    provider: GatewayProvider,
    event_id: &str,
) -> Result<bool> {
    let affected = conn.execute(
        "INSERT OR IGNORE INTO webhook_events (id, provider, event_id, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![gen_id(), provider.as_ref(), event_id, now()],
    )?;
    Ok(affected > 0)
}
