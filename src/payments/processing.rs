//! Payment lifecycle: reserving attempts, attaching provider data and
//! applying provider status updates atomically.

use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::db::queries;
use crate::error::{AppError, Result};
use crate::models::{
    GatewaySettings, Order, OrderStatus, Payment, PaymentDetails, PaymentInstructions,
    PaymentMethod, PaymentStatus, ProviderUpdate,
};

/// A reservation younger than this is assumed to be mid-setup in another request.
pub const RESERVATION_GRACE_SECS: i64 = 60;

#[derive(Debug)]
pub enum Reservation {
    /// The order already has a live payment for this method; reuse it.
    Existing(Payment),
    /// A new pending row without provider data. The caller must attach
    /// instructions or abandon it.
    Reserved(Payment),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied(PaymentStatus),
    /// Same status as before; observation fields refreshed
    Unchanged,
    /// The webhook event was processed before
    Duplicate,
    Rejected {
        from: PaymentStatus,
        to: PaymentStatus,
    },
}

fn is_live(status: PaymentStatus) -> bool {
    matches!(
        status,
        PaymentStatus::Pending | PaymentStatus::AwaitingConfirmation | PaymentStatus::Underpaid
    )
}

/// Start (or resume) a payment attempt for an order.
///
/// Runs in an IMMEDIATE transaction so two concurrent requests for the same
/// order cannot both create a payment.
pub fn reserve_payment(
    conn: &mut Connection,
    order_id: &str,
    user_id: &str,
    method: PaymentMethod,
    settings: &GatewaySettings,
    now: i64,
) -> Result<(Order, Reservation)> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let order = queries::get_order_for_user(&tx, order_id, user_id)?
        .ok_or_else(|| AppError::NotFound("Order not found".into()))?;

    match order.status {
        OrderStatus::Cancelled => return Err(AppError::Conflict("Order is cancelled".into())),
        OrderStatus::Paid => return Err(AppError::Conflict("Order is already paid".into())),
        OrderStatus::Refunded => return Err(AppError::Conflict("Order was refunded".into())),
        OrderStatus::Pending => {}
    }
    if order.payment_status == PaymentStatus::Completed {
        return Err(AppError::Conflict("Order is already paid".into()));
    }

    for payment in queries::list_payments_for_order(&tx, &order.id)? {
        if !is_live(payment.status) {
            continue;
        }

        let in_setup = payment.is_reserved() && now - payment.created_at < RESERVATION_GRACE_SECS;
        if in_setup {
            return Err(AppError::Conflict(
                "A payment for this order is already being set up".into(),
            ));
        }

        if payment.is_reserved() {
            // Setup died without attaching provider data
            queries::update_payment_status(&tx, &payment.id, payment.status, PaymentStatus::Failed)?;
            continue;
        }

        if payment.method == method {
            if payment.status == PaymentStatus::Pending && payment.is_past_expiry(now) {
                queries::update_payment_status(
                    &tx,
                    &payment.id,
                    PaymentStatus::Pending,
                    PaymentStatus::Expired,
                )?;
                continue;
            }
            tx.commit()?;
            return Ok((order, Reservation::Existing(payment)));
        }

        if payment.funds_observed() {
            return Err(AppError::Conflict(format!(
                "Funds were already received for this order via {}",
                payment.method.as_ref()
            )));
        }

        // Switching methods: the untouched attempt is retired
        queries::update_payment_status(&tx, &payment.id, payment.status, PaymentStatus::Expired)?;
        tracing::info!(
            "Payment {} superseded by a {} attempt for order {}",
            payment.id,
            method.as_ref(),
            order.id
        );
    }

    let expires_at = now + settings.payment_window_minutes * 60;
    let payment = queries::insert_payment(&tx, &order, method, Some(expires_at))?;
    queries::reset_order_payment(&tx, &order.id, method)?;
    tx.commit()?;

    Ok((order, Reservation::Reserved(payment)))
}

/// Store what the provider returned for a reserved payment and expose it on the order.
pub fn attach_instructions(
    conn: &mut Connection,
    payment: &Payment,
    instructions: &PaymentInstructions,
    details: &PaymentDetails,
) -> Result<Payment> {
    let tx = conn.transaction()?;
    queries::set_payment_instructions(&tx, &payment.id, instructions)?;
    queries::set_order_payment_details(&tx, &payment.order_id, Some(details))?;
    let updated = queries::get_payment_by_id(&tx, &payment.id)?
        .ok_or_else(|| AppError::NotFound("Payment not found".into()))?;
    tx.commit()?;
    Ok(updated)
}

/// Give up on a reservation after the provider call failed.
pub fn abandon_reservation(conn: &mut Connection, payment: &Payment) -> Result<()> {
    let tx = conn.transaction()?;
    if queries::update_payment_status(&tx, &payment.id, PaymentStatus::Pending, PaymentStatus::Failed)? {
        mirror_latest(&tx, payment, PaymentStatus::Failed)?;
    }
    tx.commit()?;
    Ok(())
}

/// Mirror a status onto the order, unless a newer attempt owns the order now.
fn mirror_latest(tx: &Transaction, payment: &Payment, status: PaymentStatus) -> Result<bool> {
    let is_latest = queries::latest_payment_for_order(tx, &payment.order_id)?
        .is_some_and(|latest| latest.id == payment.id);
    if !is_latest && !matches!(status, PaymentStatus::Completed | PaymentStatus::Refunded) {
        return Ok(false);
    }
    queries::mirror_payment_status(tx, &payment.order_id, payment.method, status)
}

/// Apply a provider-reported status change.
///
/// Event deduplication, the transition check, the payment update and the
/// order mirror all happen in one transaction. A rejected transition still
/// records the event so the provider's retries are acknowledged.
pub fn apply_provider_update(conn: &mut Connection, update: &ProviderUpdate) -> Result<UpdateOutcome> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    if let Some((provider, event_id)) = &update.event
        && !queries::try_record_webhook_event(&tx, *provider, event_id)?
    {
        return Ok(UpdateOutcome::Duplicate);
    }

    let payment = queries::get_payment_by_id(&tx, &update.payment_id)?
        .ok_or_else(|| AppError::NotFound("Payment not found".into()))?;

    if !payment.status.can_transition_to(update.status) {
        tx.commit()?;
        tracing::warn!(
            "Ignoring {} -> {} for payment {}",
            payment.status.as_ref(),
            update.status.as_ref(),
            payment.id
        );
        return Ok(UpdateOutcome::Rejected {
            from: payment.status,
            to: update.status,
        });
    }

    queries::update_payment_observation(
        &tx,
        &payment.id,
        update.received_atomic,
        update.confirmations,
        update.txid.as_deref(),
    )?;

    if payment.status == update.status {
        tx.commit()?;
        return Ok(UpdateOutcome::Unchanged);
    }

    if !queries::update_payment_status(&tx, &payment.id, payment.status, update.status)? {
        return Err(AppError::Conflict("Payment changed concurrently".into()));
    }

    if !mirror_latest(&tx, &payment, update.status)? {
        let order = queries::get_order_by_id(&tx, &payment.order_id)?;
        match order {
            Some(order) if order.status != OrderStatus::Pending => tracing::warn!(
                "Payment {} for {} order {} is now {}",
                payment.id,
                order.status.as_ref(),
                order.id,
                update.status.as_ref()
            ),
            _ => {}
        }
    }

    tx.commit()?;
    tracing::info!(
        "Payment {} for order {}: {} -> {}",
        payment.id,
        payment.order_id,
        payment.status.as_ref(),
        update.status.as_ref()
    );
    Ok(UpdateOutcome::Applied(update.status))
}

/// Note the PayPal capture id on the order's payment details.
pub fn record_paypal_capture(conn: &Connection, order_id: &str, capture: &str) -> Result<()> {
    let Some(order) = queries::get_order_by_id(conn, order_id)? else {
        return Ok(());
    };
    if let Some(PaymentDetails::PayPal {
        paypal_order_id,
        approve_url,
        capture_id,
    }) = order.payment_details
        && capture_id.as_deref() != Some(capture)
    {
        let details = PaymentDetails::PayPal {
            paypal_order_id,
            approve_url,
            capture_id: Some(capture.to_string()),
        };
        queries::set_order_payment_details(conn, order_id, Some(&details))?;
    }
    Ok(())
}

fn expire_in(tx: &Transaction, payment: &Payment) -> Result<bool> {
    if !queries::update_payment_status(tx, &payment.id, payment.status, PaymentStatus::Expired)? {
        return Ok(false);
    }
    mirror_latest(tx, payment, PaymentStatus::Expired)?;
    Ok(true)
}

/// Expire every pending or underpaid payment whose window has closed.
pub fn expire_stale_payments(conn: &mut Connection, now: i64) -> Result<usize> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let mut expired = 0;
    for payment in queries::list_expirable_payments(&tx, now)? {
        if expire_in(&tx, &payment)? {
            expired += 1;
        }
    }
    tx.commit()?;
    if expired > 0 {
        tracing::info!("Expired {} stale payments", expired);
    }
    Ok(expired)
}

/// Expire one payment if its window has closed. Returns the current row.
pub fn expire_if_due(conn: &mut Connection, payment: Payment, now: i64) -> Result<Payment> {
    let expirable = matches!(payment.status, PaymentStatus::Pending | PaymentStatus::Underpaid);
    if !expirable || !payment.is_past_expiry(now) {
        return Ok(payment);
    }
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    expire_in(&tx, &payment)?;
    let current = queries::get_payment_by_id(&tx, &payment.id)?
        .ok_or_else(|| AppError::NotFound("Payment not found".into()))?;
    tx.commit()?;
    Ok(current)
}
