//! Payment state machine, amount tolerance and provider status tables.

use crate::models::{CryptoCurrency, GatewaySettings, PaymentStatus};

impl PaymentStatus {
    /// Failed and refunded payments never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Failed | PaymentStatus::Refunded)
    }

    /// Whether a payment in this state may move to `next`.
    /// Re-reporting the current state is always allowed.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;

        if *self == next {
            return true;
        }
        match self {
            Pending => matches!(
                next,
                AwaitingConfirmation | Completed | Underpaid | Expired | Failed
            ),
            AwaitingConfirmation => matches!(next, Completed | Underpaid | Failed),
            Underpaid => matches!(
                next,
                AwaitingConfirmation | Completed | Expired | Failed | Refunded
            ),
            // Funds that arrive after the window closed are still credited
            Expired => matches!(next, AwaitingConfirmation | Completed | Underpaid),
            // Settled funds only move again when the provider hands them back
            Completed => matches!(next, Refunded),
            Failed | Refunded => false,
        }
    }
}

/// `received` covers `expected` minus the tolerated shortfall (basis points).
pub fn is_amount_sufficient(expected: i64, received: i64, tolerance_bps: i64) -> bool {
    let tolerance = tolerance_bps.clamp(0, 10_000) as i128;
    (received as i128) * 10_000 >= (expected as i128) * (10_000 - tolerance)
}

/// Derive a crypto payment's status from what the chain has shown so far.
pub fn resolve_crypto_status(
    expected: i64,
    received: i64,
    confirmations: i64,
    settings: &GatewaySettings,
) -> PaymentStatus {
    if received <= 0 {
        PaymentStatus::Pending
    } else if confirmations < settings.required_confirmations {
        PaymentStatus::AwaitingConfirmation
    } else if is_amount_sufficient(expected, received, settings.underpayment_tolerance_bps) {
        PaymentStatus::Completed
    } else {
        PaymentStatus::Underpaid
    }
}

/// Blockonomics callback status: 0 unconfirmed, 1 partially confirmed, 2 confirmed.
/// Returns the confirmation count it stands for.
pub fn blockonomics_confirmations(status: i64) -> Option<i64> {
    match status {
        0 => Some(0),
        1 => Some(1),
        2 => Some(2),
        _ => None,
    }
}

const NOWPAYMENTS_STATUSES: &[(&str, PaymentStatus)] = &[
    ("waiting", PaymentStatus::Pending),
    ("confirming", PaymentStatus::AwaitingConfirmation),
    ("confirmed", PaymentStatus::AwaitingConfirmation),
    ("sending", PaymentStatus::AwaitingConfirmation),
    ("partially_paid", PaymentStatus::Underpaid),
    ("finished", PaymentStatus::Completed),
    ("failed", PaymentStatus::Failed),
    ("refunded", PaymentStatus::Refunded),
    ("expired", PaymentStatus::Expired),
];

pub fn nowpayments_status(status: &str) -> Option<PaymentStatus> {
    NOWPAYMENTS_STATUSES
        .iter()
        .find(|(name, _)| *name == status)
        .map(|(_, s)| *s)
}

const PAYPAL_EVENTS: &[(&str, PaymentStatus)] = &[
    ("CHECKOUT.ORDER.APPROVED", PaymentStatus::AwaitingConfirmation),
    ("PAYMENT.CAPTURE.PENDING", PaymentStatus::AwaitingConfirmation),
    ("PAYMENT.CAPTURE.COMPLETED", PaymentStatus::Completed),
    ("PAYMENT.CAPTURE.DENIED", PaymentStatus::Failed),
    ("PAYMENT.CAPTURE.REFUNDED", PaymentStatus::Refunded),
    ("PAYMENT.CAPTURE.REVERSED", PaymentStatus::Refunded),
];

pub fn paypal_event_status(event_type: &str) -> Option<PaymentStatus> {
    PAYPAL_EVENTS
        .iter()
        .find(|(name, _)| *name == event_type)
        .map(|(_, s)| *s)
}

/// Status after a capture call. A completed capture for less than the
/// order total is treated as underpaid.
pub fn paypal_capture_status(
    capture_status: Option<&str>,
    captured_cents: Option<i64>,
    expected_cents: i64,
) -> PaymentStatus {
    match capture_status {
        Some("COMPLETED") => match captured_cents {
            Some(cents) if cents >= expected_cents => PaymentStatus::Completed,
            _ => PaymentStatus::Underpaid,
        },
        Some("DECLINED") | Some("FAILED") => PaymentStatus::Failed,
        _ => PaymentStatus::AwaitingConfirmation,
    }
}

/// Crypto amount in atomic units for a fiat price, rounded up so the
/// merchant never receives less than the quoted price.
pub fn cents_to_atomic(cents: i64, usd_per_coin: f64, coin: CryptoCurrency) -> Option<i64> {
    if cents <= 0 || !usd_per_coin.is_finite() || usd_per_coin <= 0.0 {
        return None;
    }
    let atomic = ((cents as f64 * coin.atomic_per_coin() as f64) / (usd_per_coin * 100.0)).ceil();
    (atomic.is_finite() && atomic < i64::MAX as f64).then_some(atomic as i64)
}

/// Parse a decimal coin amount ("0.00123", "1e-5") into atomic units.
pub fn decimal_to_atomic(amount: &str, coin: CryptoCurrency) -> Option<i64> {
    let amount = amount.trim();
    let (mantissa, exponent) = match amount.split_once(|c: char| c == 'e' || c == 'E') {
        Some((m, e)) => (m, e.parse::<i64>().ok()?),
        None => (amount, 0),
    };
    let (whole, frac) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    if whole.is_empty() && frac.is_empty() {
        return None;
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    // Index in `digits` where atomic units end; digits beyond it are dropped
    let digits = format!("{}{}", whole, frac);
    let cut = whole.len() as i64 + exponent.clamp(-64, 64) + coin.decimals() as i64;
    if cut <= 0 {
        return Some(0);
    }
    let cut = cut as usize;
    let mut atomic: String = digits.chars().take(cut).collect();
    while atomic.len() < cut {
        atomic.push('0');
    }
    let atomic = atomic.trim_start_matches('0');
    if atomic.is_empty() {
        return Some(0);
    }
    atomic.parse().ok()
}

/// Render atomic units as a decimal coin amount without trailing zeros.
pub fn format_atomic(atomic: i64, coin: CryptoCurrency) -> String {
    let per_coin = coin.atomic_per_coin();
    let whole = atomic / per_coin;
    let frac = (atomic % per_coin).abs();
    if frac == 0 {
        return whole.to_string();
    }
    let frac = format!("{:0width$}", frac, width = coin.decimals() as usize);
    format!("{}.{}", whole, frac.trim_end_matches('0'))
}

/// Fiat cents as a two-decimal string ("12.50").
pub fn format_cents(cents: i64) -> String {
    format!("{}.{:02}", cents / 100, cents % 100)
}

/// Parse a provider amount such as "12.5" or "12.50" into cents.
pub fn parse_cents(amount: &str) -> Option<i64> {
    let amount = amount.trim();
    let (whole, frac) = amount.split_once('.').unwrap_or((amount, ""));
    if whole.is_empty() || frac.len() > 2 {
        return None;
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let whole: i64 = whole.parse().ok()?;
    let frac: i64 = format!("{:0<2}", frac).parse().ok()?;
    whole.checked_mul(100)?.checked_add(frac)
}
