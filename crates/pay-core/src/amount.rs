//! # Amounts
//!
//! All amounts inside the core are `i64` minor units (paise).
//! The HTTP boundary speaks major units and converts here.

use crate::error::{PaymentError, PaymentResult};

/// Minor units per major unit (paise per rupee)
pub const MINOR_PER_MAJOR: i64 = 100;

/// Convert a major-unit amount (e.g. `13.50`) to minor units (`1350`).
///
/// Rejects non-finite, non-positive and sub-paisa amounts.
pub fn from_major(amount: f64) -> PaymentResult<i64> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(PaymentError::Validation(format!(
            "Amount must be a positive number, got {}",
            amount
        )));
    }

    let scaled = amount * MINOR_PER_MAJOR as f64;
    let minor = scaled.round();
    if (scaled - minor).abs() > 1e-6 {
        return Err(PaymentError::Validation(format!(
            "Amount has more than two decimal places: {}",
            amount
        )));
    }
    if minor > i64::MAX as f64 {
        return Err(PaymentError::Validation("Amount is too large".to_string()));
    }

    Ok(minor as i64)
}

/// Convert minor units back to a major-unit float (for display and JSON)
pub fn to_major(minor: i64) -> f64 {
    minor as f64 / MINOR_PER_MAJOR as f64
}

/// Format for display (e.g., "₹13.50")
pub fn display(minor: i64) -> String {
    format!("₹{:.2}", to_major(minor))
}
