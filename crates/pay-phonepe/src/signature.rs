//! # X-VERIFY Signatures
//!
//! PhonePe authenticates every call with a checksum header:
//!
//! ```text
//! hex(sha256(<canonical input> + <salt key>)) + "###" + <salt index>
//! ```
//!
//! | operation | canonical input                              |
//! |-----------|----------------------------------------------|
//! | pay       | `base64(json payload) + "/pg/v1/pay"`        |
//! | status    | `"/pg/v1/status/{merchant_id}/{txn_id}"`     |
//! | callback  | `base64 response` (no path)                  |
//!
//! The gateway recomputes the digest and rejects any mismatch, so the
//! concatenation order is fixed.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use pay_core::{PaymentError, PaymentResult};
use sha2::{Digest, Sha256};

pub const PAY_PATH: &str = "/pg/v1/pay";
pub const STATUS_PATH: &str = "/pg/v1/status";

/// Separator between digest and salt index
const SALT_SEPARATOR: &str = "###";

/// Base64 form of a JSON payload, as sent in `{"request": ...}`
pub fn encode_payload(payload_bytes: &[u8]) -> String {
    BASE64.encode(payload_bytes)
}

/// X-VERIFY for a pay request carrying `payload_bytes` (raw JSON)
pub fn sign(payload_bytes: &[u8], salt: &str, salt_index: u32) -> String {
    let encoded = encode_payload(payload_bytes);
    checksum(&format!("{}{}", encoded, PAY_PATH), salt, salt_index)
}

/// Path the status call is made on
pub fn status_path(merchant_id: &str, transaction_id: &str) -> String {
    format!("{}/{}/{}", STATUS_PATH, merchant_id, transaction_id)
}

/// X-VERIFY for a status check of `transaction_id`
pub fn verify_for_status_path(
    merchant_id: &str,
    transaction_id: &str,
    salt: &str,
    salt_index: u32,
) -> String {
    checksum(&status_path(merchant_id, transaction_id), salt, salt_index)
}

/// X-VERIFY PhonePe attaches to a server-to-server callback
pub fn sign_callback(encoded_response: &str, salt: &str, salt_index: u32) -> String {
    checksum(encoded_response, salt, salt_index)
}

/// Check a callback's X-VERIFY header against its base64 `response` field
pub fn verify_callback(
    encoded_response: &str,
    header: &str,
    salt: &str,
    salt_index: u32,
) -> PaymentResult<()> {
    let expected = sign_callback(encoded_response, salt, salt_index);
    if constant_time_compare(header.trim(), &expected) {
        Ok(())
    } else {
        Err(PaymentError::Authentication(
            "Callback signature mismatch".to_string(),
        ))
    }
}

fn checksum(input: &str, salt: &str, salt_index: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hasher.update(salt.as_bytes());
    format!(
        "{}{}{}",
        hex::encode(hasher.finalize()),
        SALT_SEPARATOR,
        salt_index
    )
}

fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0, |acc, (x, y)| acc | (x ^ y))
        == 0
}
