//! # Test Doubles
//!
//! A scripted `PaymentGateway` for exercising the state machine without a
//! network. Enabled for this crate's tests and for dependants through the
//! `test-util` feature.

use crate::error::{PaymentError, PaymentResult};
use crate::gateway::{
    CallbackNotice, PayRequest, PayResponse, PaymentGateway, ReportedState, StatusResponse,
};
use crate::memory::MemoryStore;
use crate::transaction::TransactionStatus;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Signature `ScriptedGateway::parse_callback` accepts
pub const VALID_CALLBACK_SIGNATURE: &str = "scripted-signature";

/// What the next pay call does
#[derive(Debug, Clone)]
pub enum PayScript {
    Redirect(String),
    Declined(String),
    Unrecognized,
    HttpError(u16),
}

/// What the next status call does
#[derive(Debug, Clone)]
pub enum StatusScript {
    Code(String),
    Unrecognized,
    Unreachable,
}

impl StatusScript {
    pub fn code(code: &str) -> Self {
        StatusScript::Code(code.to_string())
    }
}

/// Gateway whose answers are set by the test
pub struct ScriptedGateway {
    pay: Mutex<PayScript>,
    status: Mutex<StatusScript>,
    queued_status: Mutex<VecDeque<StatusScript>>,
    observer: Mutex<Option<Arc<MemoryStore>>>,
    observed_at_pay: Mutex<Vec<Option<TransactionStatus>>>,
    pay_calls: AtomicUsize,
    status_calls: AtomicUsize,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self {
            pay: Mutex::new(PayScript::Redirect(
                "https://pay.example.test/session".to_string(),
            )),
            status: Mutex::new(StatusScript::code("PAYMENT_PENDING")),
            queued_status: Mutex::new(VecDeque::new()),
            observer: Mutex::new(None),
            observed_at_pay: Mutex::new(Vec::new()),
            pay_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_pay(&self, script: PayScript) {
        *self.pay.lock().unwrap() = script;
    }

    pub fn set_status(&self, script: StatusScript) {
        *self.status.lock().unwrap() = script;
    }

    /// Answer the next status calls with `scripts`, in order, before
    /// falling back to the script set with `set_status`
    pub fn queue_status(&self, scripts: impl IntoIterator<Item = StatusScript>) {
        self.queued_status.lock().unwrap().extend(scripts);
    }

    /// Record the stored status of each transaction at the moment the
    /// pay call arrives
    pub fn observe(&self, store: Arc<MemoryStore>) {
        *self.observer.lock().unwrap() = Some(store);
    }

    pub fn observed_at_pay(&self) -> Vec<Option<TransactionStatus>> {
        self.observed_at_pay.lock().unwrap().clone()
    }

    pub fn pay_calls(&self) -> usize {
        self.pay_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedGateway {
    fn default() -> Self {
        Self::new()
    }
}

fn reported_state(code: &str) -> ReportedState {
    match code {
        "PAYMENT_SUCCESS" => ReportedState::Success,
        "PAYMENT_PENDING" => ReportedState::Pending,
        _ => ReportedState::Failure,
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    fn provider_name(&self) -> &'static str {
        "scripted"
    }

    fn merchant_id(&self) -> &str {
        "SCRIPTEDMERCHANT"
    }

    fn pay_payload(&self, request: &PayRequest) -> Value {
        json!({
            "merchantTransactionId": request.merchant_transaction_id,
            "merchantUserId": request.merchant_user_id,
            "amount": request.amount,
            "redirectUrl": request.callback_url,
            "expireAfter": request.expire_after.num_seconds(),
        })
    }

    async fn create_payment(&self, request: &PayRequest) -> PaymentResult<PayResponse> {
        self.pay_calls.fetch_add(1, Ordering::SeqCst);
        let observer = self.observer.lock().unwrap().clone();
        if let Some(store) = observer {
            let seen = store.transaction_status(&request.merchant_transaction_id);
            self.observed_at_pay.lock().unwrap().push(seen);
        }

        let script = self.pay.lock().unwrap().clone();
        match script {
            PayScript::Redirect(url) => Ok(PayResponse::Redirect {
                redirect_url: url.clone(),
                code: Some("PAYMENT_INITIATED".to_string()),
                raw: json!({"success": true, "code": "PAYMENT_INITIATED", "url": url}),
            }),
            PayScript::Declined(code) => Ok(PayResponse::Declined {
                code: code.clone(),
                message: "declined by script".to_string(),
                raw: json!({"success": false, "code": code}),
            }),
            PayScript::Unrecognized => Ok(PayResponse::Unrecognized {
                raw: json!({"unexpected": true}),
            }),
            PayScript::HttpError(status) => Err(PaymentError::gateway(
                "scripted",
                format!("HTTP {}", status),
            )),
        }
    }

    async fn check_status(&self, merchant_transaction_id: &str) -> PaymentResult<StatusResponse> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let queued = self.queued_status.lock().unwrap().pop_front();
        let script = queued.unwrap_or_else(|| self.status.lock().unwrap().clone());
        // Let concurrent verifications reach the gateway before any answer lands
        tokio::task::yield_now().await;
        match script {
            StatusScript::Code(code) => Ok(StatusResponse::Reported {
                state: reported_state(&code),
                instrument: None,
                raw: json!({
                    "code": code,
                    "data": {"merchantTransactionId": merchant_transaction_id}
                }),
                code,
            }),
            StatusScript::Unrecognized => Ok(StatusResponse::Unrecognized {
                raw: json!({"garbage": true}),
            }),
            StatusScript::Unreachable => Err(PaymentError::gateway(
                "scripted",
                "connection refused",
            )),
        }
    }

    fn parse_callback(&self, payload: &[u8], signature: &str) -> PaymentResult<CallbackNotice> {
        if signature != VALID_CALLBACK_SIGNATURE {
            return Err(PaymentError::Authentication(
                "Callback signature mismatch".to_string(),
            ));
        }
        let raw: Value = serde_json::from_slice(payload)?;
        let merchant_transaction_id = raw
            .get("merchantTransactionId")
            .and_then(Value::as_str)
            .ok_or_else(|| PaymentError::Validation("Missing merchantTransactionId".to_string()))?
            .to_string();
        Ok(CallbackNotice {
            merchant_transaction_id,
            claimed_code: raw.get("code").and_then(Value::as_str).map(String::from),
            raw,
        })
    }
}
