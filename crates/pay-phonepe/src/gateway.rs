//! # PhonePe Gateway
//!
//! `PaymentGateway` over the PhonePe PG v1 API:
//! - `POST /pg/v1/pay` with `{"request": base64(payload)}`
//! - `GET /pg/v1/status/{merchantId}/{merchantTransactionId}`
//! - server-to-server callbacks carrying `{"response": base64(body)}`

use crate::config::PhonePeConfig;
use crate::signature;
use async_trait::async_trait;
use pay_core::{
    CallbackNotice, PayRequest, PayResponse, PaymentError, PaymentGateway, PaymentResult,
    ReportedState, StatusResponse,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error, info, instrument, warn};

pub const PROVIDER: &str = "phonepe";

/// Map a PhonePe response code to a settlement bucket.
///
/// Unknown codes stay pending: a later status check or the expiry sweep
/// settles them.
pub fn reported_state(code: &str) -> ReportedState {
    match code {
        "PAYMENT_SUCCESS" => ReportedState::Success,
        "PAYMENT_ERROR" | "PAYMENT_DECLINED" | "TIMED_OUT" | "AUTHORIZATION_FAILED"
        | "BAD_REQUEST" | "PAYMENT_CANCELLED" => ReportedState::Failure,
        "PAYMENT_PENDING" | "INTERNAL_SERVER_ERROR" | "TRANSACTION_NOT_FOUND" => {
            ReportedState::Pending
        }
        other => {
            warn!(code = other, "Unknown PhonePe code; treating as pending");
            ReportedState::Pending
        }
    }
}

/// PhonePe hosted checkout
pub struct PhonePeGateway {
    config: PhonePeConfig,
    client: Client,
}

impl PhonePeGateway {
    /// Create a new PhonePe gateway
    pub fn new(config: PhonePeConfig) -> PaymentResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| {
                PaymentError::Configuration(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self { config, client })
    }

    /// Create from environment variables
    pub fn from_env() -> PaymentResult<Self> {
        let config = PhonePeConfig::from_env()?;
        Self::new(config)
    }

    pub fn config(&self) -> &PhonePeConfig {
        &self.config
    }

    fn transport_error(err: reqwest::Error) -> PaymentError {
        PaymentError::gateway(PROVIDER, err.to_string())
    }

    /// Read a body as JSON, keeping non-JSON text as a string value
    async fn read_body(response: Response) -> PaymentResult<Value> {
        let text = response.text().await.map_err(Self::transport_error)?;
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }
}

#[async_trait]
impl PaymentGateway for PhonePeGateway {
    fn provider_name(&self) -> &'static str {
        PROVIDER
    }

    fn merchant_id(&self) -> &str {
        &self.config.merchant_id
    }

    fn pay_payload(&self, request: &PayRequest) -> Value {
        json!({
            "merchantId": self.config.merchant_id,
            "merchantTransactionId": request.merchant_transaction_id,
            "merchantOrderId": request.merchant_transaction_id,
            "merchantUserId": request.merchant_user_id,
            "amount": request.amount,
            "expireAfter": request.expire_after.num_seconds(),
            "redirectUrl": request.callback_url,
            "redirectMode": "REDIRECT",
            "paymentInstrument": { "type": "PAY_PAGE" },
            "paymentFlow": {
                "type": "PG_CHECKOUT",
                "merchantUrls": { "redirectUrl": request.callback_url }
            }
        })
    }

    #[instrument(skip(self, request), fields(transaction_id = %request.merchant_transaction_id))]
    async fn create_payment(&self, request: &PayRequest) -> PaymentResult<PayResponse> {
        let payload = serde_json::to_vec(&self.pay_payload(request))?;
        let encoded = signature::encode_payload(&payload);
        let x_verify = signature::sign(&payload, &self.config.salt_key, self.config.salt_index);

        let url = format!("{}{}", self.config.api_base_url, signature::PAY_PATH);
        debug!("Opening PhonePe session: amount={}", request.amount);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("X-VERIFY", x_verify)
            .json(&json!({ "request": encoded }))
            .send()
            .await
            .map_err(Self::transport_error)?;

        let status = response.status();
        let body = Self::read_body(response).await?;

        if !status.is_success() {
            error!("PhonePe pay error: status={}, body={}", status, body);
            return Err(PaymentError::gateway(PROVIDER, format!("HTTP {}", status)));
        }

        let parsed: PayApiResponse = match serde_json::from_value(body.clone()) {
            Ok(parsed) => parsed,
            Err(_) => return Ok(PayResponse::Unrecognized { raw: body }),
        };

        if let Some(url) = parsed.redirect_url() {
            info!("Created PhonePe session: code={:?}", parsed.code);
            return Ok(PayResponse::Redirect {
                redirect_url: url.to_string(),
                code: parsed.code.clone(),
                raw: body,
            });
        }

        match (parsed.success, parsed.code) {
            (Some(false), code) | (_, code @ Some(_)) => Ok(PayResponse::Declined {
                code: code.unwrap_or_else(|| "UNKNOWN".to_string()),
                message: parsed.message.unwrap_or_default(),
                raw: body,
            }),
            _ => Ok(PayResponse::Unrecognized { raw: body }),
        }
    }

    #[instrument(skip(self))]
    async fn check_status(&self, merchant_transaction_id: &str) -> PaymentResult<StatusResponse> {
        let path = signature::status_path(&self.config.merchant_id, merchant_transaction_id);
        let x_verify = signature::verify_for_status_path(
            &self.config.merchant_id,
            merchant_transaction_id,
            &self.config.salt_key,
            self.config.salt_index,
        );
        let url = format!("{}{}", self.config.api_base_url, path);

        let response = self
            .client
            .get(&url)
            .header("Content-Type", "application/json")
            .header("X-VERIFY", x_verify)
            .header("X-MERCHANT-ID", &self.config.merchant_id)
            .send()
            .await
            .map_err(Self::transport_error)?;

        let status = response.status();
        let body = Self::read_body(response).await?;

        let code = body.get("code").and_then(Value::as_str).map(String::from);
        match code {
            Some(code) => {
                if !status.is_success() {
                    warn!("PhonePe status returned HTTP {} with code {}", status, code);
                }
                let instrument = body
                    .pointer("/data/paymentInstrument")
                    .filter(|v| !v.is_null())
                    .cloned();
                Ok(StatusResponse::Reported {
                    state: reported_state(&code),
                    code,
                    instrument,
                    raw: body,
                })
            }
            None if !status.is_success() => {
                error!("PhonePe status error: status={}, body={}", status, body);
                Err(PaymentError::gateway(PROVIDER, format!("HTTP {}", status)))
            }
            None => Ok(StatusResponse::Unrecognized { raw: body }),
        }
    }

    fn parse_callback(&self, payload: &[u8], signature: &str) -> PaymentResult<CallbackNotice> {
        let envelope: CallbackEnvelope = serde_json::from_slice(payload)
            .map_err(|e| PaymentError::Validation(format!("Malformed callback body: {}", e)))?;

        signature::verify_callback(
            &envelope.response,
            signature,
            &self.config.salt_key,
            self.config.salt_index,
        )?;

        let decoded = BASE64
            .decode(envelope.response.trim())
            .map_err(|e| PaymentError::Validation(format!("Callback is not base64: {}", e)))?;
        let raw: Value = serde_json::from_slice(&decoded)
            .map_err(|e| PaymentError::Validation(format!("Callback is not JSON: {}", e)))?;

        let merchant_transaction_id = raw
            .pointer("/data/merchantTransactionId")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                PaymentError::Validation("Callback has no merchantTransactionId".to_string())
            })?
            .to_string();

        Ok(CallbackNotice {
            merchant_transaction_id,
            claimed_code: raw.get("code").and_then(Value::as_str).map(String::from),
            raw,
        })
    }
}

// =============================================================================
// PhonePe API Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct PayApiResponse {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<PayApiData>,
}

impl PayApiResponse {
    fn redirect_url(&self) -> Option<&str> {
        self.data
            .as_ref()?
            .instrument_response
            .as_ref()?
            .redirect_info
            .as_ref()
            .map(|info| info.url.as_str())
            .filter(|url| !url.is_empty())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PayApiData {
    #[serde(default)]
    instrument_response: Option<InstrumentResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstrumentResponse {
    #[serde(default)]
    redirect_info: Option<RedirectInfo>,
}

#[derive(Debug, Deserialize)]
struct RedirectInfo {
    url: String,
}

#[derive(Debug, Deserialize)]
struct CallbackEnvelope {
    response: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SALT: &str = "test-salt-key";

    fn gateway(server: &MockServer) -> PhonePeGateway {
        let config = PhonePeConfig::new("TESTMERCHANT", SALT, 1).with_api_base_url(server.uri());
        PhonePeGateway::new(config).unwrap()
    }

    fn pay_request() -> PayRequest {
        PayRequest {
            merchant_transaction_id: "MT1700000000000123456".to_string(),
            merchant_user_id: "MUIDuser-1".to_string(),
            amount: 1300,
            callback_url: "https://shop.example.test/payment/callback".to_string(),
            expire_after: Duration::seconds(1200),
        }
    }

    #[test]
    fn test_code_mapping() {
        assert_eq!(reported_state("PAYMENT_SUCCESS"), ReportedState::Success);
        assert_eq!(reported_state("PAYMENT_PENDING"), ReportedState::Pending);
        assert_eq!(reported_state("INTERNAL_SERVER_ERROR"), ReportedState::Pending);
        assert_eq!(reported_state("TRANSACTION_NOT_FOUND"), ReportedState::Pending);
        assert_eq!(reported_state("SOMETHING_NEW"), ReportedState::Pending);
        for code in [
            "PAYMENT_ERROR",
            "PAYMENT_DECLINED",
            "TIMED_OUT",
            "AUTHORIZATION_FAILED",
            "BAD_REQUEST",
            "PAYMENT_CANCELLED",
        ] {
            assert_eq!(reported_state(code), ReportedState::Failure, "{}", code);
        }
    }

    #[test]
    fn test_pay_payload_shape() {
        let gateway = PhonePeGateway::new(PhonePeConfig::new("TESTMERCHANT", SALT, 1)).unwrap();
        let payload = gateway.pay_payload(&pay_request());

        assert_eq!(payload["merchantId"], "TESTMERCHANT");
        assert_eq!(payload["merchantTransactionId"], "MT1700000000000123456");
        assert_eq!(payload["amount"], 1300);
        assert_eq!(payload["expireAfter"], 1200);
        assert_eq!(payload["paymentFlow"]["type"], "PG_CHECKOUT");
        assert_eq!(
            payload["paymentFlow"]["merchantUrls"]["redirectUrl"],
            "https://shop.example.test/payment/callback"
        );
    }

    #[tokio::test]
    async fn test_create_payment_signs_and_redirects() {
        let server = MockServer::start().await;
        let gateway = gateway(&server);
        let request = pay_request();

        let payload = serde_json::to_vec(&gateway.pay_payload(&request)).unwrap();
        let encoded = signature::encode_payload(&payload);
        let x_verify = signature::sign(&payload, SALT, 1);

        Mock::given(method("POST"))
            .and(path("/pg/v1/pay"))
            .and(header("X-VERIFY", x_verify.as_str()))
            .and(body_json(json!({ "request": encoded })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "code": "PAYMENT_INITIATED",
                "data": {
                    "instrumentResponse": {
                        "redirectInfo": { "url": "https://mercury.phonepe.com/transact/abc" }
                    }
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = gateway.create_payment(&request).await.unwrap();
        match response {
            PayResponse::Redirect {
                redirect_url, code, ..
            } => {
                assert_eq!(redirect_url, "https://mercury.phonepe.com/transact/abc");
                assert_eq!(code.as_deref(), Some("PAYMENT_INITIATED"));
            }
            other => panic!("expected redirect, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_create_payment_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/pg/v1/pay"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "success": false,
                "code": "INTERNAL_SERVER_ERROR"
            })))
            .mount(&server)
            .await;

        let err = gateway(&server).create_payment(&pay_request()).await.unwrap_err();
        assert!(matches!(err, PaymentError::Gateway { .. }));
    }

    #[tokio::test]
    async fn test_create_payment_without_url_is_declined() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/pg/v1/pay"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false,
                "code": "BAD_REQUEST",
                "message": "Please check the inputs you have provided."
            })))
            .mount(&server)
            .await;

        let response = gateway(&server).create_payment(&pay_request()).await.unwrap();
        assert!(matches!(
            response,
            PayResponse::Declined { ref code, .. } if code == "BAD_REQUEST"
        ));
    }

    #[tokio::test]
    async fn test_create_payment_unrecognized_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/pg/v1/pay"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .mount(&server)
            .await;

        let response = gateway(&server).create_payment(&pay_request()).await.unwrap();
        assert!(matches!(response, PayResponse::Unrecognized { .. }));
    }

    #[tokio::test]
    async fn test_check_status_success() {
        let server = MockServer::start().await;
        let x_verify = signature::verify_for_status_path("TESTMERCHANT", "MT1", SALT, 1);

        Mock::given(method("GET"))
            .and(path("/pg/v1/status/TESTMERCHANT/MT1"))
            .and(header("X-VERIFY", x_verify.as_str()))
            .and(header("X-MERCHANT-ID", "TESTMERCHANT"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "code": "PAYMENT_SUCCESS",
                "data": {
                    "merchantTransactionId": "MT1",
                    "state": "COMPLETED",
                    "paymentInstrument": { "type": "UPI", "utr": "123456789012" }
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = gateway(&server).check_status("MT1").await.unwrap();
        match response {
            StatusResponse::Reported {
                code,
                state,
                instrument,
                ..
            } => {
                assert_eq!(code, "PAYMENT_SUCCESS");
                assert_eq!(state, ReportedState::Success);
                assert_eq!(instrument.unwrap()["type"], "UPI");
            }
            other => panic!("expected report, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_check_status_reads_code_on_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pg/v1/status/TESTMERCHANT/MT2"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "success": false,
                "code": "PAYMENT_DECLINED"
            })))
            .mount(&server)
            .await;

        let response = gateway(&server).check_status("MT2").await.unwrap();
        assert!(matches!(
            response,
            StatusResponse::Reported { state: ReportedState::Failure, .. }
        ));
    }

    #[tokio::test]
    async fn test_check_status_without_code() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pg/v1/status/TESTMERCHANT/MT3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/pg/v1/status/TESTMERCHANT/MT4"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let gateway = gateway(&server);
        assert!(matches!(
            gateway.check_status("MT3").await.unwrap(),
            StatusResponse::Unrecognized { .. }
        ));
        assert!(matches!(
            gateway.check_status("MT4").await,
            Err(PaymentError::Gateway { .. })
        ));
    }

    #[test]
    fn test_parse_callback() {
        let gateway = PhonePeGateway::new(PhonePeConfig::new("TESTMERCHANT", SALT, 1)).unwrap();
        let inner = json!({
            "success": true,
            "code": "PAYMENT_SUCCESS",
            "data": { "merchantTransactionId": "MT9", "amount": 1300 }
        });
        let encoded = signature::encode_payload(&serde_json::to_vec(&inner).unwrap());
        let body = serde_json::to_vec(&json!({ "response": encoded })).unwrap();
        let x_verify = signature::sign_callback(&encoded, SALT, 1);

        let notice = gateway.parse_callback(&body, &x_verify).unwrap();
        assert_eq!(notice.merchant_transaction_id, "MT9");
        assert_eq!(notice.claimed_code.as_deref(), Some("PAYMENT_SUCCESS"));

        let err = gateway.parse_callback(&body, "forged###1").unwrap_err();
        assert!(matches!(err, PaymentError::Authentication(_)));

        let err = gateway.parse_callback(b"not json", &x_verify).unwrap_err();
        assert!(matches!(err, PaymentError::Validation(_)));
    }
}
