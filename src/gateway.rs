use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;

use crate::{config::GatewayConfig, error::AppError};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// The gateway understood the request and said no. Not retryable.
    #[error("gateway rejected the request: {0}")]
    Rejected(String),

    /// Timeout or transport failure. Retryable by the caller; no order
    /// state may change based on it.
    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    #[error("signature mismatch")]
    SignatureMismatch,
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Rejected(msg) => AppError::PaymentRejected(msg),
            GatewayError::Unavailable(msg) => AppError::GatewayUnavailable(msg),
            GatewayError::SignatureMismatch => AppError::SignatureInvalid,
        }
    }
}

/// One payment attempt opened at the gateway.
#[derive(Debug, Clone)]
pub struct Charge {
    pub reference: String,
    pub amount: i64,
    pub currency: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Open a charge for `amount` minor units. `receipt` doubles as the
    /// idempotency key, so repeated calls for the same order do not open
    /// duplicate charges at the gateway.
    async fn create_charge(
        &self,
        amount: i64,
        currency: &str,
        receipt: &str,
    ) -> Result<Charge, GatewayError>;

    /// Check the gateway's signature over a (charge, payment) pair.
    fn verify_signature(
        &self,
        charge_ref: &str,
        payment_ref: &str,
        signature: &str,
    ) -> Result<(), GatewayError>;

    /// Fetch the gateway's view of a payment, verbatim.
    async fn fetch_status(&self, payment_ref: &str) -> Result<serde_json::Value, GatewayError>;
}

/// Razorpay-shaped REST client. Every call carries the configured timeout;
/// a call that times out surfaces as `Unavailable` and the caller retries.
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
}

impl HttpGateway {
    pub fn new(config: &GatewayConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            key_id: config.key_id.clone(),
            key_secret: config.key_secret.clone(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct GatewayOrderBody {
    id: String,
    amount: i64,
    currency: String,
}

fn transport_error(err: reqwest::Error) -> GatewayError {
    GatewayError::Unavailable(err.to_string())
}

async fn reject_from_response(response: reqwest::Response) -> GatewayError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if status.is_server_error() {
        GatewayError::Unavailable(format!("gateway returned {status}"))
    } else {
        GatewayError::Rejected(format!("{status}: {body}"))
    }
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    async fn create_charge(
        &self,
        amount: i64,
        currency: &str,
        receipt: &str,
    ) -> Result<Charge, GatewayError> {
        let response = self
            .client
            .post(format!("{}/v1/orders", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&serde_json::json!({
                "amount": amount,
                "currency": currency,
                "receipt": receipt,
                "payment_capture": 1,
            }))
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(reject_from_response(response).await);
        }

        let body: GatewayOrderBody = response.json().await.map_err(transport_error)?;
        Ok(Charge {
            reference: body.id,
            amount: body.amount,
            currency: body.currency,
        })
    }

    fn verify_signature(
        &self,
        charge_ref: &str,
        payment_ref: &str,
        signature: &str,
    ) -> Result<(), GatewayError> {
        let Some(signature) = decode_hex(signature) else {
            return Err(GatewayError::SignatureMismatch);
        };

        let mut mac = HmacSha256::new_from_slice(self.key_secret.as_bytes())
            .map_err(|_| GatewayError::SignatureMismatch)?;
        mac.update(charge_ref.as_bytes());
        mac.update(b"|");
        mac.update(payment_ref.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| GatewayError::SignatureMismatch)
    }

    async fn fetch_status(&self, payment_ref: &str) -> Result<serde_json::Value, GatewayError> {
        let response = self
            .client
            .get(format!("{}/v1/payments/{payment_ref}", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(reject_from_response(response).await);
        }

        response.json().await.map_err(transport_error)
    }
}

// Works on raw bytes; signatures arrive from the network and are not
// guaranteed to be ASCII, so string slicing is off limits here.
fn decode_hex(value: &str) -> Option<Vec<u8>> {
    let bytes = value.as_bytes();
    if bytes.len() % 2 != 0 {
        return None;
    }
    bytes
        .chunks(2)
        .map(|pair| {
            let high = char::from(pair[0]).to_digit(16)?;
            let low = char::from(pair[1]).to_digit(16)?;
            Some((high << 4 | low) as u8)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;

    fn gateway(secret: &str) -> HttpGateway {
        HttpGateway::new(&GatewayConfig {
            key_id: "key".into(),
            key_secret: secret.into(),
            base_url: "https://gateway.test".into(),
            timeout_secs: 1,
        })
        .unwrap()
    }

    fn sign(secret: &str, charge_ref: &str, payment_ref: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{charge_ref}|{payment_ref}").as_bytes());
        mac.finalize()
            .into_bytes()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    #[test]
    fn accepts_a_valid_signature() {
        let gw = gateway("s3cret");
        let sig = sign("s3cret", "order_abc", "pay_xyz");
        assert!(gw.verify_signature("order_abc", "pay_xyz", &sig).is_ok());
    }

    #[test]
    fn rejects_a_signature_for_a_different_payment() {
        let gw = gateway("s3cret");
        let sig = sign("s3cret", "order_abc", "pay_xyz");
        assert!(matches!(
            gw.verify_signature("order_abc", "pay_other", &sig),
            Err(GatewayError::SignatureMismatch)
        ));
    }

    #[test]
    fn rejects_a_signature_made_with_the_wrong_secret() {
        let gw = gateway("s3cret");
        let sig = sign("other-secret", "order_abc", "pay_xyz");
        assert!(matches!(
            gw.verify_signature("order_abc", "pay_xyz", &sig),
            Err(GatewayError::SignatureMismatch)
        ));
    }

    #[test]
    fn rejects_malformed_hex() {
        let gw = gateway("s3cret");
        // "€a" is four bytes, so it passes an even-length check but must
        // still be rejected without panicking on the multi-byte char.
        for bad in ["zz", "abc", "", "€a", "deadbee\u{00e9}"] {
            assert!(
                gw.verify_signature("order_abc", "pay_xyz", bad).is_err(),
                "expected {bad:?} to be rejected"
            );
        }
    }
}
