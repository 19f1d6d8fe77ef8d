use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, ToSchema)]
pub struct InitiateChargeResponse {
    /// Opaque charge reference assigned by the gateway.
    pub charge_reference: String,
    pub amount: i64,
    pub currency: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ConfirmPaymentRequest {
    pub order_id: Uuid,
    pub charge_reference: String,
    pub payment_reference: String,
    pub signature: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentStatusResponse {
    /// Status string as reported by the gateway, unmodified.
    pub status: String,
    #[schema(value_type = Object)]
    pub payment: serde_json::Value,
}
