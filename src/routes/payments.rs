use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use uuid::Uuid;

use crate::{
    dto::{
        orders::OrderWithItems,
        payments::{ConfirmPaymentRequest, InitiateChargeResponse, PaymentStatusResponse},
    },
    error::AppResult,
    middleware::auth::AuthUser,
    response::ApiResponse,
    services::payment_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{order_id}/initiate", post(initiate_charge))
        .route("/confirm", post(confirm_charge))
        .route("/status/{payment_reference}", get(payment_status))
}

#[utoipa::path(
    post,
    path = "/api/payments/{order_id}/initiate",
    params(
        ("order_id" = Uuid, Path, description = "Order ID")
    ),
    responses(
        (status = 200, description = "Open a gateway charge for a pending order", body = ApiResponse<InitiateChargeResponse>),
        (status = 404, description = "Not Found"),
        (status = 409, description = "Order is not pending"),
        (status = 503, description = "Gateway unavailable; retry later"),
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn initiate_charge(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<InitiateChargeResponse>>> {
    let resp = payment_service::initiate_charge(&state, &user, order_id).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/payments/confirm",
    request_body = ConfirmPaymentRequest,
    responses(
        (status = 200, description = "Verify the gateway signature and mark the order paid; idempotent", body = ApiResponse<OrderWithItems>),
        (status = 400, description = "Signature verification failed"),
        (status = 404, description = "Not Found"),
        (status = 409, description = "Order is cancelled or paid with a different reference"),
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn confirm_charge(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<ConfirmPaymentRequest>,
) -> AppResult<Json<ApiResponse<OrderWithItems>>> {
    let resp = payment_service::confirm_charge(&state, &user, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/payments/status/{payment_reference}",
    params(
        ("payment_reference" = String, Path, description = "Gateway payment reference")
    ),
    responses(
        (status = 200, description = "Gateway's view of a payment, verbatim", body = ApiResponse<PaymentStatusResponse>),
        (status = 503, description = "Gateway unavailable; retry later"),
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn payment_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(payment_reference): Path<String>,
) -> AppResult<Json<ApiResponse<PaymentStatusResponse>>> {
    let resp = payment_service::query_status(&state, &user, &payment_reference).await?;
    Ok(Json(resp))
}
