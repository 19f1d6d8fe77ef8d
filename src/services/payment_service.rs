use chrono::Utc;
use sea_orm::sea_query::LockType;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, QueryFilter, QuerySelect, Set,
    TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::{
        orders::OrderWithItems,
        payments::{ConfirmPaymentRequest, InitiateChargeResponse, PaymentStatusResponse},
    },
    entity::{
        order_items::{Column as OrderItemCol, Entity as OrderItems},
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders},
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::OrderStatus,
    response::{ApiResponse, Meta},
    services::order_service::{order_from_entity, order_item_from_entity, parse_status},
    state::AppState,
};

/// Ask the gateway to open a charge for a pending order. The receipt is
/// derived from the order id, so retrying this call cannot open a second
/// charge for the same order. Order status is not touched here; only a
/// verified confirmation moves an order to paid.
pub async fn initiate_charge(
    state: &AppState,
    user: &AuthUser,
    order_id: Uuid,
) -> AppResult<ApiResponse<InitiateChargeResponse>> {
    let order = Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::UserId.eq(user.user_id))
                .add(OrderCol::Id.eq(order_id)),
        )
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    let status = parse_status(&order.status)?;
    if status.is_terminal() {
        return Err(AppError::InvalidTransition(format!(
            "cannot take payment for order in status {status}"
        )));
    }

    let receipt = format!("order_{}", order.id);
    let charge = state
        .gateway
        .create_charge(order.total_amount, &state.currency, &receipt)
        .await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "payment_initiated",
        Some("orders"),
        Some(serde_json::json!({
            "order_id": order.id,
            "charge_reference": charge.reference,
        })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Charge created",
        InitiateChargeResponse {
            charge_reference: charge.reference,
            amount: charge.amount,
            currency: charge.currency,
        },
        Some(Meta::empty()),
    ))
}

/// Apply the gateway's payment confirmation to an order.
///
/// Idempotent: the gateway's callback may be retried over the network, so
/// confirming an already-paid order with the same payment reference is a
/// no-op success rather than an error. The signature is checked on every
/// call, retries included, before any order state is consulted.
pub async fn confirm_charge(
    state: &AppState,
    user: &AuthUser,
    payload: ConfirmPaymentRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    state.gateway.verify_signature(
        &payload.charge_reference,
        &payload.payment_reference,
        &payload.signature,
    )?;

    let txn = state.orm.begin().await?;

    let order = Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::UserId.eq(user.user_id))
                .add(OrderCol::Id.eq(payload.order_id)),
        )
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or(AppError::NotFound)?;

    let order = match parse_status(&order.status)? {
        OrderStatus::Paid => {
            if order.payment_reference.as_deref() == Some(payload.payment_reference.as_str()) {
                order
            } else {
                return Err(AppError::InvalidTransition(
                    "order is already paid with a different payment reference".to_string(),
                ));
            }
        }
        OrderStatus::Cancelled => {
            return Err(AppError::InvalidTransition(
                "cannot confirm payment for a cancelled order".to_string(),
            ));
        }
        OrderStatus::Pending => {
            let mut active: OrderActive = order.into();
            active.status = Set(OrderStatus::Paid.as_str().to_string());
            active.payment_reference = Set(Some(payload.payment_reference.clone()));
            active.updated_at = Set(Utc::now().into());
            active.update(&txn).await?
        }
    };

    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .all(&txn)
        .await?
        .into_iter()
        .map(order_item_from_entity)
        .collect();

    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "payment_confirmed",
        Some("orders"),
        Some(serde_json::json!({
            "order_id": payload.order_id,
            "payment_reference": payload.payment_reference,
        })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Payment verified",
        OrderWithItems {
            order: order_from_entity(order)?,
            items,
        },
        Some(Meta::empty()),
    ))
}

/// Read-through to the gateway for manual reconciliation. No local state
/// changes; the gateway's answer is returned verbatim.
pub async fn query_status(
    state: &AppState,
    _user: &AuthUser,
    payment_reference: &str,
) -> AppResult<ApiResponse<PaymentStatusResponse>> {
    let payment = state.gateway.fetch_status(payment_reference).await?;
    let status = payment
        .get("status")
        .and_then(|s| s.as_str())
        .unwrap_or("unknown")
        .to_string();

    Ok(ApiResponse::success(
        "OK",
        PaymentStatusResponse { status, payment },
        Some(Meta::empty()),
    ))
}
