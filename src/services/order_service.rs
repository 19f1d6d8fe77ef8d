use chrono::Utc;
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::LockType;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::orders::{CheckoutRequest, OrderList, OrderWithItems},
    entity::{
        cart_items::{Column as CartCol, Entity as CartItems},
        order_items::{
            ActiveModel as OrderItemActive, Column as OrderItemCol, Entity as OrderItems,
            Model as OrderItemModel,
        },
        orders::{
            ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel,
        },
        products::Entity as Products,
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{Order, OrderItem, OrderStatus},
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, SortOrder},
    services::inventory_service,
    state::AppState,
};

pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = query.pagination.normalize();
    let mut condition = Condition::all().add(OrderCol::UserId.eq(user.user_id));
    if let Some(status) = query.status.as_ref().filter(|s| !s.is_empty()) {
        let status = OrderStatus::parse(status)
            .ok_or_else(|| AppError::Validation(format!("unknown status filter: {status}")))?;
        condition = condition.add(OrderCol::Status.eq(status.as_str()));
    }

    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);

    let mut finder = Orders::find().filter(condition);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let orders = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_from_entity)
        .collect::<AppResult<Vec<_>>>()?;

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "Ok",
        OrderList { items: orders },
        Some(meta),
    ))
}

/// Turn the user's cart into a pending order.
///
/// Everything runs inside one transaction: per-line authoritative price
/// re-read, stock reservation, order + item inserts and the cart wipe.
/// Any error before commit drops the transaction, which rolls back every
/// reservation already made for earlier lines.
pub async fn checkout(
    state: &AppState,
    user: &AuthUser,
    payload: CheckoutRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    if payload.shipping_address.trim().is_empty() {
        return Err(AppError::Validation(
            "shipping address is required".to_string(),
        ));
    }

    let txn = state.orm.begin().await?;

    // Reserve in product id order so concurrent checkouts over overlapping
    // products take row locks in the same order and cannot deadlock.
    let lines = CartItems::find()
        .filter(CartCol::UserId.eq(user.user_id))
        .order_by_asc(CartCol::ProductId)
        .all(&txn)
        .await?;

    if lines.is_empty() {
        return Err(AppError::EmptyCart);
    }

    let order_id = Uuid::new_v4();
    let mut total_amount: i64 = 0;
    let mut item_actives: Vec<OrderItemActive> = Vec::with_capacity(lines.len());

    for line in &lines {
        if line.quantity <= 0 {
            return Err(AppError::Validation(format!(
                "cart line {} has invalid quantity",
                line.id
            )));
        }

        // Re-read the product; the cart's cached view of price and stock
        // is not authoritative. A deleted product surfaces here.
        let product = Products::find_by_id(line.product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                AppError::Validation(format!(
                    "product {} is no longer available",
                    line.product_id
                ))
            })?;

        inventory_service::reserve(&txn, product.id, line.quantity).await?;

        total_amount += product.price * i64::from(line.quantity);
        item_actives.push(OrderItemActive {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            product_id: Set(product.id),
            quantity: Set(line.quantity),
            // Snapshot of the price the buyer was shown; never recomputed.
            price: Set(product.price),
            created_at: NotSet,
        });
    }

    let order = OrderActive {
        id: Set(order_id),
        user_id: Set(user.user_id),
        total_amount: Set(total_amount),
        status: Set(OrderStatus::Pending.as_str().to_string()),
        payment_reference: Set(None),
        shipping_address: Set(payload.shipping_address.clone()),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&txn)
    .await?;

    let mut items: Vec<OrderItem> = Vec::with_capacity(item_actives.len());
    for active in item_actives {
        let item = active.insert(&txn).await?;
        items.push(order_item_from_entity(item));
    }

    CartItems::delete_many()
        .filter(CartCol::UserId.eq(user.user_id))
        .exec(&txn)
        .await?;

    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "checkout",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order.id, "total_amount": total_amount })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Checkout success",
        OrderWithItems {
            order: order_from_entity(order)?,
            items,
        },
        Some(Meta::empty()),
    ))
}

/// Cancel a pending order and restore its reserved stock.
///
/// The status transition commits first; releases run afterwards, each as
/// its own statement. A crash mid-release leaves a cancelled order with
/// partially restored stock, which an operator reconciles from the audit
/// trail, never an order in an ambiguous state.
pub async fn cancel_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let txn = state.orm.begin().await?;

    let order = Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::UserId.eq(user.user_id))
                .add(OrderCol::Id.eq(id)),
        )
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or(AppError::NotFound)?;

    let status = parse_status(&order.status)?;
    if status.is_terminal() {
        return Err(AppError::InvalidTransition(format!(
            "cannot cancel order in status {status}"
        )));
    }

    let mut active: OrderActive = order.into();
    active.status = Set(OrderStatus::Cancelled.as_str().to_string());
    active.updated_at = Set(Utc::now().into());
    let order = active.update(&txn).await?;

    let item_models = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .all(&txn)
        .await?;

    txn.commit().await?;

    for item in &item_models {
        if let Err(err) =
            inventory_service::release(&state.orm, item.product_id, item.quantity).await
        {
            tracing::warn!(
                error = %err,
                order_id = %order.id,
                product_id = %item.product_id,
                "stock release failed after cancellation"
            );
        }
    }

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "order_cancelled",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    let items = item_models
        .into_iter()
        .map(order_item_from_entity)
        .collect();

    Ok(ApiResponse::success(
        "Order cancelled",
        OrderWithItems {
            order: order_from_entity(order)?,
            items,
        },
        Some(Meta::empty()),
    ))
}

pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let order = Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::UserId.eq(user.user_id))
                .add(OrderCol::Id.eq(id)),
        )
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_item_from_entity)
        .collect();

    Ok(ApiResponse::success(
        "OK",
        OrderWithItems {
            order: order_from_entity(order)?,
            items,
        },
        Some(Meta::empty()),
    ))
}

pub(crate) fn parse_status(value: &str) -> AppResult<OrderStatus> {
    OrderStatus::parse(value)
        .ok_or_else(|| anyhow::anyhow!("unknown order status in store: {value}").into())
}

pub(crate) fn order_from_entity(model: OrderModel) -> AppResult<Order> {
    Ok(Order {
        id: model.id,
        user_id: model.user_id,
        total_amount: model.total_amount,
        status: parse_status(&model.status)?,
        payment_reference: model.payment_reference,
        shipping_address: model.shipping_address,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    })
}

pub(crate) fn order_item_from_entity(model: OrderItemModel) -> OrderItem {
    OrderItem {
        id: model.id,
        order_id: model.order_id,
        product_id: model.product_id,
        quantity: model.quantity,
        price: model.price,
        created_at: model.created_at.with_timezone(&Utc),
    }
}
