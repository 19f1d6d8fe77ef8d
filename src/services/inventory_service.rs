//! Inventory ledger: the only code allowed to mutate `products.stock`.
//!
//! Both operations are single conditional UPDATE statements, so they stay
//! atomic with respect to concurrent callers whether they run on a pooled
//! connection or inside a checkout transaction.

use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use uuid::Uuid;

use crate::{
    entity::products::{Column as ProdCol, Entity as Products},
    error::{AppError, AppResult},
};

/// Decrement stock by `quantity` iff at least that much is available.
/// The `stock >= quantity` guard lives in the UPDATE itself; two concurrent
/// reservations for the last unit cannot both match the row.
pub async fn reserve<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    quantity: i32,
) -> AppResult<()> {
    let result = Products::update_many()
        .col_expr(ProdCol::Stock, Expr::col(ProdCol::Stock).sub(quantity))
        .filter(ProdCol::Id.eq(product_id))
        .filter(ProdCol::Stock.gte(quantity))
        .exec(conn)
        .await?;

    if result.rows_affected > 0 {
        return Ok(());
    }

    // Nothing matched: either the product is gone or the stock ran out.
    let exists = Products::find_by_id(product_id).one(conn).await?.is_some();
    if exists {
        Err(AppError::InsufficientStock { product_id })
    } else {
        Err(AppError::NotFound)
    }
}

/// Give `quantity` units back, used when a pending order is cancelled.
/// A missing product means the stock has no home to return to; that is a
/// data-integrity warning for operators, not a request failure.
pub async fn release<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    quantity: i32,
) -> AppResult<()> {
    let result = Products::update_many()
        .col_expr(ProdCol::Stock, Expr::col(ProdCol::Stock).add(quantity))
        .filter(ProdCol::Id.eq(product_id))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        tracing::warn!(
            %product_id,
            quantity,
            "release target missing; stock not restored"
        );
    }

    Ok(())
}
