use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        cart::{AddToCartRequest, CartItemDto, CartList, UpdateCartItemRequest},
        orders::{CheckoutRequest, OrderList, OrderWithItems},
        payments::{ConfirmPaymentRequest, InitiateChargeResponse, PaymentStatusResponse},
        products::ProductList,
    },
    models::{CartItem, Order, OrderItem, OrderStatus, Product},
    response::{ApiResponse, Meta},
    routes::{admin, cart, health, orders, params, payments, products},
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        products::list_products,
        products::get_product,
        cart::cart_list,
        cart::add_to_cart,
        cart::update_cart_item,
        cart::remove_from_cart,
        cart::clear_cart,
        orders::list_orders,
        orders::checkout,
        orders::get_order,
        orders::cancel_order,
        payments::initiate_charge,
        payments::confirm_charge,
        payments::payment_status,
        admin::list_all_orders,
        admin::get_order_admin,
        admin::update_order_status
    ),
    components(
        schemas(
            Product,
            CartItem,
            Order,
            OrderItem,
            OrderStatus,
            AddToCartRequest,
            UpdateCartItemRequest,
            CartItemDto,
            CartList,
            CheckoutRequest,
            OrderList,
            OrderWithItems,
            InitiateChargeResponse,
            ConfirmPaymentRequest,
            PaymentStatusResponse,
            ProductList,
            admin::UpdateOrderStatusRequest,
            params::Pagination,
            params::ProductQuery,
            params::OrderListQuery,
            Meta,
            ApiResponse<Product>,
            ApiResponse<ProductList>,
            ApiResponse<CartList>,
            ApiResponse<OrderList>,
            ApiResponse<OrderWithItems>,
            ApiResponse<InitiateChargeResponse>,
            ApiResponse<PaymentStatusResponse>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Products", description = "Read-only catalog lookup"),
        (name = "Cart", description = "Cart endpoints"),
        (name = "Orders", description = "Order placement and cancellation"),
        (name = "Payments", description = "Payment gateway reconciliation"),
        (name = "Admin", description = "Admin endpoints"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
