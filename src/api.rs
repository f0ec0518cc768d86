//! HTTP boundary for the order and payment services.
//!
//! Only the operations that deserve an external UX are exposed here;
//! notification and analytics work happens exclusively through events.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tracing::info;

use crate::services::orders::{
    CancelOrderRequest, GetOrderRequest, PlaceOrderRequest, SearchOrdersRequest, ShipOrderRequest,
};
use crate::services::payments::{
    ChargebackRequest, GetTransactionRequest, SearchTransactionsCriteria,
};
use crate::services::{Order, OrderService, PaymentService, ServiceError, Transaction};

/// Shared handles the HTTP handlers need.
#[derive(Clone)]
pub struct ApiState {
    pub orders: Arc<dyn OrderService>,
    pub payments: Arc<dyn PaymentService>,
}

/// JSON body returned for every failed request.
#[derive(Debug, Serialize)]
struct ErrorBody {
    status: u16,
    message: String,
}

/// Service error carried out through an HTTP response.
pub struct ApiError(ServiceError);

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ServiceError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            status: status.as_u16(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/order", get(search_orders).put(place_order))
        .route("/order/:order_id", get(get_order).delete(cancel_order))
        .route("/order/:order_id/shipping", post(ship_order))
        .route("/transaction", get(search_transactions))
        .route("/transaction/:transaction_id", get(get_transaction))
        .route(
            "/transaction/:transaction_id/chargeback",
            post(chargeback),
        )
        .with_state(state)
}

/// Bind the listener and serve requests until the process exits.
pub async fn serve(host: &str, port: u16, state: ApiState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind((host, port)).await?;
    info!(host = %host, port = port, "API gateway listening");
    axum::serve(listener, router(state)).await
}

async fn search_orders(State(state): State<ApiState>) -> Result<Json<Vec<Order>>, ApiError> {
    let orders = state
        .orders
        .search_orders(SearchOrdersRequest::default())
        .await?;
    Ok(Json(orders))
}

async fn place_order(
    State(state): State<ApiState>,
    Json(req): Json<PlaceOrderRequest>,
) -> Result<Json<Order>, ApiError> {
    Ok(Json(state.orders.place_order(req).await?))
}

async fn get_order(
    State(state): State<ApiState>,
    Path(order_id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let order = state.orders.get_order(GetOrderRequest { order_id }).await?;
    Ok(Json(order))
}

async fn cancel_order(
    State(state): State<ApiState>,
    Path(order_id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let order = state
        .orders
        .cancel_order(CancelOrderRequest { order_id })
        .await?;
    Ok(Json(order))
}

async fn ship_order(
    State(state): State<ApiState>,
    Path(order_id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let order = state
        .orders
        .ship_order(ShipOrderRequest { order_id })
        .await?;
    Ok(Json(order))
}

async fn search_transactions(
    State(state): State<ApiState>,
) -> Result<Json<Vec<Transaction>>, ApiError> {
    let transactions = state
        .payments
        .search_transactions(SearchTransactionsCriteria::default())
        .await?;
    Ok(Json(transactions))
}

async fn get_transaction(
    State(state): State<ApiState>,
    Path(transaction_id): Path<String>,
) -> Result<Json<Transaction>, ApiError> {
    let transaction = state
        .payments
        .get_transaction(GetTransactionRequest { transaction_id })
        .await?;
    Ok(Json(transaction))
}

async fn chargeback(
    State(state): State<ApiState>,
    Path(transaction_id): Path<String>,
) -> Result<Json<Transaction>, ApiError> {
    let transaction = state
        .payments
        .chargeback(ChargebackRequest { transaction_id })
        .await?;
    Ok(Json(transaction))
}
