//! Order command and query endpoints.
//!
//! Commands run against the write side and answer with the aggregate as
//! committed. Queries read the projected read model, which trails the
//! write side until the outbox has been drained and consumed.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::AggregateId;
use domain::{
    AddItem, Address, Aggregate, CancelOrder, CommandResult, ConfirmOrder, CreateOrder,
    CustomerId, DeliverOrder, DomainError, Money, Order, OrderEvent, OrderItem, OrderStatus,
    RemoveItem, ShipOrder,
};
use projections::{ListOrders, OrderReadModel};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    /// Client-chosen id; generated when absent.
    pub order_id: Option<String>,
    pub customer_id: String,
    pub items: Vec<OrderItem>,
    pub shipping_address: Address,
}

#[derive(Debug, Deserialize)]
pub struct CancelOrderRequest {
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct ListOrdersParams {
    pub customer_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

// -- Response types --

/// The write-side state of an order after a command.
#[derive(Debug, Serialize)]
pub struct OrderSummary {
    pub id: String,
    pub customer_id: Option<CustomerId>,
    pub status: OrderStatus,
    pub items: Vec<OrderItem>,
    pub total_amount: Money,
    pub shipping_address: Option<Address>,
    pub version: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<&Order> for OrderSummary {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id().map(ToString::to_string).unwrap_or_default(),
            customer_id: order.customer_id().cloned(),
            status: order.status(),
            items: order.items().to_vec(),
            total_amount: order.total().clone(),
            shipping_address: order.shipping_address().cloned(),
            version: order.version().as_i64(),
            created_at: order.created_at(),
            updated_at: order.updated_at(),
        }
    }
}

// -- Commands --

/// POST /orders: create a draft order.
#[tracing::instrument(skip(state, req))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderSummary>), ApiError> {
    let order_id = match req.order_id.as_deref() {
        Some(raw) => parse_order_id(raw)?,
        None => AggregateId::new(),
    };
    let cmd = CreateOrder::new(
        order_id,
        CustomerId::new(req.customer_id),
        req.items,
        req.shipping_address,
    );

    let result = state.orders.create_order(cmd).await;
    let summary = committed(&state, result)?;
    Ok((StatusCode::CREATED, summary))
}

/// POST /orders/{id}/items: add a line item to a draft order.
#[tracing::instrument(skip(state, item))]
pub async fn add_item(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(item): Json<OrderItem>,
) -> Result<Json<OrderSummary>, ApiError> {
    let cmd = AddItem::new(parse_order_id(&id)?, item);
    let result = state.orders.add_item(cmd).await;
    committed(&state, result)
}

/// DELETE /orders/{id}/items/{product_id}: remove a line item.
#[tracing::instrument(skip(state))]
pub async fn remove_item(
    State(state): State<Arc<AppState>>,
    Path((id, product_id)): Path<(String, String)>,
) -> Result<Json<OrderSummary>, ApiError> {
    let cmd = RemoveItem::new(parse_order_id(&id)?, product_id);
    let result = state.orders.remove_item(cmd).await;
    committed(&state, result)
}

/// POST /orders/{id}/confirm
#[tracing::instrument(skip(state))]
pub async fn confirm(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<OrderSummary>, ApiError> {
    let result = state
        .orders
        .confirm_order(ConfirmOrder::new(parse_order_id(&id)?))
        .await;
    committed(&state, result)
}

/// POST /orders/{id}/ship
#[tracing::instrument(skip(state))]
pub async fn ship(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<OrderSummary>, ApiError> {
    let result = state
        .orders
        .ship_order(ShipOrder::new(parse_order_id(&id)?))
        .await;
    committed(&state, result)
}

/// POST /orders/{id}/deliver
#[tracing::instrument(skip(state))]
pub async fn deliver(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<OrderSummary>, ApiError> {
    let result = state
        .orders
        .deliver_order(DeliverOrder::new(parse_order_id(&id)?))
        .await;
    committed(&state, result)
}

/// POST /orders/{id}/cancel: body `{"reason": "..."}`.
#[tracing::instrument(skip(state, req))]
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<CancelOrderRequest>,
) -> Result<Json<OrderSummary>, ApiError> {
    let result = state
        .orders
        .cancel_order(CancelOrder::new(parse_order_id(&id)?, req.reason))
        .await;
    committed(&state, result)
}

// -- Queries --

/// GET /orders/{id}: the projected order.
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<OrderReadModel>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let record = state
        .read_models
        .get(&order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Order {id} not found")))?;
    Ok(Json(record))
}

/// GET /orders?customer_id=&limit=&offset=: newest first.
#[tracing::instrument(skip(state))]
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListOrdersParams>,
) -> Result<Json<Vec<OrderReadModel>>, ApiError> {
    let mut query = match params.customer_id {
        Some(customer_id) if !customer_id.trim().is_empty() => {
            ListOrders::for_customer(CustomerId::new(customer_id))
        }
        _ => ListOrders::default(),
    };
    if let Some(limit) = params.limit {
        query = query.limit(limit);
    }
    if let Some(offset) = params.offset {
        query = query.offset(offset);
    }

    Ok(Json(state.read_models.list(&query).await?))
}

/// GET /orders/{id}/events: the audit log of an order, oldest first.
#[tracing::instrument(skip(state))]
pub async fn events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<OrderEvent>>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let events = state.orders.history(&order_id).await?;
    if events.is_empty() {
        return Err(ApiError::NotFound(format!("Order {id} not found")));
    }
    Ok(Json(events))
}

/// Wakes the publisher so committed events leave the outbox without
/// waiting for the next tick.
fn committed(
    state: &AppState,
    result: Result<CommandResult<Order>, DomainError>,
) -> Result<Json<OrderSummary>, ApiError> {
    let result = result?;
    state.publisher.drain_now();
    Ok(Json(OrderSummary::from(&result.aggregate)))
}

fn parse_order_id(raw: &str) -> Result<AggregateId, ApiError> {
    let id = AggregateId::from(raw.trim());
    if id.is_blank() {
        return Err(ApiError::BadRequest("Order id must not be blank".to_string()));
    }
    Ok(id)
}
