//! Applies order events to the read model.

use async_trait::async_trait;
use domain::{OrderEvent, OrderEventKind};
use event_bus::{Delivery, EventMessage, HandlerError, MessageHandler};

use crate::read_model::{OrderReadModel, ReadModelStore};
use crate::{ProjectionError, Result};

/// What applying one event did to the read model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionOutcome {
    /// The record was written.
    Applied,
    /// The event was already applied; nothing changed.
    Duplicate,
    /// The event kind is not one this projection knows.
    Skipped,
}

impl ProjectionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectionOutcome::Applied => "applied",
            ProjectionOutcome::Duplicate => "duplicate",
            ProjectionOutcome::Skipped => "skipped",
        }
    }
}

/// Folds order events into [`OrderReadModel`] records.
///
/// Every record remembers the last event version it absorbed. An event at or
/// below that version is a duplicate and is ignored; an event more than one
/// version ahead arrived early and is rejected with a retryable error until
/// the gap is filled. This makes redelivery of any event kind harmless,
/// item additions and removals included.
pub struct OrderProjection<S> {
    store: S,
}

impl<S: ReadModelStore> OrderProjection<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Decodes a bus message and applies it.
    ///
    /// Messages whose `event-type` header names an unknown kind are skipped
    /// without decoding the payload.
    pub async fn handle_message(&self, message: &EventMessage) -> Result<ProjectionOutcome> {
        if let Some(event_type) = message.event_type()
            && !OrderEvent::is_known(event_type)
        {
            tracing::info!(event_type, key = %message.key, "Skipping unknown event type");
            metrics::counter!("projection_events_applied_total", "outcome" => "skipped")
                .increment(1);
            return Ok(ProjectionOutcome::Skipped);
        }

        let event = OrderEvent::from_json(&message.payload)?;
        self.apply(&event).await
    }

    /// Applies one decoded event.
    #[tracing::instrument(
        skip(self, event),
        fields(order_id = %event.aggregate_id, event_type = event.kind.name(), version = %event.version)
    )]
    pub async fn apply(&self, event: &OrderEvent) -> Result<ProjectionOutcome> {
        let outcome = self.apply_event(event).await?;
        tracing::debug!(outcome = outcome.as_str(), "Projected event");
        metrics::counter!("projection_events_applied_total", "outcome" => outcome.as_str())
            .increment(1);
        Ok(outcome)
    }

    async fn apply_event(&self, event: &OrderEvent) -> Result<ProjectionOutcome> {
        let existing = self.store.get(&event.aggregate_id).await?;

        if let OrderEventKind::OrderCreated {
            customer_id,
            items,
            total_amount,
            shipping_address,
        } = &event.kind
        {
            if let Some(existing) = &existing
                && existing.last_applied_version >= event.version
            {
                return Ok(ProjectionOutcome::Duplicate);
            }

            let record = OrderReadModel {
                id: event.aggregate_id.clone(),
                customer_id: customer_id.clone(),
                status: domain::OrderStatus::Draft,
                total_amount: total_amount.clone(),
                shipping_address: shipping_address.clone(),
                items: items.clone(),
                created_at: event.occurred_at,
                updated_at: event.occurred_at,
                last_applied_version: event.version,
            };
            return self.save(&record).await;
        }

        let Some(mut record) = existing else {
            return Err(ProjectionError::NotFound(event.aggregate_id.clone()));
        };

        if event.version <= record.last_applied_version {
            return Ok(ProjectionOutcome::Duplicate);
        }
        let expected = record.last_applied_version.next();
        if event.version > expected {
            return Err(ProjectionError::OutOfOrder {
                aggregate_id: event.aggregate_id.clone(),
                expected,
                actual: event.version,
            });
        }

        match &event.kind {
            OrderEventKind::OrderCreated { .. } => {}
            OrderEventKind::OrderConfirmed { .. }
            | OrderEventKind::OrderShipped { .. }
            | OrderEventKind::OrderDelivered { .. }
            | OrderEventKind::OrderCancelled { .. } => {
                if let Some(status) = event.kind.target_status() {
                    record.status = status;
                }
            }
            OrderEventKind::OrderItemAdded {
                product_id,
                quantity,
                price,
            } => {
                record
                    .items
                    .push(domain::OrderItem::new(product_id.clone(), *quantity, price.clone()));
                record.recompute_total()?;
            }
            OrderEventKind::OrderItemRemoved { product_id } => {
                match record.items.iter().position(|item| &item.product_id == product_id) {
                    Some(index) => {
                        record.items.remove(index);
                    }
                    None => tracing::warn!(
                        product_id = %product_id,
                        "Removed product not in read model, total unchanged"
                    ),
                }
                record.recompute_total()?;
            }
        }

        record.advance(event.version, event.occurred_at);
        self.save(&record).await
    }

    async fn save(&self, record: &OrderReadModel) -> Result<ProjectionOutcome> {
        if self.store.upsert(record).await? {
            Ok(ProjectionOutcome::Applied)
        } else {
            // Another writer stored a newer version first.
            Ok(ProjectionOutcome::Duplicate)
        }
    }
}

impl From<ProjectionError> for HandlerError {
    fn from(error: ProjectionError) -> Self {
        if error.is_retryable() {
            HandlerError::retryable(error)
        } else {
            HandlerError::fatal(error)
        }
    }
}

#[async_trait]
impl<S: ReadModelStore> MessageHandler for OrderProjection<S> {
    async fn handle(&self, delivery: &Delivery) -> std::result::Result<(), HandlerError> {
        self.handle_message(&delivery.message).await?;
        Ok(())
    }
}
