//! Command handling infrastructure.

use std::marker::PhantomData;

use common::AggregateId;
use write_store::{AggregateRecord, EventId, EventRecord, UnitOfWork, Version, WriteStore};

use crate::aggregate::{Aggregate, DomainEvent};
use crate::error::DomainError;

/// Result of command execution.
#[derive(Debug)]
pub struct CommandResult<A: Aggregate> {
    /// The aggregate after applying the new events.
    pub aggregate: A,

    /// The events that were generated and committed.
    pub events: Vec<A::Event>,

    /// The new version of the aggregate after the command.
    pub new_version: Version,
}

/// Trait for commands that can be executed against an aggregate.
pub trait Command: Send + Sync {
    /// The type of aggregate this command targets.
    type Aggregate: Aggregate;

    /// Returns the ID of the aggregate this command targets.
    fn aggregate_id(&self) -> &AggregateId;
}

/// Handler for executing commands against aggregates.
///
/// The handler is responsible for:
/// 1. Loading the current aggregate record
/// 2. Running the command to produce events
/// 3. Committing the new record, the event-log rows and the outbox rows as
///    one unit of work, guarded by the version that was loaded
pub struct CommandHandler<S, A>
where
    S: WriteStore,
    A: Aggregate,
{
    store: S,
    _phantom: PhantomData<A>,
}

impl<S, A> CommandHandler<S, A>
where
    S: WriteStore,
    A: Aggregate,
{
    /// Creates a new command handler with the given store.
    pub fn new(store: S) -> Self {
        Self {
            store,
            _phantom: PhantomData,
        }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Loads the stored state of an aggregate.
    pub async fn load(&self, aggregate_id: &AggregateId) -> Result<Option<A>, DomainError> {
        match self.store.load_aggregate(aggregate_id).await? {
            Some(record) => Ok(Some(record.into_state()?)),
            None => Ok(None),
        }
    }

    /// Rebuilds an aggregate from its event log instead of its record.
    pub async fn replay(&self, aggregate_id: &AggregateId) -> Result<Option<A>, DomainError> {
        let events = self.history(aggregate_id).await?;
        if events.is_empty() {
            return Ok(None);
        }
        let mut aggregate = A::default();
        aggregate.apply_events(events);
        Ok(Some(aggregate))
    }

    /// Returns the logged events of an aggregate, oldest first.
    pub async fn history(&self, aggregate_id: &AggregateId) -> Result<Vec<A::Event>, DomainError> {
        self.store
            .events_for_aggregate(aggregate_id)
            .await?
            .into_iter()
            .map(|record| serde_json::from_value(record.event_data).map_err(DomainError::from))
            .collect()
    }

    /// Runs a command against an aggregate that must not exist yet.
    pub async fn create<F>(
        &self,
        aggregate_id: &AggregateId,
        command_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: FnOnce(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        let current = self.load(aggregate_id).await?.unwrap_or_default();
        self.commit(aggregate_id, current, command_fn).await
    }

    /// Runs a command against an existing aggregate.
    ///
    /// Fails with `AggregateNotFound` if there is no record for the id.
    pub async fn execute<F>(
        &self,
        aggregate_id: &AggregateId,
        command_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: FnOnce(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        let current =
            self.load(aggregate_id)
                .await?
                .ok_or_else(|| DomainError::AggregateNotFound {
                    aggregate_type: A::aggregate_type(),
                    aggregate_id: aggregate_id.to_string(),
                })?;
        self.commit(aggregate_id, current, command_fn).await
    }

    async fn commit<F>(
        &self,
        aggregate_id: &AggregateId,
        current: A,
        command_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: FnOnce(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        let expected_version = current.version();
        let events = command_fn(&current)?;

        if events.is_empty() {
            return Ok(CommandResult {
                aggregate: current,
                events: vec![],
                new_version: expected_version,
            });
        }

        let mut aggregate = current;
        aggregate.apply_events(events.iter().cloned());

        let records = self.build_records(aggregate_id, &events)?;
        let record = AggregateRecord::from_state(
            aggregate_id.clone(),
            A::aggregate_type(),
            aggregate.version(),
            &aggregate,
        )?;

        let new_version = self
            .store
            .commit(UnitOfWork::new(record, expected_version, records))
            .await?;

        tracing::debug!(
            aggregate_id = %aggregate_id,
            aggregate_type = A::aggregate_type(),
            events = events.len(),
            version = %new_version,
            "Command committed"
        );

        Ok(CommandResult {
            aggregate,
            events,
            new_version,
        })
    }

    /// Builds event-log rows from domain events.
    fn build_records(
        &self,
        aggregate_id: &AggregateId,
        events: &[A::Event],
    ) -> Result<Vec<EventRecord>, DomainError> {
        events
            .iter()
            .map(|event| {
                Ok(EventRecord::builder()
                    .event_id(EventId::new())
                    .aggregate_id(aggregate_id.clone())
                    .aggregate_type(A::aggregate_type())
                    .event_type(event.event_type())
                    .version(event.version())
                    .occurred_at(event.occurred_at())
                    .event_data(event)?
                    .build())
            })
            .collect()
    }
}
