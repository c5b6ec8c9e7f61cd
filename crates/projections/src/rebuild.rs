//! Re-projects the write-side event log into the read model.

use domain::OrderEvent;
use futures_util::StreamExt;
use write_store::{EventRecord, WriteStore};

use crate::{ProjectionError, Result};
use crate::handler::{OrderProjection, ProjectionOutcome};
use crate::read_model::ReadModelStore;

/// Counts from one rebuild.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildReport {
    pub events: u64,
    pub applied: u64,
    pub duplicates: u64,
    pub skipped: u64,
    /// Events that could not be decoded or applied.
    pub failed: u64,
}

/// Rebuilds the read model from the event log, for reconciliation outside
/// the bus.
pub struct ProjectionRebuilder<W, S> {
    log: W,
    projection: OrderProjection<S>,
}

impl<W, S> ProjectionRebuilder<W, S>
where
    W: WriteStore,
    S: ReadModelStore,
{
    pub fn new(log: W, store: S) -> Self {
        Self {
            log,
            projection: OrderProjection::new(store),
        }
    }

    /// Clears the read model, then replays every logged event through the
    /// projection.
    ///
    /// A single bad event is logged and counted, not fatal. Storage failures
    /// abort the rebuild.
    #[tracing::instrument(skip(self))]
    pub async fn rebuild(&self) -> Result<RebuildReport> {
        self.projection.store().clear().await?;
        let report = self.replay().await?;
        tracing::info!(
            events = report.events,
            applied = report.applied,
            duplicates = report.duplicates,
            skipped = report.skipped,
            failed = report.failed,
            "Read model rebuild complete"
        );
        Ok(report)
    }

    /// Replays the log over the current read model without clearing it.
    /// Already-applied events come back as duplicates.
    pub async fn replay(&self) -> Result<RebuildReport> {
        let mut report = RebuildReport::default();
        let mut stream = self.log.stream_all_events().await?;

        while let Some(record) = stream.next().await {
            let record = record?;
            report.events += 1;

            if !OrderEvent::is_known(&record.event_type) {
                report.skipped += 1;
                continue;
            }

            match self.apply(record).await {
                Ok(ProjectionOutcome::Applied) => report.applied += 1,
                Ok(ProjectionOutcome::Duplicate) => report.duplicates += 1,
                Ok(ProjectionOutcome::Skipped) => report.skipped += 1,
                Err(e) if is_storage_failure(&e) => return Err(e),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping event during rebuild");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    async fn apply(&self, record: EventRecord) -> Result<ProjectionOutcome> {
        let event: OrderEvent = serde_json::from_value(record.event_data)?;
        self.projection.apply(&event).await
    }
}

fn is_storage_failure(error: &ProjectionError) -> bool {
    matches!(
        error,
        ProjectionError::Storage(_)
            | ProjectionError::Unavailable(_)
            | ProjectionError::Cache(_)
            | ProjectionError::EventLog(_)
    )
}
