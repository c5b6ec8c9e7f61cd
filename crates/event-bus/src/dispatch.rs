use chrono::Utc;
use tokio::sync::watch;

use crate::{DeadLetter, DeadLetterSink, Delivery, HandlerError, MessageHandler, Result, RetryPolicy};

/// What happened to a delivery handed to [`deliver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The handler succeeded.
    Handled { attempts: u32 },
    /// The message was moved to the dead-letter sink.
    DeadLettered { attempts: u32, reason: String },
    /// Shutdown arrived while waiting to retry. The message is left
    /// uncommitted and will be delivered again.
    Cancelled { attempts: u32 },
}

impl DeliveryOutcome {
    /// True when the subscriber should commit past this delivery.
    pub fn should_commit(&self) -> bool {
        !matches!(self, DeliveryOutcome::Cancelled { .. })
    }
}

/// Runs `handler` on `delivery` until it succeeds, fails fatally, or
/// exhausts `policy`.
///
/// Retries happen in place so later messages on the same partition cannot
/// overtake this one. A fatal failure is dead-lettered at once; a retryable
/// one after `max_attempts` calls. A shutdown signal is honoured only while
/// sleeping between attempts, never during a handler call.
///
/// Returns an error only if the dead-letter sink itself fails, in which case
/// the delivery must not be committed.
pub async fn deliver(
    handler: &dyn MessageHandler,
    delivery: &Delivery,
    policy: &RetryPolicy,
    dead_letters: &dyn DeadLetterSink,
    shutdown: &watch::Receiver<bool>,
) -> Result<DeliveryOutcome> {
    let mut shutdown = shutdown.clone();
    let mut attempts = 0;

    loop {
        attempts += 1;
        let error = match handler.handle(delivery).await {
            Ok(()) => return Ok(DeliveryOutcome::Handled { attempts }),
            Err(error) => error,
        };

        let (reason, fatal) = match error {
            HandlerError::Fatal(reason) => (reason, true),
            HandlerError::Retryable(reason) if attempts >= policy.max_attempts => (reason, false),
            HandlerError::Retryable(reason) => {
                let backoff = policy.backoff_after(attempts);
                tracing::warn!(
                    topic = %delivery.topic,
                    partition = delivery.partition,
                    offset = delivery.offset,
                    attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %reason,
                    "Handler failed, retrying"
                );

                if *shutdown.borrow() {
                    return Ok(DeliveryOutcome::Cancelled { attempts });
                }
                let cancelled = tokio::select! {
                    _ = tokio::time::sleep(backoff) => false,
                    changed = shutdown.changed() => match changed {
                        Ok(()) => *shutdown.borrow(),
                        Err(_) => {
                            tokio::time::sleep(backoff).await;
                            false
                        }
                    },
                };
                if cancelled {
                    return Ok(DeliveryOutcome::Cancelled { attempts });
                }
                continue;
            }
        };

        tracing::warn!(
            topic = %delivery.topic,
            partition = delivery.partition,
            offset = delivery.offset,
            event_type = delivery.message.event_type().unwrap_or("unknown"),
            attempts,
            fatal,
            error = %reason,
            "Dead-lettering message"
        );

        dead_letters
            .send(DeadLetter {
                delivery: delivery.clone(),
                reason: reason.clone(),
                attempts,
                fatal,
                dead_lettered_at: Utc::now(),
            })
            .await?;

        metrics::counter!(
            "events_dead_lettered_total",
            "cause" => if fatal { "fatal" } else { "exhausted" }
        )
        .increment(1);

        return Ok(DeliveryOutcome::DeadLettered { attempts, reason });
    }
}
