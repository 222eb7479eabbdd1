use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use crate::api::{ApiError, Backend};
use crate::core::conversation::{ExchangeOutcome, OutboundExchange};

/// Outcome of a dispatched exchange, tagged with its id.
#[derive(Debug)]
pub struct ExchangeEvent {
    pub exchange_id: u64,
    pub outcome: ExchangeOutcome,
}

/// Runs chat requests on spawned tasks and reports their outcomes over a
/// channel.
#[derive(Clone)]
pub struct ExchangeService {
    tx: mpsc::UnboundedSender<ExchangeEvent>,
    backend: Arc<dyn Backend>,
    deadline: Duration,
}

impl ExchangeService {
    pub fn new(
        backend: Arc<dyn Backend>,
        deadline: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<ExchangeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                backend,
                deadline,
            },
            rx,
        )
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Dispatch `exchange`. Exactly one event is sent for it: the response,
    /// the request error, a timeout, or a cancellation.
    pub fn spawn_exchange(&self, exchange: OutboundExchange) {
        let tx = self.tx.clone();
        let backend = Arc::clone(&self.backend);
        let deadline = self.deadline;

        tokio::spawn(async move {
            let OutboundExchange {
                exchange_id,
                request,
                cancel_token,
            } = exchange;

            let result = tokio::select! {
                result = tokio::time::timeout(deadline, backend.send_chat(&request)) => {
                    match result {
                        Ok(result) => result,
                        Err(_) => Err(ApiError::Timeout(deadline)),
                    }
                }
                _ = cancel_token.cancelled() => Err(ApiError::Cancelled),
            };

            let outcome = match result {
                Ok(response) => ExchangeOutcome::Completed(response),
                Err(err) => ExchangeOutcome::Failed(err),
            };
            debug!(
                exchange_id,
                ok = matches!(outcome, ExchangeOutcome::Completed(_)),
                "Exchange finished"
            );

            // The receiver is gone once the app is dropped.
            let _ = tx.send(ExchangeEvent {
                exchange_id,
                outcome,
            });
        });
    }

    #[cfg(test)]
    pub fn send_for_test(&self, exchange_id: u64, outcome: ExchangeOutcome) {
        let _ = self.tx.send(ExchangeEvent {
            exchange_id,
            outcome,
        });
    }
}
