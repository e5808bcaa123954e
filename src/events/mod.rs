use crate::errors::ServiceError;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Domain events published after a stock change has been committed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    StockAdjusted {
        product_id: Uuid,
        branch_id: Uuid,
        requested_delta: i32,
        new_quantity: i32,
        reason: Option<String>,
    },
    TransferSubmitted {
        transfer_id: Uuid,
        source_branch_id: Uuid,
        destination_branch_id: Uuid,
        line_count: usize,
    },
    TransferCompleted {
        transfer_id: Uuid,
        source_branch_id: Uuid,
        destination_branch_id: Uuid,
        units_moved: i64,
    },
    TransferCancelled {
        transfer_id: Uuid,
    },
    StockLevelsChanged {
        product_id: Uuid,
        branch_id: Uuid,
        min_stock_level: Option<i32>,
        max_stock_level: Option<i32>,
    },
    LowStockDetected {
        product_id: Uuid,
        branch_id: Uuid,
        quantity: i32,
        min_stock_level: i32,
    },
    ScopeInvalidated {
        branch_id: Option<Uuid>,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::StockAdjusted { .. } => "stock_adjusted",
            Event::TransferSubmitted { .. } => "transfer_submitted",
            Event::TransferCompleted { .. } => "transfer_completed",
            Event::TransferCancelled { .. } => "transfer_cancelled",
            Event::StockLevelsChanged { .. } => "stock_levels_changed",
            Event::LowStockDetected { .. } => "low_stock_detected",
            Event::ScopeInvalidated { .. } => "scope_invalidated",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), ServiceError> {
        self.sender
            .send(event)
            .await
            .map_err(|e| ServiceError::EventError(format!("Failed to send event: {}", e)))
    }

    /// Sends an event whose delivery must not affect an already committed
    /// change. Failures are logged and dropped.
    pub async fn send_or_log(&self, event: Event) {
        let name = event.name();
        if let Err(e) = self.send(event).await {
            warn!(event = name, error = %e, "Event could not be published after commit");
        }
    }
}

/// Drains the event channel until every sender has been dropped
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::StockAdjusted {
                product_id,
                branch_id,
                requested_delta,
                new_quantity,
                ..
            } => {
                info!(
                    %product_id, %branch_id, requested_delta, new_quantity,
                    "Stock adjusted"
                );
            }
            Event::TransferSubmitted {
                transfer_id,
                line_count,
                ..
            } => {
                info!(%transfer_id, line_count, "Transfer submitted");
            }
            Event::TransferCompleted {
                transfer_id,
                source_branch_id,
                destination_branch_id,
                units_moved,
            } => {
                info!(
                    %transfer_id, %source_branch_id, %destination_branch_id, units_moved,
                    "Transfer completed"
                );
            }
            Event::TransferCancelled { transfer_id } => {
                info!(%transfer_id, "Transfer cancelled");
            }
            Event::LowStockDetected {
                product_id,
                branch_id,
                quantity,
                min_stock_level,
            } => {
                warn!(
                    %product_id, %branch_id, quantity, min_stock_level,
                    "Stock at or below minimum level"
                );
            }
            other => debug!(event = other.name(), "Received event: {:?}", other),
        }
    }

    info!("Event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_delivers_to_receiver() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);

        let transfer_id = Uuid::new_v4();
        sender
            .send(Event::TransferCancelled { transfer_id })
            .await
            .unwrap();

        assert_eq!(
            rx.recv().await,
            Some(Event::TransferCancelled { transfer_id })
        );
    }

    #[tokio::test]
    async fn send_fails_once_receiver_is_gone() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);

        let err = sender
            .send(Event::ScopeInvalidated { branch_id: None })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::EventError(ref msg) if msg.starts_with("Failed to send event")));

        // must not panic or surface the failure
        sender
            .send_or_log(Event::ScopeInvalidated { branch_id: None })
            .await;
    }
}
