//! Fire-and-forget invalidation.
//!
//! Request paths enqueue events without awaiting the store; a single worker
//! drains the channel and runs them through the [`InvalidationEngine`].

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use super::engine::InvalidationEngine;
use super::events::InvalidationEvent;

#[derive(Clone)]
pub struct InvalidationQueue {
    sender: mpsc::Sender<InvalidationEvent>,
}

impl InvalidationQueue {
    /// Spawn the worker. It exits once every queue handle is dropped and the
    /// remaining events are processed.
    pub fn start(engine: Arc<InvalidationEngine>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::channel::<InvalidationEvent>(capacity.max(1));
        let worker = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                let removed = engine.invalidate(&event).await;
                tracing::debug!(event = %event.name(), removed, "queued invalidation processed");
            }
            tracing::debug!("invalidation queue closed");
        });
        (Self { sender }, worker)
    }

    /// Enqueue without waiting. Returns false when the event was dropped.
    pub fn enqueue(&self, event: InvalidationEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                tracing::warn!(event = %event.name(), "invalidation queue full, dropping event");
                false
            }
            Err(TrySendError::Closed(event)) => {
                tracing::warn!(event = %event.name(), "invalidation queue closed, dropping event");
                false
            }
        }
    }
}
