//! Request audit sink.
//!
//! Admitted requests are queued on a bounded channel and written by a
//! background task. Recording is best-effort and never fails the request
//! being audited.

use std::sync::Arc;

use phenolib_core::audit::{AuditRules, RemoteAddrPolicy};
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::db::AuditStore;
use crate::metrics::AUDIT_EVENTS_TOTAL;
use crate::models::RequestEvent;

pub struct AuditService {
    enabled: bool,
    rules: AuditRules,
    remote_addr: RemoteAddrPolicy,
    sender: mpsc::Sender<RequestEvent>,
}

impl AuditService {
    /// Spawn the writer task. Must be called inside a Tokio runtime.
    pub fn new(
        store: Arc<dyn AuditStore>,
        enabled: bool,
        rules: AuditRules,
        remote_addr: RemoteAddrPolicy,
        capacity: usize,
    ) -> Self {
        let (sender, mut receiver) = mpsc::channel::<RequestEvent>(capacity.max(1));

        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                match store.record_request(event).await {
                    Ok(()) => AUDIT_EVENTS_TOTAL.with_label_values(&["recorded"]).inc(),
                    Err(e) => {
                        AUDIT_EVENTS_TOTAL.with_label_values(&["failed"]).inc();
                        tracing::warn!("Failed to persist request event: {}", e);
                    }
                }
            }
        });

        tracing::info!(enabled, capacity, "Request audit sink initialized");

        Self {
            enabled,
            rules,
            remote_addr,
            sender,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn admits(&self, path: &str, brand: Option<&str>) -> bool {
        self.enabled && self.rules.admits(path, brand)
    }

    pub fn remote_addr_policy(&self) -> &RemoteAddrPolicy {
        &self.remote_addr
    }

    /// Queue an event without waiting. A full or closed queue drops it.
    pub fn submit(&self, event: RequestEvent) {
        match self.sender.try_send(event) {
            Ok(()) => AUDIT_EVENTS_TOTAL.with_label_values(&["queued"]).inc(),
            Err(TrySendError::Full(event)) => {
                AUDIT_EVENTS_TOTAL.with_label_values(&["dropped"]).inc();
                tracing::warn!(url = %event.url, "Audit queue full; dropping request event");
            }
            Err(TrySendError::Closed(_)) => {
                AUDIT_EVENTS_TOTAL.with_label_values(&["dropped"]).inc();
                tracing::warn!("Audit queue closed; dropping request event");
            }
        }
    }
}
