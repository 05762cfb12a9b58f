//! Logging setup and session event logging

use crate::config::LoggingConfig;
use crate::errors::sanitize;
use crate::pending::PendingTransaction;
use crate::reconcile::MergedEntry;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the configured filter; `verbose` raises the crate to
/// `trace` when no `RUST_LOG` is set.
pub fn init_logging(config: &LoggingConfig, verbose: bool) -> anyhow::Result<()> {
    let default_filter = if verbose {
        "info,transfer_engine=trace".to_string()
    } else {
        config.filter.clone()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
    };

    result.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {}", e))
}

/// Logs CLI session events under one correlation id
#[derive(Debug, Clone)]
pub struct SessionLogger {
    context_id: String,
}

impl SessionLogger {
    pub fn new() -> Self {
        Self {
            context_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    pub fn log_submitted(&self, tx: &PendingTransaction) {
        tracing::info!(
            context_id = %self.context_id,
            id = %tx.id,
            chain = %tx.chain,
            checkpoint = %tx.last_checkpoint,
            "Pending transaction recorded"
        );
    }

    pub fn log_failure(&self, error: &str) {
        tracing::warn!(
            context_id = %self.context_id,
            error = %sanitize(error),
            "Operation failed"
        );
    }

    pub fn log_view(&self, view: &[MergedEntry]) {
        let pending = view.iter().filter(|e| e.is_pending()).count();
        tracing::debug!(
            context_id = %self.context_id,
            pending,
            confirmed = view.len() - pending,
            "Reconciled view"
        );
    }
}

impl Default for SessionLogger {
    fn default() -> Self {
        Self::new()
    }
}
