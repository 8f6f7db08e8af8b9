use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::database::repository::PaymentRecordStore;
use crate::services::reconciler::{PaymentReconciler, WebhookOutcome};

/// Configuration for the pending-payment monitor.
#[derive(Debug, Clone)]
pub struct PaymentMonitorConfig {
    /// How often the worker wakes up to sweep pending records.
    pub poll_interval: Duration,
    /// Records younger than this are left alone; the webhook or the client
    /// redirect usually settles them within seconds.
    pub min_age: Duration,
    /// How far back (in hours) to look; older pending records are abandoned
    /// attempts not worth re-querying forever.
    pub monitoring_window_hours: i32,
    /// Maximum number of pending records fetched per cycle.
    pub batch_size: i64,
}

impl Default for PaymentMonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            min_age: Duration::from_secs(120),
            monitoring_window_hours: 24,
            batch_size: 100,
        }
    }
}

impl PaymentMonitorConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.poll_interval = Duration::from_secs(
            std::env::var("PAYMENT_MONITOR_POLL_INTERVAL_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(cfg.poll_interval.as_secs()),
        );
        cfg.min_age = Duration::from_secs(
            std::env::var("PAYMENT_MONITOR_MIN_AGE_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(cfg.min_age.as_secs()),
        );
        cfg.monitoring_window_hours = std::env::var("PAYMENT_MONITOR_WINDOW_HOURS")
            .ok()
            .and_then(|v| v.parse::<i32>().ok())
            .unwrap_or(cfg.monitoring_window_hours);
        cfg.batch_size = std::env::var("PAYMENT_MONITOR_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(cfg.batch_size);
        cfg
    }
}

/// Background sweep for payments whose webhook and client redirect were both
/// lost: periodically re-queries the gateway for aged pending records and
/// runs them through the same guarded settle path as every other trigger.
pub struct PaymentMonitorWorker {
    records: Arc<dyn PaymentRecordStore>,
    reconciler: Arc<PaymentReconciler>,
    config: PaymentMonitorConfig,
}

impl PaymentMonitorWorker {
    pub fn new(
        records: Arc<dyn PaymentRecordStore>,
        reconciler: Arc<PaymentReconciler>,
        config: PaymentMonitorConfig,
    ) -> Self {
        Self {
            records,
            reconciler,
            config,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            min_age_secs = self.config.min_age.as_secs(),
            monitoring_window_hours = self.config.monitoring_window_hours,
            "payment monitor worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("payment monitor worker stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.run_cycle().await {
                        warn!(error = %e, "payment monitor cycle failed");
                    }
                }
            }
        }

        info!("payment monitor worker stopped");
    }

    async fn run_cycle(&self) -> anyhow::Result<()> {
        let pending = self
            .records
            .find_pending_for_monitoring(
                self.config.monitoring_window_hours,
                self.config.min_age.as_secs() as i64,
                self.config.batch_size,
            )
            .await?;

        if pending.is_empty() {
            return Ok(());
        }

        info!(count = pending.len(), "re-checking aged pending payments");

        // One bad record must not abort the rest of the sweep.
        for record in pending {
            match self
                .reconciler
                .reconcile_pending_record(&record.request_id)
                .await
            {
                Ok(WebhookOutcome::CreditsApplied { balance }) => {
                    info!(
                        order_id = %record.request_id,
                        user_id = %record.user_id,
                        balance = balance,
                        "monitor settled a lost payment"
                    );
                }
                Ok(WebhookOutcome::MarkedFailed) => {
                    info!(order_id = %record.request_id, "monitor marked payment failed");
                }
                Ok(WebhookOutcome::AlreadyCompleted) | Ok(WebhookOutcome::Ignored) => {}
                Err(e) => {
                    warn!(
                        order_id = %record.request_id,
                        error = %e,
                        "monitor failed to reconcile payment"
                    );
                }
            }
        }

        Ok(())
    }
}
