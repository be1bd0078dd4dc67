//! Background expiry of stale hosted checkouts.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::error::{GatewayError, StoreError};
use crate::models::TransactionStatus;
use crate::services::midtrans::PaymentGateway;
use crate::services::registration::PAYMENT_EXPIRY_HOURS;
use crate::services::repository::RegistrationStore;
use crate::services::webhook::{apply_event, GatewayEvent};

const BATCH_SIZE: i64 = 100;

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub examined: usize,
    /// Payments whose final status was confirmed by the gateway.
    pub reconfirmed: usize,
    pub expired: usize,
    /// Payments left for the next run because the gateway could not be asked.
    pub skipped: usize,
}

#[derive(Clone)]
pub struct ExpirySweeper {
    store: Arc<dyn RegistrationStore>,
    gateway: Arc<dyn PaymentGateway>,
    max_age: chrono::Duration,
}

impl ExpirySweeper {
    pub fn new(store: Arc<dyn RegistrationStore>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self {
            store,
            gateway,
            max_age: chrono::Duration::hours(i64::from(PAYMENT_EXPIRY_HOURS)),
        }
    }

    /// Settle every hosted checkout that has been pending longer than the
    /// checkout expiry.
    ///
    /// A final status reported by the gateway is applied as is. Orders the
    /// gateway still reports as pending, or no longer knows, expire.
    #[instrument(skip(self))]
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<SweepReport, StoreError> {
        let cutoff = now - self.max_age;
        let stale = self.store.stale_pending_payments(cutoff, BATCH_SIZE).await?;
        let mut report = SweepReport {
            examined: stale.len(),
            ..Default::default()
        };

        for payment in stale {
            let event = match self.gateway.status(&payment.order_id).await {
                Ok(transaction) => match GatewayEvent::from_transaction(&transaction) {
                    Some(event) if event.status != TransactionStatus::Pending => {
                        report.reconfirmed += 1;
                        event
                    }
                    _ => {
                        report.expired += 1;
                        GatewayEvent::new(TransactionStatus::Expire)
                    }
                },
                Err(GatewayError::OrderNotFound) => {
                    report.expired += 1;
                    GatewayEvent::new(TransactionStatus::Expire)
                }
                Err(e) => {
                    warn!(order_id = %payment.order_id, error = %e, "Gateway status unavailable");
                    report.skipped += 1;
                    continue;
                }
            };

            match apply_event(&*self.store, &payment.order_id, &event, now).await {
                Ok(_) => {}
                Err(StoreError::EmailTaken) => {
                    warn!(order_id = %payment.order_id, "Reconfirmed payment conflicts with a newer registration");
                }
                Err(e) => return Err(e),
            }
        }

        if report.examined > 0 {
            info!(
                examined = report.examined,
                reconfirmed = report.reconfirmed,
                expired = report.expired,
                skipped = report.skipped,
                "Expiry sweep finished"
            );
        }
        Ok(report)
    }

    /// Run the sweep every `interval` until `shutdown` flips to `true`.
    pub fn spawn(self, interval: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(interval_secs = interval.as_secs(), "Expiry sweep started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_once(Utc::now()).await {
                            warn!(error = %e, "Expiry sweep failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("Expiry sweep shutting down");
                            break;
                        }
                    }
                }
            }
        })
    }
}
