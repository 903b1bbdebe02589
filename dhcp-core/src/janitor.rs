//! # Janitor
//!
//! Periodic sweep removing expired non-static leases and publishing
//! `lease_expiration` gauge metrics, under the same serializer lock the
//! Handler uses (spec §4.6, §5).

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::lease::{self, EXPIRY_GRACE};
use crate::metrics::LEASE_EXPIRATION;
use crate::store::LeaseStore;

/// default interval between sweeps (spec §4.6)
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// the periodic expired-lease reaper
#[derive(Debug)]
pub struct Janitor<S> {
    store: Arc<S>,
    lock: Arc<Mutex<()>>,
}

impl<S: LeaseStore> Janitor<S> {
    /// build a new Janitor sharing `lock` with the Handler
    pub fn new(store: Arc<S>, lock: Arc<Mutex<()>>) -> Self {
        Self { store, lock }
    }

    /// run one sweep: list all leases, delete expired non-static ones,
    /// and publish the `lease_expiration` gauge for every surviving one
    pub async fn sweep(&self) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let now = SystemTime::now();
        let leases = self.store.list_leases().await?;
        debug!(count = leases.len(), "janitor sweep starting");

        for lease in leases {
            let Some(status) = &lease.status else {
                continue;
            };
            let ends = lease::parse_unix_seconds(&status.ends).unwrap_or(now);
            let remaining = match ends.duration_since(now) {
                Ok(d) => d.as_secs_f64(),
                Err(_) => -now.duration_since(ends).unwrap_or(Duration::ZERO).as_secs_f64(),
            };
            LEASE_EXPIRATION
                .with_label_values(&[
                    lease.spec.ip.as_str(),
                    lease.spec.mac.as_str(),
                    lease.spec.pool.as_str(),
                    status.hostname.as_str(),
                ])
                .set(remaining);

            if lease.spec.is_static {
                continue;
            }
            if ends + EXPIRY_GRACE <= now
                && let Err(err) = self.store.delete_lease(&lease.spec.ip).await
            {
                error!(%err, ip = %lease.spec.ip, "janitor failed to delete expired lease");
            } else if ends + EXPIRY_GRACE <= now {
                debug!(ip = %lease.spec.ip, mac = %lease.spec.mac, "janitor reaped expired lease");
            }
        }
        Ok(())
    }

    /// run sweeps on `interval` until `token` is cancelled
    pub async fn run(self: Arc<Self>, interval: Duration, token: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.sweep().await {
                        error!(%err, "janitor sweep failed");
                    }
                }
                _ = token.cancelled() => {
                    info!("janitor shutting down");
                    break;
                }
            }
        }
    }
}
