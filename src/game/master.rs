//! Game master election over the shared `gameMaster` lease
//!
//! Best-effort and not linearizable. Two instances may briefly both believe
//! they drive the simulation; every slot they write is whole-object
//! last-writer-wins, so the overlap only duplicates or overwrites writes.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::store::{decode, SessionStore, Slot};
use crate::util::time::{unix_millis, HEARTBEAT_INTERVAL, LEASE_STALE_AFTER_MS};

const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

/// Source of lease timestamps, ms since the Unix epoch
pub type LeaseClock = Arc<dyn Fn() -> u64 + Send + Sync>;

/// The `gameMaster` slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// Last heartbeat, ms since the Unix epoch
    pub timestamp: u64,
    /// Held by the designated primary instance
    #[serde(rename = "isPrimary", alias = "isOfficial")]
    pub is_primary: bool,
    /// Instance that wrote the lease. Older writers omit it.
    #[serde(default)]
    pub holder: Uuid,
}

/// What a candidate does about an observed lease
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Write a fresh temporary lease and drive
    Claim,
    /// Our own lease, keep driving
    Keep,
    /// Someone else drives
    Observe,
}

/// Decide a candidate's move. A primary lease is never challenged, however
/// old it is.
pub fn evaluate(lease: Option<&Lease>, me: Uuid, now: u64, stale_after_ms: u64) -> Verdict {
    let Some(lease) = lease else {
        return Verdict::Claim;
    };
    if lease.is_primary {
        return if lease.holder == me {
            Verdict::Keep
        } else {
            Verdict::Observe
        };
    }
    if now.saturating_sub(lease.timestamp) > stale_after_ms {
        return Verdict::Claim;
    }
    if lease.holder == me {
        Verdict::Keep
    } else {
        Verdict::Observe
    }
}

/// Elects the driver among all instances sharing one session
pub struct GameMasterElector {
    store: SessionStore,
    instance_id: Uuid,
    is_primary: bool,
    driver_tx: watch::Sender<bool>,
    heartbeat: Duration,
    stale_after_ms: u64,
    clock: LeaseClock,
}

impl GameMasterElector {
    /// Create an elector and the driver flag it maintains
    pub fn new(
        store: SessionStore,
        instance_id: Uuid,
        is_primary: bool,
    ) -> (Self, watch::Receiver<bool>) {
        let (driver_tx, driver_rx) = watch::channel(false);
        let elector = Self {
            store,
            instance_id,
            is_primary,
            driver_tx,
            heartbeat: HEARTBEAT_INTERVAL,
            stale_after_ms: LEASE_STALE_AFTER_MS,
            clock: Arc::new(unix_millis),
        };
        (elector, driver_rx)
    }

    /// Stamp and judge leases with `clock` instead of the wall clock
    #[cfg(test)]
    fn with_clock(mut self, clock: LeaseClock) -> Self {
        self.clock = clock;
        self
    }

    fn is_driver(&self) -> bool {
        *self.driver_tx.borrow()
    }

    fn set_driver(&self, driver: bool) {
        let changed = self.driver_tx.send_if_modified(|current| {
            if *current == driver {
                false
            } else {
                *current = driver;
                true
            }
        });
        if changed {
            info!(
                instance_id = %self.instance_id,
                primary = self.is_primary,
                driver,
                "Driver status changed"
            );
        }
    }

    /// Write a lease stamped now under our id
    async fn write_lease(&self) -> bool {
        let lease = Lease {
            timestamp: (self.clock)(),
            is_primary: self.is_primary,
            holder: self.instance_id,
        };
        match self.store.write(Slot::GameMaster, &lease).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Failed to write game master lease");
                false
            }
        }
    }

    async fn react(&self, lease: Option<Lease>) {
        if self.is_primary {
            // The primary takes over on startup and never yields
            return;
        }
        match evaluate(lease.as_ref(), self.instance_id, (self.clock)(), self.stale_after_ms) {
            Verdict::Claim => {
                debug!(instance_id = %self.instance_id, "Claiming vacant or stale lease");
                if self.write_lease().await {
                    self.set_driver(true);
                }
            }
            Verdict::Keep => self.set_driver(true),
            Verdict::Observe => self.set_driver(false),
        }
    }

    /// Run until every driver flag receiver is gone
    pub async fn run(self) {
        info!(
            instance_id = %self.instance_id,
            primary = self.is_primary,
            "Game master elector started"
        );

        if self.is_primary {
            // Overwrites whatever lease exists
            self.write_lease().await;
            self.set_driver(true);
        }

        let mut heartbeat = interval(self.heartbeat);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
        heartbeat.tick().await;

        'subscription: while !self.driver_tx.is_closed() {
            let mut lease_rx = match self.store.subscribe(Slot::GameMaster).await {
                Ok(rx) => rx,
                Err(e) => {
                    warn!(error = %e, "Lease subscription failed, retrying");
                    tokio::time::sleep(RESUBSCRIBE_DELAY).await;
                    continue;
                }
            };

            let current = lease_rx.borrow_and_update().clone();
            self.react(decode(Slot::GameMaster, current)).await;

            loop {
                tokio::select! {
                    changed = lease_rx.changed() => {
                        if changed.is_err() {
                            continue 'subscription;
                        }
                        let lease = lease_rx.borrow_and_update().clone();
                        self.react(decode(Slot::GameMaster, lease)).await;
                    }
                    _ = heartbeat.tick() => {
                        if self.is_driver() {
                            self.write_lease().await;
                        } else {
                            // Staleness only shows with time, not with a push
                            let lease = lease_rx.borrow().clone();
                            self.react(decode(Slot::GameMaster, lease)).await;
                        }
                    }
                    _ = self.driver_tx.closed() => break 'subscription,
                }
            }
        }

        info!(instance_id = %self.instance_id, "Game master elector stopped");
    }
}
