//! Read-only view of the published simulation
//!
//! Every instance, the driver included, renders from the mirror. It never
//! writes to the store.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::warn;

use crate::store::{decode, SessionStore, Slot};

use super::{GameState, Obstacle};

const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

/// Latest published state and obstacle
#[derive(Clone)]
pub struct SimulationMirror {
    state: watch::Receiver<GameState>,
    obstacle: watch::Receiver<Option<Obstacle>>,
}

/// Point-in-time copy of the mirror
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MirrorSnapshot {
    pub state: GameState,
    pub obstacle: Option<Obstacle>,
}

impl SimulationMirror {
    /// Start following the `state` and `obstacle` slots
    pub fn start(store: &SessionStore) -> Self {
        let (state_tx, state) = watch::channel(GameState::default());
        let (obstacle_tx, obstacle) = watch::channel(None);

        tokio::spawn(follow(store.clone(), Slot::State, state_tx, |raw| {
            decode::<GameState>(Slot::State, raw).unwrap_or_default()
        }));
        tokio::spawn(follow(store.clone(), Slot::Obstacle, obstacle_tx, |raw| {
            decode::<Obstacle>(Slot::Obstacle, raw)
        }));

        Self { state, obstacle }
    }

    pub fn state(&self) -> GameState {
        self.state.borrow().clone()
    }

    pub fn obstacle(&self) -> Option<Obstacle> {
        self.obstacle.borrow().clone()
    }

    pub fn snapshot(&self) -> MirrorSnapshot {
        MirrorSnapshot {
            state: self.state(),
            obstacle: self.obstacle(),
        }
    }

    /// Resolves on the next change to either slot
    pub async fn changed(&mut self) {
        tokio::select! {
            _ = self.state.changed() => {}
            _ = self.obstacle.changed() => {}
        }
    }
}

/// Convert a raw slot feed into typed values until nobody listens
async fn follow<T, F>(store: SessionStore, slot: Slot, tx: watch::Sender<T>, convert: F)
where
    T: PartialEq + Send + Sync + 'static,
    F: Fn(Option<serde_json::Value>) -> T + Send + 'static,
{
    while !tx.is_closed() {
        let mut raw_rx = match store.subscribe(slot).await {
            Ok(rx) => rx,
            Err(e) => {
                warn!(slot = ?slot, error = %e, "Mirror subscription failed, retrying");
                tokio::time::sleep(RESUBSCRIBE_DELAY).await;
                continue;
            }
        };

        loop {
            let value = convert(raw_rx.borrow_and_update().clone());
            tx.send_if_modified(|current| {
                if *current == value {
                    false
                } else {
                    *current = value;
                    true
                }
            });

            tokio::select! {
                changed = raw_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tx.closed() => return,
            }
        }
    }
}
