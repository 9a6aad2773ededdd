//! Driver-only authoritative tick loop
//!
//! The engine task runs on every instance but only touches the shared
//! `state` and `obstacle` slots while the elector says this instance is the
//! driver. It owns one explicit [`SimulationState`] record, advances it in
//! place, and publishes whole-slot snapshots after every change.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::store::{SessionStore, Slot, StoreError};
use crate::util::time::tick_duration;
use crate::voting::VoteAggregator;

use super::tick::{spawn_obstacle, tick, SimulationConfig, SimulationState, TickOutcome};
use super::{GameState, Lane, Obstacle};

/// Cool-down between an obstacle resolving and the next one spawning
pub const SPAWN_DELAY: Duration = Duration::from_millis(300);

/// Time the game-over screen stays up before the automatic reset
pub const GAME_OVER_DELAY: Duration = Duration::from_millis(2_000);

/// Engine timing and playfield settings
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub tick_rate: u32,
    pub spawn_delay: Duration,
    pub game_over_delay: Duration,
    pub simulation: SimulationConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_rate: crate::util::time::DEFAULT_TICK_RATE,
            spawn_delay: SPAWN_DELAY,
            game_over_delay: GAME_OVER_DELAY,
            simulation: SimulationConfig::default(),
        }
    }
}

/// Commands accepted from the presentation layer
#[derive(Debug)]
pub enum EngineCommand {
    TogglePause {
        reply: oneshot::Sender<Result<GameState, EngineError>>,
    },
    Reset {
        reply: oneshot::Sender<Result<GameState, EngineError>>,
    },
}

/// Work deferred to a later point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FollowUp {
    /// Reset the vote tally and spawn the next obstacle
    NextRound,
    /// Leave the game-over screen with a full reset
    AutoReset,
}

/// Handle for sending commands to a running engine
#[derive(Clone)]
pub struct EngineHandle {
    command_tx: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    pub async fn toggle_pause(&self) -> Result<GameState, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::TogglePause { reply }).await?;
        rx.await.map_err(|_| EngineError::Stopped)?
    }

    pub async fn reset(&self) -> Result<GameState, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::Reset { reply }).await?;
        rx.await.map_err(|_| EngineError::Stopped)?
    }

    async fn send(&self, command: EngineCommand) -> Result<(), EngineError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| EngineError::Stopped)
    }
}

/// The authoritative simulation engine
pub struct SimulationEngine {
    instance_id: Uuid,
    config: EngineConfig,
    sim: SimulationState,
    store: SessionStore,
    votes: VoteAggregator,
    driver: watch::Receiver<bool>,
    winner: watch::Receiver<Lane>,
    command_rx: mpsc::Receiver<EngineCommand>,
    pending: Option<(Instant, FollowUp)>,
    rng: ChaCha8Rng,
}

impl SimulationEngine {
    /// Create a new engine
    pub fn new(
        instance_id: Uuid,
        config: EngineConfig,
        store: SessionStore,
        votes: VoteAggregator,
        driver: watch::Receiver<bool>,
        winner: watch::Receiver<Lane>,
    ) -> (Self, EngineHandle) {
        let (command_tx, command_rx) = mpsc::channel(32);

        let engine = Self {
            instance_id,
            config,
            sim: SimulationState::default(),
            store,
            votes,
            driver,
            winner,
            command_rx,
            pending: None,
            rng: ChaCha8Rng::from_entropy(),
        };

        (engine, EngineHandle { command_tx })
    }

    fn is_driver(&self) -> bool {
        *self.driver.borrow()
    }

    /// Run until the elector or the command channel goes away
    pub async fn run(mut self) {
        info!(instance_id = %self.instance_id, "Simulation engine started");

        let mut ticker = interval(tick_duration(self.config.tick_rate));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        if *self.driver.borrow_and_update() {
            self.take_over().await;
        }

        loop {
            let active = self.is_driver() && self.sim.is_active();
            let due = self.pending.map(|(at, _)| at);

            tokio::select! {
                changed = self.driver.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if *self.driver.borrow_and_update() {
                        self.take_over().await;
                    } else {
                        self.step_down();
                    }
                }
                changed = self.winner.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let lane = *self.winner.borrow_and_update();
                    self.sync_lane(lane).await;
                }
                command = self.command_rx.recv() => {
                    match command {
                        Some(command) => self.handle_command(command).await,
                        None => break,
                    }
                }
                _ = sleep_until(due.unwrap_or_else(Instant::now)), if due.is_some() => {
                    self.run_follow_up().await;
                }
                _ = ticker.tick(), if active => {
                    self.step().await;
                }
            }
        }

        info!(instance_id = %self.instance_id, "Simulation engine stopped");
    }

    /// Adopt the published state after winning the election
    async fn take_over(&mut self) {
        let (game, loaded) = match self.store.read::<GameState>(Slot::State).await {
            Ok(Some(game)) => (game, true),
            Ok(None) => (GameState::default(), false),
            Err(e) => {
                warn!(error = %e, "Could not load game state, starting fresh");
                (GameState::default(), false)
            }
        };
        let obstacle = self
            .store
            .read::<Obstacle>(Slot::Obstacle)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "Could not load obstacle");
                None
            });

        self.sim = SimulationState::new(game, obstacle);
        self.pending = None;

        // The stored lane may predate the current vote
        let winning = *self.winner.borrow_and_update();
        if !loaded || self.sim.game.controlled_lane != winning {
            self.sim.game.controlled_lane = winning;
            self.publish_state().await;
        }

        info!(
            instance_id = %self.instance_id,
            score = self.sim.game.score,
            lives = self.sim.game.lives,
            round = self.sim.game.round,
            "Took over simulation"
        );

        if self.sim.game.is_game_over {
            self.schedule(self.config.game_over_delay, FollowUp::AutoReset);
        } else if self.sim.obstacle.is_none() {
            self.spawn().await;
        }
    }

    /// Stop touching the shared slots. In-flight writes are not retracted.
    fn step_down(&mut self) {
        self.pending = None;
        info!(instance_id = %self.instance_id, "Stepped down from simulation");
    }

    /// Mirror the winning lane into the published state
    async fn sync_lane(&mut self, lane: Lane) {
        if !self.is_driver() || self.sim.game.controlled_lane == lane {
            return;
        }
        self.sim.game.controlled_lane = lane;
        self.publish_state().await;
    }

    async fn step(&mut self) {
        if !self.is_driver() {
            return;
        }

        let winning = *self.winner.borrow();
        let outcome = tick(&mut self.sim, winning, &self.config.simulation);

        if outcome.changes_state() {
            self.publish_state().await;
        }
        if outcome == TickOutcome::Idle {
            return;
        }
        self.publish_obstacle().await;

        match outcome {
            TickOutcome::Cleared { points } => {
                debug!(
                    points,
                    score = self.sim.game.score,
                    combo = self.sim.game.combo,
                    "Obstacle cleared"
                );
                self.schedule(self.config.spawn_delay, FollowUp::NextRound);
            }
            TickOutcome::Hit { lives } => {
                debug!(lives, "Obstacle hit");
                self.schedule(self.config.spawn_delay, FollowUp::NextRound);
            }
            TickOutcome::GameOver => {
                info!(score = self.sim.game.score, round = self.sim.game.round, "Game over");
                self.schedule(self.config.game_over_delay, FollowUp::AutoReset);
            }
            TickOutcome::Exited => {
                debug!("Obstacle left the playfield unchecked");
                self.schedule(self.config.spawn_delay, FollowUp::NextRound);
            }
            TickOutcome::Advanced | TickOutcome::Idle => {}
        }
    }

    fn schedule(&mut self, delay: Duration, follow_up: FollowUp) {
        self.pending = Some((Instant::now() + delay, follow_up));
    }

    async fn run_follow_up(&mut self) {
        let Some((_, follow_up)) = self.pending.take() else {
            return;
        };
        if !self.is_driver() {
            return;
        }

        match follow_up {
            FollowUp::NextRound => {
                if let Err(e) = self.votes.reset_votes().await {
                    warn!(error = %e, "Failed to reset votes for the new round");
                }
                self.spawn().await;
            }
            FollowUp::AutoReset => {
                info!("Resetting after game over");
                self.reset_simulation();
                self.publish_state().await;
                self.publish_obstacle().await;
                self.schedule(self.config.spawn_delay, FollowUp::NextRound);
            }
        }
    }

    /// Full reset. The lane stays on the current winner, which is sticky
    /// across the reset.
    fn reset_simulation(&mut self) {
        self.sim.reset();
        self.sim.game.controlled_lane = *self.winner.borrow();
    }

    /// Create the next obstacle unless one is still live
    async fn spawn(&mut self) {
        if self.sim.obstacle.is_some() || self.sim.game.is_game_over {
            return;
        }
        let obstacle = spawn_obstacle(&mut self.rng, self.sim.game.round, &self.config.simulation);
        debug!(
            obstacle_id = %obstacle.id,
            lanes = ?obstacle.lanes,
            speed = obstacle.speed,
            "Spawned obstacle"
        );
        self.sim.obstacle = Some(obstacle);
        self.publish_obstacle().await;
    }

    async fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::TogglePause { reply } => {
                let result = self.toggle_pause().await;
                let _ = reply.send(result);
            }
            EngineCommand::Reset { reply } => {
                let result = self.reset().await;
                let _ = reply.send(result);
            }
        }
    }

    async fn toggle_pause(&mut self) -> Result<GameState, EngineError> {
        if !self.is_driver() {
            return Err(EngineError::NotDriver);
        }
        self.sim.game.is_paused = !self.sim.game.is_paused;
        info!(paused = self.sim.game.is_paused, "Pause toggled");
        self.try_publish_state().await?;
        Ok(self.sim.game.clone())
    }

    async fn reset(&mut self) -> Result<GameState, EngineError> {
        if !self.is_driver() {
            return Err(EngineError::NotDriver);
        }
        info!("Manual reset");
        self.reset_simulation();
        self.schedule(self.config.spawn_delay, FollowUp::NextRound);
        self.try_publish_state().await?;
        self.store
            .clear(Slot::Obstacle)
            .await
            .map_err(EngineError::NotSynchronized)?;
        Ok(self.sim.game.clone())
    }

    async fn try_publish_state(&self) -> Result<(), EngineError> {
        self.store
            .write(Slot::State, &self.sim.game)
            .await
            .map_err(EngineError::NotSynchronized)
    }

    async fn publish_state(&self) {
        if let Err(e) = self.try_publish_state().await {
            warn!(error = %e, "Game state not yet synchronized");
        }
    }

    async fn publish_obstacle(&self) {
        let result = match &self.sim.obstacle {
            Some(obstacle) => self.store.write(Slot::Obstacle, obstacle).await,
            None => self.store.clear(Slot::Obstacle).await,
        };
        if let Err(e) = result {
            warn!(error = %e, "Obstacle not yet synchronized");
        }
    }
}

/// Engine errors surfaced to command callers
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("This instance is not the game master")]
    NotDriver,

    #[error("State not yet synchronized: {0}")]
    NotSynchronized(StoreError),

    #[error("Simulation engine is not running")]
    Stopped,
}
