//! Per-tick obstacle motion, collision band, scoring and spawning

use rand::Rng;
use uuid::Uuid;

use super::{GameState, Lane, Obstacle};

/// Playfield geometry and pacing
#[derive(Debug, Clone, Copy)]
pub struct SimulationConfig {
    /// Height of the playfield
    pub game_height: f32,
    /// Width of one lane
    pub lane_width: f32,
    /// Obstacle speed at round zero, in units per tick
    pub base_speed: f32,
    /// Where new obstacles appear
    pub spawn_y: f32,
    /// Obstacle height
    pub obstacle_height: f32,
    /// Chance that a spawn blocks two lanes instead of one
    pub two_lane_chance: f64,
    /// Rounds needed to add one base speed to the obstacle speed
    pub difficulty_rounds: f32,
    /// Upper bound of the speed multiplier
    pub max_speed_multiplier: f32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            game_height: 600.0,
            lane_width: 200.0,
            base_speed: 1.2,
            spawn_y: -50.0,
            obstacle_height: 40.0,
            two_lane_chance: 0.4,
            difficulty_rounds: 20.0,
            max_speed_multiplier: 1.8,
        }
    }
}

impl SimulationConfig {
    /// Vertical range in which the single collision check happens
    pub fn collision_band(&self) -> (f32, f32) {
        (self.game_height - 180.0, self.game_height - 20.0)
    }

    /// An obstacle past this line has left the playfield
    pub fn exit_boundary(&self) -> f32 {
        self.game_height + 50.0
    }

    /// Speed for an obstacle spawned in `round`
    pub fn speed_for_round(&self, round: u32) -> f32 {
        let multiplier = 1.0 + round as f32 / self.difficulty_rounds;
        self.base_speed * multiplier.min(self.max_speed_multiplier)
    }
}

/// Points for clearing an obstacle at the given (already incremented) combo
pub fn clear_points(combo: u32) -> u32 {
    let multiplier = combo / 5 + 1;
    10 * multiplier
}

/// The driver's explicit simulation record
#[derive(Debug, Clone, Default)]
pub struct SimulationState {
    pub game: GameState,
    pub obstacle: Option<Obstacle>,
    /// Id of the obstacle that already had its collision check
    checked: Option<Uuid>,
}

impl SimulationState {
    pub fn new(game: GameState, obstacle: Option<Obstacle>) -> Self {
        Self {
            game,
            obstacle,
            checked: None,
        }
    }

    /// The tick loop runs only while this holds
    pub fn is_active(&self) -> bool {
        !self.game.is_game_over && !self.game.is_paused && self.obstacle.is_some()
    }

    /// Full reset: initial game state and no live obstacle
    pub fn reset(&mut self) {
        self.game = GameState::default();
        self.obstacle = None;
        self.checked = None;
    }
}

/// What a tick did, so the caller knows what to publish and schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing to advance
    Idle,
    /// Obstacle moved, no game state change
    Advanced,
    /// Obstacle dodged and scored
    Cleared { points: u32 },
    /// Obstacle hit the controlled lane, lives remain
    Hit { lives: u32 },
    /// Obstacle hit and took the last life
    GameOver,
    /// Obstacle left the playfield without being evaluated
    Exited,
}

impl TickOutcome {
    /// Whether the game state changed and must be published
    pub fn changes_state(&self) -> bool {
        matches!(
            self,
            TickOutcome::Cleared { .. } | TickOutcome::Hit { .. } | TickOutcome::GameOver
        )
    }
}

/// Advance the simulation by one tick against the winning lane
pub fn tick(state: &mut SimulationState, winning: Lane, config: &SimulationConfig) -> TickOutcome {
    if !state.is_active() {
        return TickOutcome::Idle;
    }
    let Some(obstacle) = state.obstacle.as_mut() else {
        return TickOutcome::Idle;
    };

    let new_y = obstacle.y + obstacle.speed;
    let (band_top, band_bottom) = config.collision_band();
    let in_band = new_y >= band_top && new_y <= band_bottom;

    if in_band && state.checked != Some(obstacle.id) {
        state.checked = Some(obstacle.id);
        let collided = obstacle.occupies(winning);
        state.obstacle = None;

        let game = &mut state.game;
        if collided {
            game.lives = game.lives.saturating_sub(1);
            game.combo = 0;
            if game.lives == 0 {
                game.is_game_over = true;
                return TickOutcome::GameOver;
            }
            return TickOutcome::Hit { lives: game.lives };
        }

        game.combo += 1;
        let points = clear_points(game.combo);
        game.score += points;
        game.round += 1;
        return TickOutcome::Cleared { points };
    }

    if new_y > config.exit_boundary() {
        state.obstacle = None;
        return TickOutcome::Exited;
    }

    obstacle.y = new_y;
    TickOutcome::Advanced
}

/// Build a fresh obstacle for `round`: one lane with probability 0.6, two
/// distinct lanes otherwise.
pub fn spawn_obstacle<R: Rng>(rng: &mut R, round: u32, config: &SimulationConfig) -> Obstacle {
    let count = if rng.gen_bool(config.two_lane_chance) { 2 } else { 1 };

    let mut available = Lane::ALL.to_vec();
    let mut lanes = Vec::with_capacity(count);
    for _ in 0..count {
        let pick = rng.gen_range(0..available.len());
        lanes.push(available.swap_remove(pick));
    }

    Obstacle {
        id: Uuid::new_v4(),
        lanes,
        y: config.spawn_y,
        speed: config.speed_for_round(round),
        width: config.lane_width - 20.0,
        height: config.obstacle_height,
    }
}
