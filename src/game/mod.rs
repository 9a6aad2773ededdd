//! Game simulation modules

pub mod engine;
pub mod master;
pub mod milestones;
pub mod mirror;
pub mod tick;

pub use engine::{EngineConfig, EngineError, EngineHandle, SimulationEngine};
pub use master::GameMasterElector;
pub use mirror::SimulationMirror;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One of the three lanes. Serialized as its index (0 = left).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Lane {
    Left,
    #[default]
    Center,
    Right,
}

impl Lane {
    pub const ALL: [Lane; 3] = [Lane::Left, Lane::Center, Lane::Right];

    pub fn index(self) -> u8 {
        match self {
            Lane::Left => 0,
            Lane::Center => 1,
            Lane::Right => 2,
        }
    }
}

impl From<Lane> for u8 {
    fn from(lane: Lane) -> Self {
        lane.index()
    }
}

impl TryFrom<u8> for Lane {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Lane::Left),
            1 => Ok(Lane::Center),
            2 => Ok(Lane::Right),
            other => Err(format!("lane index out of range: {}", other)),
        }
    }
}

/// Lives at the start of a game and after every reset
pub const INITIAL_LIVES: u32 = 3;

/// The shared game state (the `state` slot)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    /// Lane the crowd currently steers into
    #[serde(rename = "position", default)]
    pub controlled_lane: Lane,
    #[serde(default)]
    pub score: u32,
    #[serde(default = "initial_lives")]
    pub lives: u32,
    #[serde(default)]
    pub combo: u32,
    #[serde(default)]
    pub is_game_over: bool,
    #[serde(default)]
    pub is_paused: bool,
    #[serde(default)]
    pub round: u32,
}

fn initial_lives() -> u32 {
    INITIAL_LIVES
}

impl Default for GameState {
    fn default() -> Self {
        Self {
            controlled_lane: Lane::Center,
            score: 0,
            lives: INITIAL_LIVES,
            combo: 0,
            is_game_over: false,
            is_paused: false,
            round: 0,
        }
    }
}

/// The live obstacle (the `obstacle` slot). At most one exists at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Obstacle {
    /// Fresh per spawn; guards the single collision check
    pub id: Uuid,
    /// One or two distinct lanes
    pub lanes: Vec<Lane>,
    /// Vertical position, growing toward the controlled entity
    pub y: f32,
    /// Distance travelled per tick
    pub speed: f32,
    pub width: f32,
    pub height: f32,
}

impl Obstacle {
    pub fn occupies(&self, lane: Lane) -> bool {
        self.lanes.contains(&lane)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn game_state_uses_the_client_field_names() {
        let state = GameState {
            controlled_lane: Lane::Right,
            score: 40,
            ..GameState::default()
        };
        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(
            value,
            json!({
                "position": 2,
                "score": 40,
                "lives": 3,
                "combo": 0,
                "isGameOver": false,
                "isPaused": false,
                "round": 0
            })
        );
    }

    #[test]
    fn partial_state_fills_in_initial_values() {
        let state: GameState = serde_json::from_value(json!({"score": 5})).unwrap();
        assert_eq!(state.lives, INITIAL_LIVES);
        assert_eq!(state.controlled_lane, Lane::Center);
        assert_eq!(state.score, 5);
    }

    #[test]
    fn out_of_range_lane_is_rejected() {
        assert!(serde_json::from_value::<Lane>(json!(3)).is_err());
        assert_eq!(serde_json::from_value::<Lane>(json!(0)).unwrap(), Lane::Left);
    }
}
