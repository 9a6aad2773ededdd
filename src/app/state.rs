//! Application state shared across routes

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::game::{
    EngineConfig, EngineHandle, GameMasterElector, GameState, Obstacle, SimulationEngine,
    SimulationMirror,
};
use crate::market::{MarketFeed, MarketStatus};
use crate::store::{SessionStore, SharedStore};
use crate::voting::{VoteAggregator, VoteFeed, VoteSummary};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub instance_id: Uuid,
    pub votes: VoteAggregator,
    pub vote_feed: VoteFeed,
    pub engine: EngineHandle,
    pub mirror: SimulationMirror,
    pub driver: watch::Receiver<bool>,
    pub market: watch::Receiver<MarketStatus>,
}

/// Everything a viewer renders, read from this instance's mirrors
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSnapshot {
    pub state: GameState,
    pub obstacle: Option<Obstacle>,
    pub votes: VoteSummary,
    pub is_driver: bool,
    pub market: MarketStatus,
}

impl AppState {
    /// Wire up and spawn every component of one instance. Must be called
    /// from within the runtime.
    pub fn start(config: Config, backend: Arc<dyn SharedStore>) -> Self {
        let config = Arc::new(config);
        let instance_id = Uuid::new_v4();
        let store = SessionStore::new(backend, &config.session_root);

        // Votes are cast by every instance
        let votes = VoteAggregator::new(store.clone());
        let vote_feed = votes.watch();

        // Election
        let (elector, driver) =
            GameMasterElector::new(store.clone(), instance_id, config.official_game_master);
        tokio::spawn(elector.run());

        // Engine, idle until this instance drives
        let engine_config = EngineConfig {
            tick_rate: config.tick_rate,
            ..EngineConfig::default()
        };
        let (engine, engine_handle) = SimulationEngine::new(
            instance_id,
            engine_config,
            store.clone(),
            votes.clone(),
            driver.clone(),
            vote_feed.winner.clone(),
        );
        tokio::spawn(engine.run());

        let mirror = SimulationMirror::start(&store);

        let market = match &config.market_token_address {
            Some(address) => MarketFeed::new(&config.market_api_url, address).spawn(),
            None => {
                info!("No market token configured, market poller disabled");
                watch::channel(MarketStatus::disabled()).1
            }
        };

        info!(
            %instance_id,
            primary = config.official_game_master,
            session_root = %config.session_root,
            "Instance started"
        );

        Self {
            config,
            instance_id,
            votes,
            vote_feed,
            engine: engine_handle,
            mirror,
            driver,
            market,
        }
    }

    pub fn is_driver(&self) -> bool {
        *self.driver.borrow()
    }

    pub fn snapshot(&self) -> GameSnapshot {
        let mirrored = self.mirror.snapshot();
        GameSnapshot {
            state: mirrored.state,
            obstacle: mirrored.obstacle,
            votes: *self.vote_feed.summary.borrow(),
            is_driver: self.is_driver(),
            market: self.market.borrow().clone(),
        }
    }
}
