//! Vote aggregation over the shared store

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::game::Lane;
use crate::store::{decode, SessionStore, Slot, StoreError};

use super::tally::{VoteSummary, VoteTally};
use super::VoteDirection;

/// Wait before retrying a failed subscription
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

/// Casts and resets votes. Any instance may use it; nothing here is gated
/// on driver status.
#[derive(Clone)]
pub struct VoteAggregator {
    store: SessionStore,
}

/// Live derived vote values for one instance
#[derive(Clone)]
pub struct VoteFeed {
    pub summary: watch::Receiver<VoteSummary>,
    pub winner: watch::Receiver<Lane>,
}

impl VoteAggregator {
    pub fn new(store: SessionStore) -> Self {
        Self { store }
    }

    /// Add exactly one vote. Only the chosen counter's slot is transacted, so
    /// concurrent casts never lose an increment.
    pub async fn cast_vote(&self, direction: VoteDirection) -> Result<u64, StoreError> {
        let count = self.store.increment(Slot::Vote(direction)).await?;
        debug!(direction = direction.as_str(), count, "Vote cast");
        Ok(count)
    }

    /// Overwrite all three counters with zero
    pub async fn reset_votes(&self) -> Result<(), StoreError> {
        self.store.write(Slot::Votes, &VoteTally::default()).await
    }

    /// Start following the tally. Derived values are recomputed on every
    /// observed change; the winner sticks across empty tallies.
    pub fn watch(&self) -> VoteFeed {
        let (summary_tx, summary) = watch::channel(VoteSummary::default());
        let (winner_tx, winner) = watch::channel(Lane::Center);

        let aggregator = self.clone();
        tokio::spawn(async move {
            aggregator.follow(summary_tx, winner_tx).await;
        });

        VoteFeed { summary, winner }
    }

    async fn follow(self, summary_tx: watch::Sender<VoteSummary>, winner_tx: watch::Sender<Lane>) {
        let mut previous = Lane::Center;

        while !summary_tx.is_closed() || !winner_tx.is_closed() {
            let mut votes_rx = match self.store.subscribe(Slot::Votes).await {
                Ok(rx) => rx,
                Err(e) => {
                    warn!(error = %e, "Vote subscription failed, retrying");
                    tokio::time::sleep(RESUBSCRIBE_DELAY).await;
                    continue;
                }
            };

            loop {
                let raw = votes_rx.borrow_and_update().clone();
                if raw.is_none() {
                    if let Err(e) = self.reset_votes().await {
                        warn!(error = %e, "Failed to initialize vote counters");
                    }
                }

                let tally: VoteTally = decode(Slot::Votes, raw).unwrap_or_default();
                let summary = VoteSummary::derive(tally, previous);
                previous = summary.winner;

                summary_tx.send_if_modified(|current| replace_if_changed(current, summary));
                winner_tx.send_if_modified(|current| replace_if_changed(current, summary.winner));

                if summary_tx.is_closed() && winner_tx.is_closed() {
                    return;
                }
                if votes_rx.changed().await.is_err() {
                    break;
                }
            }
        }
    }
}

fn replace_if_changed<T: PartialEq>(current: &mut T, next: T) -> bool {
    if *current == next {
        false
    } else {
        *current = next;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::store::MemoryStore;
    use crate::voting::tally::Percentages;

    fn aggregator() -> VoteAggregator {
        VoteAggregator::new(SessionStore::new(Arc::new(MemoryStore::new()), "game/current"))
    }

    async fn tally(aggregator: &VoteAggregator) -> VoteTally {
        aggregator
            .store
            .read(Slot::Votes)
            .await
            .unwrap()
            .unwrap_or_default()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_casts_are_never_lost() {
        let aggregator = aggregator();
        let casts: Vec<_> = (0..200)
            .map(|_| {
                let aggregator = aggregator.clone();
                tokio::spawn(async move { aggregator.cast_vote(VoteDirection::Right).await })
            })
            .collect();
        for cast in casts {
            tokio_test::assert_ok!(cast.await.unwrap());
        }

        assert_eq!(tally(&aggregator).await, VoteTally::new(0, 0, 200));
    }

    #[tokio::test]
    async fn total_tracks_every_cast() {
        let aggregator = aggregator();
        let sequence = [
            VoteDirection::Left,
            VoteDirection::Stay,
            VoteDirection::Stay,
            VoteDirection::Right,
            VoteDirection::Left,
        ];
        for (n, direction) in sequence.iter().enumerate() {
            aggregator.cast_vote(*direction).await.unwrap();
            let tally = tally(&aggregator).await;
            assert_eq!(tally.total(), n as u64 + 1);
        }
        assert_eq!(tally(&aggregator).await, VoteTally::new(2, 2, 1));
    }

    #[tokio::test]
    async fn reset_then_one_left_vote() {
        let aggregator = aggregator();
        aggregator.cast_vote(VoteDirection::Stay).await.unwrap();
        aggregator.cast_vote(VoteDirection::Right).await.unwrap();

        aggregator.reset_votes().await.unwrap();
        aggregator.cast_vote(VoteDirection::Left).await.unwrap();

        let summary = VoteSummary::derive(tally(&aggregator).await, Lane::Center);
        assert_eq!(summary.votes, VoteTally::new(1, 0, 0));
        assert_eq!(summary.total_votes, 1);
        assert_eq!(summary.percentages, Percentages { left: 100, stay: 0, right: 0 });
    }

    #[tokio::test]
    async fn feed_initializes_counters_and_tracks_the_winner() {
        let aggregator = aggregator();
        let mut feed = aggregator.watch();

        // The feed writes zeroed counters when the slot is missing
        let store = aggregator.store.clone();
        let mut votes_rx = store.subscribe(Slot::Votes).await.unwrap();
        votes_rx.wait_for(|v| v.is_some()).await.unwrap();

        aggregator.cast_vote(VoteDirection::Right).await.unwrap();
        let winner = *feed.winner.wait_for(|lane| *lane == Lane::Right).await.unwrap();
        assert_eq!(winner, Lane::Right);

        // Emptying the tally keeps the last winner
        aggregator.reset_votes().await.unwrap();
        let summary = *feed.summary.wait_for(|s| s.total_votes == 0).await.unwrap();
        assert_eq!(summary.winner, Lane::Right);
        assert_eq!(*feed.winner.borrow(), Lane::Right);
    }
}
