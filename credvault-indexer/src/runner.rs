// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Periodic driver for the event indexer.

use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::indexer::EventIndexer;

/// Runs the indexer on a fixed interval.
///
/// The loop owns the indexer and awaits each run before sleeping again, so
/// runs for the stream never overlap; a failed run is simply retried on the
/// next tick.
pub struct IndexerRunner {
    indexer: EventIndexer,
    poll_interval: Duration,
}

impl IndexerRunner {
    pub fn new(indexer: EventIndexer, poll_interval: Duration) -> Self {
        Self {
            indexer,
            poll_interval,
        }
    }

    pub async fn run(self) {
        info!(interval_secs = self.poll_interval.as_secs(), "event indexer started");
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.indexer.run_once().await {
                Ok(_) => {}
                Err(error) => {
                    error!(%error, "event indexing run failed; retrying on the next tick");
                }
            }
        }
    }
}
