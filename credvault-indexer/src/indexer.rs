// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Incremental replay of on-chain credential events into the cache.

use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use credvault_ethereum::{
    client::VaultChain,
    common::{ChainClientError, VaultEventKind},
    events,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::store::{CacheStore, RevocationOutcome, StoreError};

/// Stream key of the contract's combined issued/revoked event history.
pub const CREDENTIAL_EVENTS_STREAM: &str = "credential_events";

/// Default number of blocks scanned per run; bounds the cost of one
/// `eth_getLogs` query.
pub const DEFAULT_BATCH_SIZE: u64 = 1000;

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error(transparent)]
    Chain(#[from] ChainClientError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What one indexing run did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub from_block: u64,
    pub to_block: u64,
    pub issued: usize,
    pub revoked: usize,
    /// Logs dropped because they failed to decode.
    pub skipped: usize,
    /// Revocations left for a later pass because the issuance was not
    /// projected yet.
    pub deferred: usize,
}

/// Replays vault events into the [`CacheStore`], one bounded block range at
/// a time, resuming from the stored checkpoint.
///
/// `run_once` must not run concurrently for the same stream: the runner owns
/// the indexer and awaits each run to completion, which serializes them.
pub struct EventIndexer {
    chain: Arc<dyn VaultChain>,
    store: CacheStore,
    stream: String,
    batch_size: u64,
}

impl EventIndexer {
    pub fn new(chain: Arc<dyn VaultChain>, store: CacheStore, batch_size: u64) -> Self {
        Self {
            chain,
            store,
            stream: CREDENTIAL_EVENTS_STREAM.to_string(),
            batch_size,
        }
    }

    /// Processes at most one batch of blocks past the checkpoint.
    ///
    /// Returns `None` when the checkpoint is already at the chain head.
    /// Event upserts are idempotent, so a crash before the final checkpoint
    /// advance only means the same range is replayed on the next run.
    pub async fn run_once(&self) -> Result<Option<BatchSummary>, IndexerError> {
        let checkpoint = self.store.last_processed_block(&self.stream).await?;
        let head = self.chain.block_number().await?;
        let to_block = head.min(checkpoint + self.batch_size);
        if to_block <= checkpoint {
            debug!(checkpoint, head, "no new blocks to process");
            return Ok(None);
        }
        let from_block = checkpoint + 1;
        info!(from_block, to_block, "indexing credential events");

        let mut issued_logs = self
            .chain
            .event_logs(VaultEventKind::Issued, from_block, to_block)
            .await?;
        let mut revoked_logs = self
            .chain
            .event_logs(VaultEventKind::Revoked, from_block, to_block)
            .await?;
        // Ascending chain order keeps the log readable and minimizes
        // revocation deferrals; correctness comes from the keyed upserts.
        issued_logs.sort_by_key(|log| (log.block_number, log.log_index));
        revoked_logs.sort_by_key(|log| (log.block_number, log.log_index));

        let now = unix_now();
        let mut summary = BatchSummary {
            from_block,
            to_block,
            ..BatchSummary::default()
        };

        // Issuances first: a revocation in the same batch depends on the
        // projected credential existing.
        for log in &issued_logs {
            match events::decode_issued(log) {
                Ok(event) => {
                    self.store.apply_issued_event(&event, now).await?;
                    summary.issued += 1;
                }
                Err(error) => {
                    warn!(%error, tx_hash = ?log.tx_hash, "skipping undecodable CredentialIssued log");
                    summary.skipped += 1;
                }
            }
        }
        for log in &revoked_logs {
            match events::decode_revoked(log) {
                Ok(event) => match self.store.apply_revoked_event(&event).await? {
                    RevocationOutcome::Applied => summary.revoked += 1,
                    RevocationOutcome::UnknownCredential => {
                        warn!(
                            credential_id = event.credential_id,
                            "revocation for a credential not in the cache yet; will reconcile later"
                        );
                        summary.deferred += 1;
                    }
                },
                Err(error) => {
                    warn!(%error, tx_hash = ?log.tx_hash, "skipping undecodable CredentialRevoked log");
                    summary.skipped += 1;
                }
            }
        }

        // Only now is the whole range durably in the cache.
        self.store.advance_checkpoint(&self.stream, to_block).await?;
        info!(
            issued = summary.issued,
            revoked = summary.revoked,
            skipped = summary.skipped,
            deferred = summary.deferred,
            to_block,
            "batch processed"
        );
        Ok(Some(summary))
    }

    /// Runs batches until the checkpoint reaches the current head. Used for
    /// the initial sync and the manual catch-up command.
    pub async fn run_to_head(&self) -> Result<u64, IndexerError> {
        loop {
            if self.run_once().await?.is_none() {
                return self
                    .store
                    .last_processed_block(&self.stream)
                    .await
                    .map_err(IndexerError::Store);
            }
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
