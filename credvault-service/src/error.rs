// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use alloy::primitives::B256;
use credvault_ethereum::common::ChainClientError;
use credvault_indexer::store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    /// Malformed input, rejected before touching the chain or the cache.
    #[error("validation error: {0}")]
    Validation(String),

    /// The RPC endpoint is unreachable or misbehaving.
    #[error("chain unavailable: {0}")]
    ChainUnavailable(#[from] ChainClientError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The transaction was mined with a failed status.
    #[error("transaction {tx_hash} reverted on-chain")]
    TransactionReverted { tx_hash: B256 },

    /// The receipt wait timed out. The transaction may still land later, so
    /// this is indeterminate, not a failure.
    #[error("transaction {tx_hash} submitted but not confirmed in time")]
    Unconfirmed { tx_hash: B256 },

    #[error("credential {0} not found")]
    CredentialNotFound(u64),

    #[error("transaction {0} not found on the configured RPC endpoint")]
    ReceiptNotFound(B256),
}
