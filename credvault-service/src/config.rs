// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Process configuration, loaded once at startup.

use credvault_indexer::indexer::DEFAULT_BATCH_SIZE;

#[derive(clap::Parser, Debug, Clone)]
#[command(name = "credvault", about = "Credential vault cache, indexer and API")]
pub struct CredvaultOptions {
    /// JSON-RPC endpoint of the EVM node
    #[arg(long, env = "CREDVAULT_RPC_URL", default_value = "http://localhost:8545")]
    pub rpc_url: String,

    /// Address of the deployed credential vault contract
    #[arg(long, env = "CREDVAULT_CONTRACT_ADDRESS")]
    pub contract_address: String,

    /// Private key of the issuing account
    #[arg(long, env = "CREDVAULT_SIGNER_KEY", hide_env_values = true)]
    pub signer_key: String,

    /// Chain id transactions are bound to
    #[arg(long, env = "CREDVAULT_CHAIN_ID", default_value = "11155111")]
    pub chain_id: u64,

    /// SQLite database URL for the local cache
    #[arg(
        long,
        env = "CREDVAULT_DATABASE_URL",
        default_value = "sqlite://credvault.db?mode=rwc"
    )]
    pub database_url: String,

    /// Blocks scanned per indexing run
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: u64,

    /// Seconds between indexing runs
    #[arg(long, default_value = "60")]
    pub poll_interval: u64,

    /// Port of the HTTP API
    #[arg(long, default_value = "8080")]
    pub port: u16,

    /// Base URL used when formatting shareable verification links
    #[arg(long, default_value = "http://localhost:8080")]
    pub share_link_base: String,

    /// Catch the cache up to the chain head before serving
    #[arg(long)]
    pub catch_up: bool,
}
