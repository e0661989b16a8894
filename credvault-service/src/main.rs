// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::{sync::Arc, time::Duration};

use alloy::primitives::Address;
use credvault_ethereum::{client::VaultChain, provider::VaultClient};
use credvault_indexer::{indexer::EventIndexer, runner::IndexerRunner, store::CacheStore};
use credvault_service::{
    api::{self, AppState},
    config::CredvaultOptions,
    orchestrator::IssuanceOrchestrator,
    resolver::VerificationResolver,
};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(env_filter)
        .init();

    let options = <CredvaultOptions as clap::Parser>::parse();
    run(options).await
}

async fn run(options: CredvaultOptions) -> anyhow::Result<()> {
    let contract: Address = options.contract_address.parse()?;
    let chain: Arc<dyn VaultChain> = Arc::new(VaultClient::new(
        &options.rpc_url,
        contract,
        &options.signer_key,
        options.chain_id,
    )?);
    let store = CacheStore::new(&options.database_url).await?;

    let indexer = EventIndexer::new(chain.clone(), store.clone(), options.batch_size);
    if options.catch_up {
        let checkpoint = indexer.run_to_head().await?;
        info!(checkpoint, "initial catch-up complete");
    }
    let runner = IndexerRunner::new(indexer, Duration::from_secs(options.poll_interval));
    tokio::spawn(runner.run());

    match chain.block_number().await {
        Ok(head) => {
            let balance = chain.balance(chain.signer_address()).await.unwrap_or_default();
            info!(head, balance = %balance, "connected to the RPC endpoint");
            // 0.01 ETH; below this, transactions are likely to fail.
            if balance < alloy::primitives::U256::from(10_000_000_000_000_000u64) {
                warn!("signer balance is low; issuance transactions may not go through");
            }
        }
        Err(error) => warn!(%error, "RPC endpoint not reachable at startup; continuing"),
    }

    let state = AppState {
        chain: chain.clone(),
        orchestrator: Arc::new(IssuanceOrchestrator::new(
            chain.clone(),
            store.clone(),
            options.share_link_base.clone(),
        )),
        resolver: Arc::new(VerificationResolver::new(chain, store)),
    };
    let app = api::router(state);
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", options.port)).await?;
    info!(port = options.port, "credvault service listening");
    axum::serve(listener, app).await?;
    Ok(())
}
