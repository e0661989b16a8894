// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use alloy::{
    consensus::TxReceipt as _,
    eips::eip2718::Encodable2718,
    network::{EthereumWallet, TransactionBuilder},
    primitives::{Address, Bytes, B256, U256},
    providers::{Provider, ProviderBuilder, RootProvider},
    rpc::types::eth::{Filter, Log, TransactionReceipt, TransactionRequest},
    transports::http::reqwest::Client,
};
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use tokio::time::Instant;
use url::Url;

use crate::{
    abi,
    client::VaultChain,
    common::{
        ChainClientError, CredentialStatus, InstitutionState, LogEntry, TxFees, TxOutcome,
        VaultCall, VaultEventKind,
    },
    events,
};

pub type HttpProvider = RootProvider<alloy::transports::http::Http<Client>>;

/// How often the receipt wait polls the node.
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// The production [`VaultChain`] implementation over an HTTP JSON-RPC
/// endpoint.
pub struct VaultClient {
    provider: HttpProvider,
    contract: Address,
    wallet: EthereumWallet,
    signer_address: Address,
    chain_id: u64,
}

impl VaultClient {
    /// Connects to the node at `url` and prepares the signer. The connection
    /// itself is lazy; the first RPC call surfaces endpoint problems.
    pub fn new(
        url: &str,
        contract: Address,
        signer_key: &str,
        chain_id: u64,
    ) -> Result<Self, ChainClientError> {
        let rpc_url = Url::parse(url)?;
        let provider = ProviderBuilder::new().on_http(rpc_url);
        let signer: PrivateKeySigner = signer_key.parse()?;
        let signer_address = signer.address();
        let wallet = EthereumWallet::from(signer);
        Ok(Self {
            provider,
            contract,
            wallet,
            signer_address,
            chain_id,
        })
    }

    async fn view(&self, data: Vec<u8>) -> Result<Vec<u8>, ChainClientError> {
        let tx = TransactionRequest::default()
            .with_to(self.contract)
            .with_input(Bytes::from(data));
        let bytes = self.provider.call(&tx).await?;
        Ok(bytes.to_vec())
    }

    fn call_request(&self, call: &VaultCall) -> TransactionRequest {
        TransactionRequest::default()
            .with_from(self.signer_address)
            .with_to(self.contract)
            .with_input(Bytes::from(abi::encode_call(call)))
    }

    fn log_entry(log: &Log) -> Result<LogEntry, ChainClientError> {
        let block_number = log.block_number.ok_or(ChainClientError::IncompleteLog)?;
        let tx_hash = log
            .transaction_hash
            .ok_or(ChainClientError::IncompleteLog)?;
        let log_index = log.log_index.ok_or(ChainClientError::IncompleteLog)?;
        Ok(LogEntry {
            block_number,
            tx_hash,
            log_index,
            topics: log.topics().to_vec(),
            data: log.data().data.to_vec(),
        })
    }

    fn outcome(receipt: &TransactionReceipt) -> Result<TxOutcome, ChainClientError> {
        let logs = receipt
            .inner
            .logs()
            .iter()
            .map(Self::log_entry)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TxOutcome {
            tx_hash: receipt.transaction_hash,
            success: receipt.status(),
            block_number: receipt.block_number,
            logs,
        })
    }
}

#[async_trait]
impl VaultChain for VaultClient {
    async fn block_number(&self) -> Result<u64, ChainClientError> {
        Ok(self.provider.get_block_number().await?)
    }

    async fn balance(&self, account: Address) -> Result<U256, ChainClientError> {
        Ok(self.provider.get_balance(account).await?)
    }

    async fn event_logs(
        &self,
        kind: VaultEventKind,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<LogEntry>, ChainClientError> {
        let signature = match kind {
            VaultEventKind::Issued => *events::ISSUED_SIGNATURE,
            VaultEventKind::Revoked => *events::REVOKED_SIGNATURE,
        };
        let filter = Filter::new()
            .address(self.contract)
            .event_signature(signature)
            .from_block(from_block)
            .to_block(to_block);
        let logs = self.provider.get_logs(&filter).await?;
        logs.iter().map(Self::log_entry).collect()
    }

    async fn credential_status(
        &self,
        credential_id: u64,
    ) -> Result<CredentialStatus, ChainClientError> {
        let data = self.view(abi::encode_credential_status(credential_id)).await?;
        Ok(abi::decode_credential_status(&data)?)
    }

    async fn verify_fingerprint(
        &self,
        credential_id: u64,
        fingerprint: B256,
    ) -> Result<bool, ChainClientError> {
        let data = self
            .view(abi::encode_verify_fingerprint(credential_id, fingerprint))
            .await?;
        Ok(abi::decode_bool(&data)?)
    }

    async fn institution_state(
        &self,
        institution: Address,
    ) -> Result<InstitutionState, ChainClientError> {
        let data = self.view(abi::encode_get_institution(institution)).await?;
        Ok(abi::decode_institution_state(&data)?)
    }

    async fn can_issue_for(
        &self,
        institution: Address,
        issuer: Address,
    ) -> Result<bool, ChainClientError> {
        let data = self
            .view(abi::encode_can_issue_for_institution(institution, issuer))
            .await?;
        Ok(abi::decode_bool(&data)?)
    }

    async fn super_admin(&self) -> Result<Address, ChainClientError> {
        let data = self.view(abi::encode_super_admin()).await?;
        Ok(abi::decode_address(&data)?)
    }

    async fn is_registrar(&self, account: Address) -> Result<bool, ChainClientError> {
        let data = self.view(abi::encode_registrars(account)).await?;
        Ok(abi::decode_bool(&data)?)
    }

    async fn pending_nonce(&self, account: Address) -> Result<u64, ChainClientError> {
        Ok(self
            .provider
            .get_transaction_count(account)
            .pending()
            .await?)
    }

    async fn gas_price(&self) -> Result<u128, ChainClientError> {
        Ok(self.provider.get_gas_price().await?)
    }

    async fn estimate_gas(&self, call: &VaultCall) -> Result<u128, ChainClientError> {
        Ok(self.provider.estimate_gas(&self.call_request(call)).await?)
    }

    async fn submit(&self, call: &VaultCall, fees: TxFees) -> Result<B256, ChainClientError> {
        let tx = self
            .call_request(call)
            .with_nonce(fees.nonce)
            .with_gas_limit(fees.gas_limit)
            .with_gas_price(fees.gas_price)
            .with_chain_id(self.chain_id);
        let envelope = tx.build(&self.wallet).await?;
        let pending = self
            .provider
            .send_raw_transaction(&envelope.encoded_2718())
            .await?;
        Ok(*pending.tx_hash())
    }

    async fn wait_for_receipt(
        &self,
        tx_hash: B256,
        timeout: Duration,
    ) -> Result<Option<TxOutcome>, ChainClientError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(receipt) = self.provider.get_transaction_receipt(tx_hash).await? {
                return Ok(Some(Self::outcome(&receipt)?));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
        }
    }

    async fn receipt(&self, tx_hash: B256) -> Result<Option<TxOutcome>, ChainClientError> {
        match self.provider.get_transaction_receipt(tx_hash).await? {
            Some(receipt) => Ok(Some(Self::outcome(&receipt)?)),
            None => Ok(None),
        }
    }

    fn signer_address(&self) -> Address {
        self.signer_address
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }
}
