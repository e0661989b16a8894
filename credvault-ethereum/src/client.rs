// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;

use crate::common::{
    ChainClientError, CredentialStatus, InstitutionState, LogEntry, TxFees, TxOutcome, VaultCall,
    VaultEventKind,
};

/// Access to the credential vault contract on an EVM node.
///
/// The indexer, orchestrator and resolver all take this as an injected
/// object; the production implementation is [`VaultClient`], tests use the
/// in-memory mock from `test_utils`.
///
/// [`VaultClient`]: crate::provider::VaultClient
#[async_trait]
pub trait VaultChain: Send + Sync {
    /// Current chain head height.
    async fn block_number(&self) -> Result<u64, ChainClientError>;

    /// Balance of `account` in wei at the latest block.
    async fn balance(&self, account: Address) -> Result<U256, ChainClientError>;

    /// Raw vault logs of one kind in the inclusive block range.
    async fn event_logs(
        &self,
        kind: VaultEventKind,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<LogEntry>, ChainClientError>;

    /// The `credentialStatus` view. `exists == false` means the id was never
    /// issued.
    async fn credential_status(
        &self,
        credential_id: u64,
    ) -> Result<CredentialStatus, ChainClientError>;

    /// The `verifyFingerprint` view.
    async fn verify_fingerprint(
        &self,
        credential_id: u64,
        fingerprint: B256,
    ) -> Result<bool, ChainClientError>;

    /// The `getInstitution` view.
    async fn institution_state(
        &self,
        institution: Address,
    ) -> Result<InstitutionState, ChainClientError>;

    /// Whether `issuer` may issue credentials for `institution`.
    async fn can_issue_for(
        &self,
        institution: Address,
        issuer: Address,
    ) -> Result<bool, ChainClientError>;

    /// The contract's super-admin account.
    async fn super_admin(&self) -> Result<Address, ChainClientError>;

    /// Whether `account` holds the registrar role.
    async fn is_registrar(&self, account: Address) -> Result<bool, ChainClientError>;

    /// The pending-inclusive transaction count of `account`.
    async fn pending_nonce(&self, account: Address) -> Result<u64, ChainClientError>;

    /// Current legacy gas price.
    async fn gas_price(&self) -> Result<u128, ChainClientError>;

    /// Dry-run gas estimate for `call` from the signer account.
    async fn estimate_gas(&self, call: &VaultCall) -> Result<u128, ChainClientError>;

    /// Signs and broadcasts `call` with the given fee fields pinned.
    async fn submit(&self, call: &VaultCall, fees: TxFees) -> Result<B256, ChainClientError>;

    /// Polls for the receipt of `tx_hash` until `timeout` elapses.
    ///
    /// `Ok(None)` means the wait timed out: the transaction may still land
    /// later, so the caller must treat this as indeterminate.
    async fn wait_for_receipt(
        &self,
        tx_hash: B256,
        timeout: Duration,
    ) -> Result<Option<TxOutcome>, ChainClientError>;

    /// One-shot receipt lookup. `Ok(None)` means the node does not know the
    /// transaction.
    async fn receipt(&self, tx_hash: B256) -> Result<Option<TxOutcome>, ChainClientError>;

    /// The account transactions are signed with.
    fn signer_address(&self) -> Address;

    /// The configured chain id.
    fn chain_id(&self) -> u64;
}
