// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Builds and submits issuance and revocation transactions, bootstrapping
//! on-chain authorization state when the signer is the super admin, and
//! materializes issued credentials into the cache ahead of the indexer.

use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use alloy::primitives::{keccak256, Address, B256};
use credvault_ethereum::{
    client::VaultChain,
    common::{bare_hex, IssueCredentialRequest, TxFees, VaultCall},
    events,
};
use credvault_indexer::store::{CacheStore, CredentialProjection, UNKNOWN_INSTITUTION};
use tracing::{info, warn};

use crate::error::ServiceError;

/// How long to wait for a transaction to be mined before reporting it as
/// unconfirmed.
pub const RECEIPT_TIMEOUT: Duration = Duration::from_secs(120);

// Conservative ceilings used when gas estimation fails, e.g. because the
// call's preconditions are not satisfied yet.
const SET_REGISTRAR_GAS_FALLBACK: u128 = 180_000;
const UPSERT_INSTITUTION_GAS_FALLBACK: u128 = 260_000;
const SET_CONTROLLER_GAS_FALLBACK: u128 = 220_000;
const ISSUE_GAS_FALLBACK: u128 = 450_000;
const REVOKE_GAS_FALLBACK: u128 = 100_000;

/// Contiguous nonce allocation for one logical multi-transaction operation.
///
/// The pending count is read once at the start; every subsequent
/// transaction in the operation takes the next value instead of re-querying
/// the node, so back-to-back submissions cannot collide on nonce.
pub struct NonceSequence {
    current: u64,
}

impl NonceSequence {
    pub fn new(start: u64) -> Self {
        Self { current: start }
    }

    pub fn next(&mut self) -> u64 {
        let nonce = self.current;
        self.current += 1;
        nonce
    }
}

/// Input for one issuance operation.
#[derive(Clone, Debug)]
pub struct IssueParams {
    pub institution_address: Address,
    pub institution_name: String,
    pub student_wallet: Address,
    pub fingerprint: B256,
    pub metadata_uri: String,
    pub encrypted_payload_uri: String,
    pub expires_at: Option<u64>,
    pub student_name: String,
    pub passport_number: String,
    pub degree_type: String,
    pub graduation_year: Option<i64>,
    pub document_hash: Option<String>,
}

/// Result of an issuance operation.
#[derive(Clone, Debug)]
pub struct IssueOutcome {
    pub tx_hash: B256,
    /// False when the receipt wait timed out; the transaction may still
    /// land, and the indexer will materialize the credential if it does.
    pub confirmed: bool,
    /// Resolved from the receipt's `CredentialIssued` log; `None` when the
    /// log could not be decoded even though the transaction succeeded.
    pub credential_id: Option<u64>,
    pub fingerprint: String,
    pub share_link: Option<String>,
}

/// Result of a revocation submission.
#[derive(Clone, Debug)]
pub struct RevokeOutcome {
    pub tx_hash: B256,
    pub reason_hash: String,
}

/// Receipt lookup result, with a best-effort decode of the issuance event.
#[derive(Clone, Debug)]
pub struct ReceiptReport {
    pub tx_hash: B256,
    pub success: bool,
    pub block_number: Option<u64>,
    pub issued: Option<events::IssuedEvent>,
}

pub struct IssuanceOrchestrator {
    chain: Arc<dyn VaultChain>,
    store: CacheStore,
    share_link_base: String,
}

impl IssuanceOrchestrator {
    pub fn new(chain: Arc<dyn VaultChain>, store: CacheStore, share_link_base: String) -> Self {
        Self {
            chain,
            store,
            share_link_base,
        }
    }

    /// Derives the deterministic embedded wallet for a student without one:
    /// the last twenty bytes of the keccak hash of the passport number.
    pub fn derive_student_wallet(passport_number: &str) -> Address {
        let normalized = passport_number.trim().to_uppercase();
        let digest = keccak256(normalized.as_bytes());
        Address::from_slice(&digest[12..])
    }

    /// Submits an issuance transaction, bootstrapping authorization state
    /// first when needed, and waits for it to be mined.
    pub async fn issue(&self, params: IssueParams) -> Result<IssueOutcome, ServiceError> {
        let signer = self.chain.signer_address();
        let mut nonces = NonceSequence::new(self.chain.pending_nonce(signer).await?);

        self.ensure_preconditions(&params, signer, &mut nonces).await?;

        let call = VaultCall::IssueCredential(IssueCredentialRequest {
            institution: params.institution_address,
            student_wallet: params.student_wallet,
            fingerprint: params.fingerprint,
            metadata_uri: params.metadata_uri.clone(),
            encrypted_payload_uri: params.encrypted_payload_uri.clone(),
            expires_at: params.expires_at.unwrap_or(0),
        });
        let tx_hash = self.submit(&call, &mut nonces, ISSUE_GAS_FALLBACK).await?;
        info!(?tx_hash, "credential issuance transaction sent");

        let fingerprint = bare_hex(&params.fingerprint);
        let Some(outcome) = self.chain.wait_for_receipt(tx_hash, RECEIPT_TIMEOUT).await? else {
            warn!(?tx_hash, "issuance transaction not confirmed within the wait window");
            return Ok(IssueOutcome {
                tx_hash,
                confirmed: false,
                credential_id: None,
                fingerprint,
                share_link: None,
            });
        };
        if !outcome.success {
            return Err(ServiceError::TransactionReverted { tx_hash });
        }

        let issued = outcome
            .logs
            .iter()
            .find_map(|log| events::decode_issued(log).ok());
        let Some(issued) = issued else {
            warn!(
                ?tx_hash,
                "could not decode CredentialIssued from the receipt; the indexer will materialize the credential"
            );
            return Ok(IssueOutcome {
                tx_hash,
                confirmed: true,
                credential_id: None,
                fingerprint,
                share_link: None,
            });
        };

        self.materialize(&params, issued.credential_id, tx_hash).await?;
        let share_link = self.share_link(issued.credential_id, &fingerprint);
        Ok(IssueOutcome {
            tx_hash,
            confirmed: true,
            credential_id: Some(issued.credential_id),
            fingerprint,
            share_link: Some(share_link),
        })
    }

    /// Submits a revocation transaction. The cache is deliberately left
    /// untouched: only the indexer flips the revoked flag, when it observes
    /// the `CredentialRevoked` event.
    pub async fn revoke(
        &self,
        credential_id: u64,
        reason: &str,
    ) -> Result<RevokeOutcome, ServiceError> {
        if self.store.get_credential(credential_id).await?.is_none() {
            return Err(ServiceError::CredentialNotFound(credential_id));
        }
        let reason_hash = keccak256(reason.as_bytes());
        let signer = self.chain.signer_address();
        let mut nonces = NonceSequence::new(self.chain.pending_nonce(signer).await?);
        let call = VaultCall::RevokeCredential {
            credential_id,
            reason_hash,
        };
        let tx_hash = self.submit(&call, &mut nonces, REVOKE_GAS_FALLBACK).await?;
        info!(?tx_hash, credential_id, "credential revocation transaction sent");
        Ok(RevokeOutcome {
            tx_hash,
            reason_hash: bare_hex(&reason_hash),
        })
    }

    /// Fetches a receipt by hash and decodes the issuance event from it if
    /// present. Issuance returns a transaction hash immediately, while the
    /// credential id only exists once the transaction is mined.
    pub async fn transaction_receipt(&self, tx_hash: B256) -> Result<ReceiptReport, ServiceError> {
        let outcome = self
            .chain
            .receipt(tx_hash)
            .await?
            .ok_or(ServiceError::ReceiptNotFound(tx_hash))?;
        let issued = outcome
            .logs
            .iter()
            .find_map(|log| events::decode_issued(log).ok());
        Ok(ReceiptReport {
            tx_hash,
            success: outcome.success,
            block_number: outcome.block_number,
            issued,
        })
    }

    pub fn share_link(&self, credential_id: u64, fingerprint: &str) -> String {
        format!(
            "{}/verify/{}/0x{}",
            self.share_link_base.trim_end_matches('/'),
            credential_id,
            fingerprint.trim_start_matches("0x"),
        )
    }

    /// Checks the on-chain authorization state and, when the signer is the
    /// super admin, repairs it with up to three transactions in strict
    /// sequence. Each is gated on its own precondition so nothing redundant
    /// is sent. When the signer is not the super admin the issuance goes
    /// ahead anyway and will revert on-chain if the state really is
    /// missing.
    async fn ensure_preconditions(
        &self,
        params: &IssueParams,
        signer: Address,
        nonces: &mut NonceSequence,
    ) -> Result<(), ServiceError> {
        let institution = match self.chain.institution_state(params.institution_address).await {
            Ok(state) => state,
            Err(error) => {
                warn!(%error, "could not read institution state; assuming unregistered");
                Default::default()
            }
        };
        let can_issue = self
            .chain
            .can_issue_for(params.institution_address, signer)
            .await
            .unwrap_or(false);
        if institution.exists && institution.is_active && can_issue {
            return Ok(());
        }

        if self.chain.super_admin().await.ok() != Some(signer) {
            warn!(
                institution = ?params.institution_address,
                "institution not ready and the signer is not the super admin; the issuance transaction is likely to revert"
            );
            return Ok(());
        }

        if !self.chain.is_registrar(signer).await.unwrap_or(false) {
            let call = VaultCall::SetRegistrar {
                account: signer,
                allowed: true,
            };
            let tx_hash = self
                .submit_and_confirm(&call, nonces, SET_REGISTRAR_GAS_FALLBACK)
                .await?;
            info!(?tx_hash, "granted the registrar role to the signer");
        }

        if !institution.exists || !institution.is_active {
            let name = if params.institution_name.is_empty() {
                UNKNOWN_INSTITUTION
            } else {
                &params.institution_name
            };
            let call = VaultCall::UpsertInstitution {
                institution: params.institution_address,
                name: name.to_string(),
                active: true,
            };
            let tx_hash = self
                .submit_and_confirm(&call, nonces, UPSERT_INSTITUTION_GAS_FALLBACK)
                .await?;
            info!(?tx_hash, "registered the institution as active");
        }

        if !self
            .chain
            .can_issue_for(params.institution_address, signer)
            .await
            .unwrap_or(false)
        {
            let call = VaultCall::SetInstitutionController {
                institution: params.institution_address,
                controller: signer,
                allowed: true,
            };
            let tx_hash = self
                .submit_and_confirm(&call, nonces, SET_CONTROLLER_GAS_FALLBACK)
                .await?;
            info!(?tx_hash, "granted the signer control over the institution");
        }
        Ok(())
    }

    /// Writes the issued credential into the cache through the same upsert
    /// the indexer uses, so both paths converge on one row. Timestamps come
    /// from the chain when the status read succeeds.
    async fn materialize(
        &self,
        params: &IssueParams,
        credential_id: u64,
        tx_hash: B256,
    ) -> Result<(), ServiceError> {
        let now = unix_now();
        let (issued_at, expires_at) = match self.chain.credential_status(credential_id).await {
            Ok(status) if status.exists => (
                status.issued_at,
                (status.expires_at > 0).then_some(status.expires_at),
            ),
            Ok(_) => (now, params.expires_at),
            Err(error) => {
                warn!(%error, credential_id, "could not refresh status after issuance");
                (now, params.expires_at)
            }
        };

        let projection = CredentialProjection {
            credential_id,
            student_wallet: format!("{:?}", params.student_wallet),
            institution_address: format!("{:?}", params.institution_address),
            institution_name: (!params.institution_name.is_empty())
                .then(|| params.institution_name.clone()),
            fingerprint: bare_hex(&params.fingerprint),
            metadata_uri: params.metadata_uri.clone(),
            encrypted_payload_uri: params.encrypted_payload_uri.clone(),
            issued_at,
            expires_at,
            student_name: params.student_name.clone(),
            passport_number: params.passport_number.clone(),
            degree_type: params.degree_type.clone(),
            graduation_year: params.graduation_year,
            document_hash: params.document_hash.clone(),
            tx_hash: Some(format!("{:?}", tx_hash)),
        };
        self.store.upsert_credential(&projection).await?;
        if !params.institution_name.is_empty() {
            self.store
                .update_institution_name(
                    &projection.institution_address,
                    &params.institution_name,
                    now,
                )
                .await?;
        }
        info!(credential_id, "credential materialized in the cache");
        Ok(())
    }

    async fn submit_and_confirm(
        &self,
        call: &VaultCall,
        nonces: &mut NonceSequence,
        gas_fallback: u128,
    ) -> Result<B256, ServiceError> {
        let tx_hash = self.submit(call, nonces, gas_fallback).await?;
        match self.chain.wait_for_receipt(tx_hash, RECEIPT_TIMEOUT).await? {
            None => Err(ServiceError::Unconfirmed { tx_hash }),
            Some(outcome) if !outcome.success => {
                Err(ServiceError::TransactionReverted { tx_hash })
            }
            Some(_) => Ok(tx_hash),
        }
    }

    async fn submit(
        &self,
        call: &VaultCall,
        nonces: &mut NonceSequence,
        gas_fallback: u128,
    ) -> Result<B256, ServiceError> {
        let fees = TxFees {
            nonce: nonces.next(),
            gas_limit: self.gas_limit(call, gas_fallback).await,
            gas_price: self.chain.gas_price().await?,
        };
        Ok(self.chain.submit(call, fees).await?)
    }

    /// Dry-run estimate with a safety margin, never below the fallback
    /// ceiling. Estimation failure is expected when the call's
    /// preconditions are not satisfied yet.
    async fn gas_limit(&self, call: &VaultCall, fallback: u128) -> u128 {
        match self.chain.estimate_gas(call).await {
            Ok(estimate) => (estimate * 135 / 100 + 10_000).max(fallback),
            Err(error) => {
                warn!(%error, fallback, "gas estimation failed; using the fallback limit");
                fallback
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

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use credvault_ethereum::{common::InstitutionState, test_utils::MockChain};

    use super::*;

    fn params(institution: Address) -> IssueParams {
        IssueParams {
            institution_address: institution,
            institution_name: "Example University".to_string(),
            student_wallet: Address::repeat_byte(0xaa),
            fingerprint: B256::repeat_byte(0x11),
            metadata_uri: "ipfs://QmMeta".to_string(),
            encrypted_payload_uri: "ipfs://QmPayload".to_string(),
            expires_at: None,
            student_name: "Ada Lovelace".to_string(),
            passport_number: "P1234567".to_string(),
            degree_type: "MSc".to_string(),
            graduation_year: Some(2024),
            document_hash: None,
        }
    }

    async fn setup() -> (Arc<MockChain>, CacheStore, IssuanceOrchestrator) {
        let signer = Address::repeat_byte(0x01);
        let chain = Arc::new(MockChain::new(signer, 31337));
        let store = CacheStore::in_memory().await.unwrap();
        let orchestrator = IssuanceOrchestrator::new(
            chain.clone(),
            store.clone(),
            "http://localhost:8080".to_string(),
        );
        (chain, store, orchestrator)
    }

    fn ready_institution(chain: &MockChain, institution: Address, signer: Address) {
        chain.set_institution(
            institution,
            InstitutionState {
                name: "Example University".to_string(),
                is_active: true,
                exists: true,
                created_at: 1,
                last_updated_at: 1,
            },
        );
        chain.add_registrar(signer);
        chain.add_controller(institution, signer);
    }

    #[test]
    fn nonce_sequence_is_contiguous() {
        let mut nonces = NonceSequence::new(7);
        assert_eq!(nonces.next(), 7);
        assert_eq!(nonces.next(), 8);
        assert_eq!(nonces.next(), 9);
    }

    #[test]
    fn derived_wallet_is_deterministic_and_case_insensitive() {
        let a = IssuanceOrchestrator::derive_student_wallet("p1234567");
        let b = IssuanceOrchestrator::derive_student_wallet(" P1234567 ");
        assert_eq!(a, b);
        assert_ne!(a, IssuanceOrchestrator::derive_student_wallet("P1234568"));
    }

    #[tokio::test]
    async fn full_bootstrap_issues_four_transactions_with_contiguous_nonces() {
        let (chain, _store, orchestrator) = setup().await;
        let institution = Address::repeat_byte(0xbb);
        chain.set_pending_nonce(5);

        let outcome = orchestrator.issue(params(institution)).await.unwrap();
        assert!(outcome.confirmed);
        assert_eq!(outcome.credential_id, Some(1));

        let submitted = chain.submitted();
        assert_eq!(submitted.len(), 4);
        assert_matches!(submitted[0].call, VaultCall::SetRegistrar { allowed: true, .. });
        assert_matches!(submitted[1].call, VaultCall::UpsertInstitution { active: true, .. });
        assert_matches!(
            submitted[2].call,
            VaultCall::SetInstitutionController { allowed: true, .. }
        );
        assert_matches!(submitted[3].call, VaultCall::IssueCredential(_));
        let nonces: Vec<u64> = submitted.iter().map(|tx| tx.fees.nonce).collect();
        assert_eq!(nonces, vec![5, 6, 7, 8]);
    }

    #[tokio::test]
    async fn satisfied_preconditions_skip_the_bootstrap() {
        let (chain, _store, orchestrator) = setup().await;
        let institution = Address::repeat_byte(0xbb);
        ready_institution(&chain, institution, chain.signer_address());

        let outcome = orchestrator.issue(params(institution)).await.unwrap();
        assert_eq!(outcome.credential_id, Some(1));

        let submitted = chain.submitted();
        assert_eq!(submitted.len(), 1);
        assert_matches!(submitted[0].call, VaultCall::IssueCredential(_));
        assert_eq!(submitted[0].fees.nonce, 0);
    }

    #[tokio::test]
    async fn existing_registrar_role_is_not_granted_again() {
        let (chain, _store, orchestrator) = setup().await;
        let institution = Address::repeat_byte(0xbb);
        chain.add_registrar(chain.signer_address());

        orchestrator.issue(params(institution)).await.unwrap();

        let submitted = chain.submitted();
        assert_eq!(submitted.len(), 3);
        assert_matches!(submitted[0].call, VaultCall::UpsertInstitution { .. });
        assert_matches!(submitted[1].call, VaultCall::SetInstitutionController { .. });
        assert_matches!(submitted[2].call, VaultCall::IssueCredential(_));
    }

    #[tokio::test]
    async fn non_super_admin_proceeds_without_bootstrap() {
        let (chain, _store, orchestrator) = setup().await;
        let institution = Address::repeat_byte(0xbb);
        chain.set_super_admin(Address::repeat_byte(0x99));

        let outcome = orchestrator.issue(params(institution)).await.unwrap();
        // The mock mines it anyway; on a real chain this would revert.
        assert!(outcome.confirmed);
        assert_eq!(chain.submitted().len(), 1);
    }

    #[tokio::test]
    async fn gas_limit_uses_estimate_with_margin_when_above_fallback() {
        let (chain, _store, orchestrator) = setup().await;
        let institution = Address::repeat_byte(0xbb);
        ready_institution(&chain, institution, chain.signer_address());
        chain.set_gas_estimate(Some(1_000_000));

        orchestrator.issue(params(institution)).await.unwrap();
        let submitted = chain.submitted();
        assert_eq!(submitted[0].fees.gas_limit, 1_000_000 * 135 / 100 + 10_000);
    }

    #[tokio::test]
    async fn gas_estimation_failure_falls_back_to_the_ceiling() {
        let (chain, _store, orchestrator) = setup().await;
        let institution = Address::repeat_byte(0xbb);
        ready_institution(&chain, institution, chain.signer_address());
        chain.set_gas_estimate(None);

        orchestrator.issue(params(institution)).await.unwrap();
        let submitted = chain.submitted();
        assert_eq!(submitted[0].fees.gas_limit, ISSUE_GAS_FALLBACK);
    }

    #[tokio::test]
    async fn reverted_issuance_is_a_distinct_hard_failure() {
        let (chain, _store, orchestrator) = setup().await;
        let institution = Address::repeat_byte(0xbb);
        ready_institution(&chain, institution, chain.signer_address());
        chain.set_revert_next(true);

        let result = orchestrator.issue(params(institution)).await;
        assert_matches!(result, Err(ServiceError::TransactionReverted { .. }));
    }

    #[tokio::test]
    async fn unconfirmed_issuance_reports_the_hash_without_a_credential_id() {
        let (chain, _store, orchestrator) = setup().await;
        let institution = Address::repeat_byte(0xbb);
        ready_institution(&chain, institution, chain.signer_address());
        chain.set_withhold_receipts(true);

        let outcome = orchestrator.issue(params(institution)).await.unwrap();
        assert!(!outcome.confirmed);
        assert_eq!(outcome.credential_id, None);
        assert_eq!(outcome.share_link, None);
    }

    #[tokio::test]
    async fn issuance_materializes_the_credential_optimistically() {
        let (chain, store, orchestrator) = setup().await;
        let institution = Address::repeat_byte(0xbb);
        ready_institution(&chain, institution, chain.signer_address());

        let outcome = orchestrator.issue(params(institution)).await.unwrap();
        let credential_id = outcome.credential_id.unwrap();

        let row = store.get_credential(credential_id).await.unwrap().unwrap();
        assert_eq!(
            row.fingerprint,
            "1111111111111111111111111111111111111111111111111111111111111111"
        );
        assert_eq!(row.student_name, "Ada Lovelace");
        assert!(!row.revoked);
        assert!(row.tx_hash.is_some());

        let stored_institution = store
            .get_institution(&format!("{:?}", institution))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored_institution.name, "Example University");

        assert_eq!(
            outcome.share_link.unwrap(),
            format!(
                "http://localhost:8080/verify/{}/0x{}",
                credential_id, outcome.fingerprint
            )
        );
    }

    #[tokio::test]
    async fn revocation_submits_one_transaction_and_leaves_the_cache_alone() {
        let (chain, store, orchestrator) = setup().await;
        let institution = Address::repeat_byte(0xbb);
        ready_institution(&chain, institution, chain.signer_address());
        let outcome = orchestrator.issue(params(institution)).await.unwrap();
        let credential_id = outcome.credential_id.unwrap();
        let before = chain.submitted().len();

        let revoke = orchestrator
            .revoke(credential_id, "issued in error")
            .await
            .unwrap();
        assert_eq!(
            revoke.reason_hash,
            bare_hex(&keccak256("issued in error".as_bytes()))
        );

        let submitted = chain.submitted();
        assert_eq!(submitted.len(), before + 1);
        assert_matches!(
            submitted.last().unwrap().call,
            VaultCall::RevokeCredential { .. }
        );
        // The flag is only flipped by the indexer when the event arrives.
        let row = store.get_credential(credential_id).await.unwrap().unwrap();
        assert!(!row.revoked);
    }

    #[tokio::test]
    async fn revoking_an_unknown_credential_is_rejected() {
        let (_chain, _store, orchestrator) = setup().await;
        let result = orchestrator.revoke(42, "no such credential").await;
        assert_matches!(result, Err(ServiceError::CredentialNotFound(42)));
    }

    #[tokio::test]
    async fn receipt_lookup_decodes_the_issuance_event() {
        let (chain, _store, orchestrator) = setup().await;
        let institution = Address::repeat_byte(0xbb);
        ready_institution(&chain, institution, chain.signer_address());
        let outcome = orchestrator.issue(params(institution)).await.unwrap();

        let report = orchestrator
            .transaction_receipt(outcome.tx_hash)
            .await
            .unwrap();
        assert!(report.success);
        assert_eq!(report.issued.unwrap().credential_id, 1);

        let missing = orchestrator
            .transaction_receipt(B256::repeat_byte(0xee))
            .await;
        assert_matches!(missing, Err(ServiceError::ReceiptNotFound(_)));
    }
}
