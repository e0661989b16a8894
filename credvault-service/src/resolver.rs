// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Answers validity and tamper queries, preferring the cache and falling
//! back to a direct chain read for credentials the indexer has not seen.

use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use alloy::primitives::B256;
use credvault_ethereum::{client::VaultChain, common::bare_hex};
use credvault_indexer::store::{CacheStore, CredentialRow};
use serde::Serialize;
use tracing::info;

use crate::error::ServiceError;

/// Terminal verdict of one verification call. One decision per call, no
/// retries here; retries belong to the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStatus {
    Valid,
    Invalid,
    Tampered,
    NotFound,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationSource {
    Cache,
    Blockchain,
}

#[derive(Clone, Debug, Serialize)]
pub struct VerificationReport {
    pub status: VerificationStatus,
    pub credential_id: u64,
    pub fingerprint_match: bool,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expired: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_wallet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub institution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub institution_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degree_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graduation_year: Option<i64>,
    /// Echoed on mismatch for debuggability. Revealing the expected value
    /// to a caller who supplied a wrong one is a known tension; see the
    /// design notes before hardening.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provided_fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub source: VerificationSource,
}

/// Credential status as reported to the status endpoint.
#[derive(Clone, Debug, Serialize)]
pub struct StatusReport {
    pub exists: bool,
    pub valid: bool,
    pub revoked: bool,
    pub fingerprint: String,
    pub student_wallet: String,
    pub institution: String,
    pub issued_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<u64>,
    pub source: VerificationSource,
}

/// Strips any number of leading `0x`/`0X` prefixes, lower-cases, and
/// requires exactly 64 hex characters.
pub fn normalize_fingerprint(input: &str) -> Result<String, ServiceError> {
    let mut cleaned = input.trim().to_lowercase();
    while let Some(rest) = cleaned.strip_prefix("0x") {
        cleaned = rest.to_string();
    }
    if cleaned.len() != 64 || !cleaned.bytes().all(|byte| byte.is_ascii_hexdigit()) {
        return Err(ServiceError::Validation(
            "fingerprint must be 32 bytes (64 hex characters)".to_string(),
        ));
    }
    Ok(cleaned)
}

pub struct VerificationResolver {
    chain: Arc<dyn VaultChain>,
    store: CacheStore,
}

impl VerificationResolver {
    pub fn new(chain: Arc<dyn VaultChain>, store: CacheStore) -> Self {
        Self { chain, store }
    }

    /// Resolves one verification query per the decision table: cache hit
    /// compares fingerprints locally; cache miss asks the contract.
    pub async fn verify(
        &self,
        credential_id: u64,
        fingerprint: &str,
    ) -> Result<VerificationReport, ServiceError> {
        let supplied = normalize_fingerprint(fingerprint)?;
        match self.store.get_credential(credential_id).await? {
            Some(credential) => Ok(self.resolve_from_cache(credential, supplied).await?),
            None => {
                info!(credential_id, "credential not in cache, checking the chain");
                self.resolve_from_chain(credential_id, supplied).await
            }
        }
    }

    async fn resolve_from_cache(
        &self,
        credential: CredentialRow,
        supplied: String,
    ) -> Result<VerificationReport, ServiceError> {
        let credential_id = credential.credential_id;
        if credential.fingerprint != supplied {
            return Ok(VerificationReport {
                status: VerificationStatus::Tampered,
                credential_id,
                fingerprint_match: false,
                valid: false,
                revoked: None,
                expired: None,
                student_wallet: None,
                institution: None,
                institution_address: None,
                issued_at: None,
                expires_at: None,
                student_name: None,
                degree_type: None,
                graduation_year: None,
                expected_fingerprint: Some(credential.fingerprint),
                provided_fingerprint: Some(format!("0x{supplied}")),
                message: Some(
                    "Fingerprint does not match. Document may have been tampered with."
                        .to_string(),
                ),
                source: VerificationSource::Cache,
            });
        }

        let now = unix_now();
        let valid = credential.is_valid(now);
        let institution = self
            .store
            .get_institution(&credential.institution_address)
            .await?;
        Ok(VerificationReport {
            status: if valid {
                VerificationStatus::Valid
            } else {
                VerificationStatus::Invalid
            },
            credential_id,
            fingerprint_match: true,
            valid,
            revoked: Some(credential.revoked),
            expired: Some(credential.is_expired(now)),
            student_wallet: Some(credential.student_wallet),
            institution: institution.map(|row| row.name),
            institution_address: Some(credential.institution_address),
            issued_at: Some(credential.issued_at),
            expires_at: credential.expires_at,
            student_name: (!credential.student_name.is_empty())
                .then_some(credential.student_name),
            degree_type: (!credential.degree_type.is_empty()).then_some(credential.degree_type),
            graduation_year: credential.graduation_year,
            expected_fingerprint: Some(credential.fingerprint),
            provided_fingerprint: None,
            message: None,
            source: VerificationSource::Cache,
        })
    }

    async fn resolve_from_chain(
        &self,
        credential_id: u64,
        supplied: String,
    ) -> Result<VerificationReport, ServiceError> {
        // Validation already guaranteed 64 hex characters.
        let word: B256 = supplied
            .parse()
            .map_err(|_| ServiceError::Validation("fingerprint must be hex".to_string()))?;
        let matches = self.chain.verify_fingerprint(credential_id, word).await?;
        let status = self.chain.credential_status(credential_id).await?;

        if matches {
            let now = unix_now();
            let expired = status.expires_at > 0 && status.expires_at < now;
            let valid = status.valid && !status.revoked && !expired;
            return Ok(VerificationReport {
                status: if valid {
                    VerificationStatus::Valid
                } else {
                    VerificationStatus::Invalid
                },
                credential_id,
                fingerprint_match: true,
                valid,
                revoked: Some(status.revoked),
                expired: Some(expired),
                student_wallet: Some(format!("{:?}", status.student_wallet)),
                institution: None,
                institution_address: Some(format!("{:?}", status.institution)),
                issued_at: Some(status.issued_at),
                expires_at: (status.expires_at > 0).then_some(status.expires_at),
                student_name: None,
                degree_type: None,
                graduation_year: None,
                expected_fingerprint: Some(bare_hex(&status.fingerprint)),
                provided_fingerprint: None,
                message: None,
                source: VerificationSource::Blockchain,
            });
        }

        // A forged fingerprint for a real credential and a never-issued id
        // are different answers for the caller.
        Ok(VerificationReport {
            status: if status.exists {
                VerificationStatus::Tampered
            } else {
                VerificationStatus::NotFound
            },
            credential_id,
            fingerprint_match: false,
            valid: false,
            revoked: None,
            expired: None,
            student_wallet: None,
            institution: None,
            institution_address: None,
            issued_at: None,
            expires_at: None,
            student_name: None,
            degree_type: None,
            graduation_year: None,
            expected_fingerprint: None,
            provided_fingerprint: Some(format!("0x{supplied}")),
            message: Some("Fingerprint does not match or credential not found".to_string()),
            source: VerificationSource::Blockchain,
        })
    }

    /// Credential status, cache first with a chain fallback.
    pub async fn credential_status(
        &self,
        credential_id: u64,
    ) -> Result<StatusReport, ServiceError> {
        if let Some(credential) = self.store.get_credential(credential_id).await? {
            let now = unix_now();
            return Ok(StatusReport {
                exists: true,
                valid: credential.is_valid(now),
                revoked: credential.revoked,
                fingerprint: credential.fingerprint,
                student_wallet: credential.student_wallet,
                institution: credential.institution_address,
                issued_at: credential.issued_at,
                expires_at: credential.expires_at,
                revoked_at: credential.revoked_at,
                source: VerificationSource::Cache,
            });
        }

        let status = self.chain.credential_status(credential_id).await?;
        if !status.exists {
            return Err(ServiceError::CredentialNotFound(credential_id));
        }
        Ok(StatusReport {
            exists: true,
            valid: status.valid,
            revoked: status.revoked,
            fingerprint: bare_hex(&status.fingerprint),
            student_wallet: format!("{:?}", status.student_wallet),
            institution: format!("{:?}", status.institution),
            issued_at: status.issued_at,
            expires_at: (status.expires_at > 0).then_some(status.expires_at),
            revoked_at: (status.revoked_at > 0).then_some(status.revoked_at),
            source: VerificationSource::Blockchain,
        })
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
    use alloy::primitives::{Address, B256};
    use assert_matches::assert_matches;
    use credvault_ethereum::{
        common::CredentialStatus,
        events::{IssuedEvent, RevokedEvent},
        test_utils::MockChain,
    };
    use super::*;

    const FP_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const FP_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    fn issued(credential_id: u64, expires_at: Option<u64>) -> IssuedEvent {
        IssuedEvent {
            credential_id,
            student_wallet: Address::repeat_byte(0xaa),
            institution: Address::repeat_byte(0xbb),
            fingerprint: B256::repeat_byte(0xaa),
            metadata_uri: "ipfs://QmMeta".to_string(),
            encrypted_payload_uri: "ipfs://QmPayload".to_string(),
            expires_at,
            block_number: 10,
            tx_hash: B256::repeat_byte(0x01),
            log_index: 0,
        }
    }

    async fn setup() -> (Arc<MockChain>, CacheStore, VerificationResolver) {
        let chain = Arc::new(MockChain::new(Address::repeat_byte(0x01), 31337));
        let store = CacheStore::in_memory().await.unwrap();
        let resolver = VerificationResolver::new(chain.clone(), store.clone());
        (chain, store, resolver)
    }

    #[test]
    fn normalization_strips_prefixes_and_case() {
        let expected = FP_A.to_string();
        for input in [
            FP_A.to_string(),
            format!("0x{FP_A}"),
            format!("0x0x{FP_A}"),
            format!("0X{}", FP_A.to_uppercase()),
            format!("  0x{FP_A}  "),
        ] {
            assert_eq!(normalize_fingerprint(&input).unwrap(), expected);
        }
    }

    #[test]
    fn normalization_rejects_bad_lengths_and_characters() {
        let non_hex = format!("{}zz", &FP_A[2..]);
        for input in ["", "0x1234", &FP_A[1..], non_hex.as_str()] {
            assert_matches!(
                normalize_fingerprint(input),
                Err(ServiceError::Validation(_))
            );
        }
    }

    #[tokio::test]
    async fn matching_fingerprint_on_valid_credential_is_valid() {
        let (_chain, store, resolver) = setup().await;
        store
            .apply_issued_event(&issued(1, None), 1_700_000_000)
            .await
            .unwrap();

        let report = resolver.verify(1, &format!("0x{FP_A}")).await.unwrap();
        assert_eq!(report.status, VerificationStatus::Valid);
        assert!(report.fingerprint_match);
        assert!(report.valid);
        assert_eq!(report.source, VerificationSource::Cache);
        assert_eq!(report.revoked, Some(false));
    }

    #[tokio::test]
    async fn wrong_fingerprint_is_tampered_not_an_error() {
        let (_chain, store, resolver) = setup().await;
        store
            .apply_issued_event(&issued(1, None), 1_700_000_000)
            .await
            .unwrap();

        let report = resolver.verify(1, FP_B).await.unwrap();
        assert_eq!(report.status, VerificationStatus::Tampered);
        assert!(!report.fingerprint_match);
        assert_eq!(report.expected_fingerprint.as_deref(), Some(FP_A));
        assert_eq!(
            report.provided_fingerprint.as_deref(),
            Some(format!("0x{FP_B}").as_str())
        );
    }

    #[tokio::test]
    async fn revoked_credential_with_correct_fingerprint_is_invalid() {
        let (_chain, store, resolver) = setup().await;
        store
            .apply_issued_event(&issued(1, None), 1_700_000_000)
            .await
            .unwrap();
        store
            .apply_revoked_event(&RevokedEvent {
                credential_id: 1,
                revoked_by: Address::repeat_byte(0xcc),
                reason_hash: B256::repeat_byte(0x22),
                revoked_at: 1_700_000_100,
                block_number: 11,
                tx_hash: B256::repeat_byte(0x02),
                log_index: 0,
            })
            .await
            .unwrap();

        let report = resolver.verify(1, FP_A).await.unwrap();
        assert_eq!(report.status, VerificationStatus::Invalid);
        assert!(report.fingerprint_match);
        assert_eq!(report.revoked, Some(true));
    }

    #[tokio::test]
    async fn expired_credential_with_correct_fingerprint_is_invalid() {
        let (_chain, store, resolver) = setup().await;
        // Expired one day before now (as seen by the resolver's clock).
        let past = unix_now() - 86_400;
        store
            .apply_issued_event(&issued(1, Some(past)), past - 1_000)
            .await
            .unwrap();

        let report = resolver.verify(1, FP_A).await.unwrap();
        assert_eq!(report.status, VerificationStatus::Invalid);
        assert_eq!(report.expired, Some(true));
        assert_eq!(report.revoked, Some(false));
    }

    #[tokio::test]
    async fn cache_miss_falls_back_to_the_chain() {
        let (chain, _store, resolver) = setup().await;
        chain.set_credential_status(
            7,
            CredentialStatus {
                exists: true,
                valid: true,
                revoked: false,
                fingerprint: B256::repeat_byte(0xaa),
                student_wallet: Address::repeat_byte(0xaa),
                institution: Address::repeat_byte(0xbb),
                issued_at: 1_700_000_000,
                expires_at: 0,
                revoked_at: 0,
            },
        );

        let report = resolver.verify(7, FP_A).await.unwrap();
        assert_eq!(report.status, VerificationStatus::Valid);
        assert_eq!(report.source, VerificationSource::Blockchain);
    }

    #[tokio::test]
    async fn chain_fallback_distinguishes_tampered_from_not_found() {
        let (chain, _store, resolver) = setup().await;
        chain.set_credential_status(
            7,
            CredentialStatus {
                exists: true,
                valid: true,
                revoked: false,
                fingerprint: B256::repeat_byte(0xaa),
                student_wallet: Address::repeat_byte(0xaa),
                institution: Address::repeat_byte(0xbb),
                issued_at: 1_700_000_000,
                expires_at: 0,
                revoked_at: 0,
            },
        );

        // Real id, wrong fingerprint.
        let report = resolver.verify(7, FP_B).await.unwrap();
        assert_eq!(report.status, VerificationStatus::Tampered);
        assert_eq!(report.expected_fingerprint, None);

        // Never-issued id.
        let report = resolver.verify(8, FP_B).await.unwrap();
        assert_eq!(report.status, VerificationStatus::NotFound);
    }

    #[tokio::test]
    async fn rpc_failure_on_fallback_is_a_service_error_not_a_verdict() {
        let (chain, _store, resolver) = setup().await;
        chain.set_fail_rpc(true);

        let result = resolver.verify(7, FP_A).await;
        assert_matches!(result, Err(ServiceError::ChainUnavailable(_)));
    }

    #[tokio::test]
    async fn status_prefers_cache_and_reports_not_found_distinctly() {
        let (_chain, store, resolver) = setup().await;
        store
            .apply_issued_event(&issued(1, None), 1_700_000_000)
            .await
            .unwrap();

        let report = resolver.credential_status(1).await.unwrap();
        assert!(report.valid);
        assert_eq!(report.source, VerificationSource::Cache);

        let missing = resolver.credential_status(99).await;
        assert_matches!(missing, Err(ServiceError::CredentialNotFound(99)));
    }
}
