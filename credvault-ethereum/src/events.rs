// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Typed decoding of the vault contract's event logs.
//!
//! Decoding is an explicit step separate from fetching: a malformed log
//! yields an [`EventDecodeError`] for that log alone, so callers can skip it
//! without losing the rest of a batch.

use std::sync::LazyLock;

use alloy::primitives::{keccak256, Address, B256, U256};
use serde::{Deserialize, Serialize};

use crate::common::{EventDecodeError, LogEntry};

const WORD: usize = 32;

const ISSUED_EVENT: &str = "CredentialIssued(uint256,address,address,bytes32,string,string,uint64)";
const REVOKED_EVENT: &str = "CredentialRevoked(uint256,address,bytes32,uint64)";

/// `topic0` of `CredentialIssued`.
pub static ISSUED_SIGNATURE: LazyLock<B256> = LazyLock::new(|| keccak256(ISSUED_EVENT));

/// `topic0` of `CredentialRevoked`.
pub static REVOKED_SIGNATURE: LazyLock<B256> = LazyLock::new(|| keccak256(REVOKED_EVENT));

/// A decoded `CredentialIssued` log together with its provenance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedEvent {
    pub credential_id: u64,
    pub student_wallet: Address,
    pub institution: Address,
    pub fingerprint: B256,
    pub metadata_uri: String,
    pub encrypted_payload_uri: String,
    /// `None` when the on-chain field is zero (no expiry).
    pub expires_at: Option<u64>,
    pub block_number: u64,
    pub tx_hash: B256,
    pub log_index: u64,
}

/// A decoded `CredentialRevoked` log together with its provenance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokedEvent {
    pub credential_id: u64,
    pub revoked_by: Address,
    pub reason_hash: B256,
    pub revoked_at: u64,
    pub block_number: u64,
    pub tx_hash: B256,
    pub log_index: u64,
}

/// A decoded vault event of either kind.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VaultEvent {
    Issued(IssuedEvent),
    Revoked(RevokedEvent),
}

fn check_topics(log: &LogEntry, signature: B256, expected: usize) -> Result<(), EventDecodeError> {
    if log.topics.first() != Some(&signature) {
        return Err(EventDecodeError::WrongSignature);
    }
    if log.topics.len() != expected {
        return Err(EventDecodeError::MissingTopics {
            expected,
            got: log.topics.len(),
        });
    }
    Ok(())
}

fn topic_u64(topic: B256) -> Result<u64, EventDecodeError> {
    let value = U256::from_be_bytes(topic.0);
    u64::try_from(value).map_err(|_| EventDecodeError::ValueOutOfRange)
}

fn data_word(data: &[u8], index: usize) -> Result<&[u8], EventDecodeError> {
    let start = index * WORD;
    let end = start + WORD;
    if data.len() < end {
        return Err(EventDecodeError::TruncatedData {
            expected: end,
            got: data.len(),
        });
    }
    Ok(&data[start..end])
}

fn data_u64(data: &[u8], index: usize) -> Result<u64, EventDecodeError> {
    let value = U256::from_be_slice(data_word(data, index)?);
    u64::try_from(value).map_err(|_| EventDecodeError::ValueOutOfRange)
}

fn data_string(data: &[u8], offset_index: usize) -> Result<String, EventDecodeError> {
    let offset = data_u64(data, offset_index)? as usize;
    if offset % WORD != 0 || offset + WORD > data.len() {
        return Err(EventDecodeError::StringOutOfBounds);
    }
    let length = data_u64(data, offset / WORD)? as usize;
    let start = offset + WORD;
    let end = start
        .checked_add(length)
        .ok_or(EventDecodeError::StringOutOfBounds)?;
    if end > data.len() {
        return Err(EventDecodeError::StringOutOfBounds);
    }
    String::from_utf8(data[start..end].to_vec()).map_err(|_| EventDecodeError::InvalidUtf8)
}

/// Decodes a `CredentialIssued` log.
///
/// Topics: signature, credential id, student wallet, institution.
/// Data: fingerprint, metadata URI offset, payload URI offset, expiry, then
/// the string tails.
pub fn decode_issued(log: &LogEntry) -> Result<IssuedEvent, EventDecodeError> {
    check_topics(log, *ISSUED_SIGNATURE, 4)?;
    let expires_at = data_u64(&log.data, 3)?;
    Ok(IssuedEvent {
        credential_id: topic_u64(log.topics[1])?,
        student_wallet: Address::from_word(log.topics[2]),
        institution: Address::from_word(log.topics[3]),
        fingerprint: B256::from_slice(data_word(&log.data, 0)?),
        metadata_uri: data_string(&log.data, 1)?,
        encrypted_payload_uri: data_string(&log.data, 2)?,
        expires_at: (expires_at > 0).then_some(expires_at),
        block_number: log.block_number,
        tx_hash: log.tx_hash,
        log_index: log.log_index,
    })
}

/// Decodes a `CredentialRevoked` log.
///
/// Topics: signature, credential id, revoker. Data: reason hash, timestamp.
pub fn decode_revoked(log: &LogEntry) -> Result<RevokedEvent, EventDecodeError> {
    check_topics(log, *REVOKED_SIGNATURE, 3)?;
    Ok(RevokedEvent {
        credential_id: topic_u64(log.topics[1])?,
        revoked_by: Address::from_word(log.topics[2]),
        reason_hash: B256::from_slice(data_word(&log.data, 0)?),
        revoked_at: data_u64(&log.data, 1)?,
        block_number: log.block_number,
        tx_hash: log.tx_hash,
        log_index: log.log_index,
    })
}
