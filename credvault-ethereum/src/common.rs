// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use alloy::{
    primitives::{Address, B256},
    rpc::json_rpc,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainClientError {
    /// RPC error
    #[error(transparent)]
    RpcError(#[from] json_rpc::RpcError<alloy::transports::TransportErrorKind>),

    /// URL parsing error
    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    /// Hex parsing error
    #[error(transparent)]
    FromHexError(#[from] alloy::primitives::hex::FromHexError),

    /// Signer key parsing error
    #[error(transparent)]
    SignerError(#[from] alloy_signer_local::LocalSignerError),

    /// Transaction assembly error
    #[error(transparent)]
    TransactionBuildError(#[from] alloy::network::TransactionBuilderError<alloy::network::Ethereum>),

    /// Malformed return data from a view call
    #[error(transparent)]
    AbiError(#[from] AbiError),

    /// A log returned by the node lacked block number, transaction hash or log index
    #[error("log without provenance fields in RPC response")]
    IncompleteLog,
}

/// Errors from decoding contract return data.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AbiError {
    #[error("return data too short: expected at least {expected} bytes, got {got}")]
    ShortReturnData { expected: usize, got: usize },

    #[error("string offset or length out of bounds")]
    StringOutOfBounds,

    #[error("returned string is not valid UTF-8")]
    InvalidUtf8,

    #[error("numeric value does not fit in target type")]
    ValueOutOfRange,
}

/// Errors from decoding a single event log. The indexer skips the offending
/// log and continues with the rest of the batch.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventDecodeError {
    #[error("log signature topic does not match the expected event")]
    WrongSignature,

    #[error("expected {expected} topics, got {got}")]
    MissingTopics { expected: usize, got: usize },

    #[error("log data too short: expected at least {expected} bytes, got {got}")]
    TruncatedData { expected: usize, got: usize },

    #[error("string offset or length out of bounds")]
    StringOutOfBounds,

    #[error("event string field is not valid UTF-8")]
    InvalidUtf8,

    #[error("numeric event field does not fit in target type")]
    ValueOutOfRange,
}

/// Lowercase hex of a 32-byte value, without the `0x` prefix. Fingerprints
/// and reason hashes are cached in this form.
pub fn bare_hex(value: &B256) -> String {
    alloy::primitives::hex::encode(value)
}

/// The two event streams emitted by the credential vault contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VaultEventKind {
    Issued,
    Revoked,
}

/// A raw log as returned by `eth_getLogs`, with its provenance fields
/// resolved. Decoding into a typed event is a separate, fallible step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub block_number: u64,
    pub tx_hash: B256,
    pub log_index: u64,
    pub topics: Vec<B256>,
    pub data: Vec<u8>,
}

/// The `credentialStatus(uint256)` view return value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialStatus {
    pub exists: bool,
    pub valid: bool,
    pub revoked: bool,
    pub fingerprint: B256,
    pub student_wallet: Address,
    pub institution: Address,
    pub issued_at: u64,
    pub expires_at: u64,
    pub revoked_at: u64,
}

/// The `getInstitution(address)` view return value. The default value is
/// what the contract returns for an unregistered institution.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstitutionState {
    pub name: String,
    pub is_active: bool,
    pub exists: bool,
    pub created_at: u64,
    pub last_updated_at: u64,
}

/// Arguments of the `issueCredential` contract call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssueCredentialRequest {
    pub institution: Address,
    pub student_wallet: Address,
    pub fingerprint: B256,
    pub metadata_uri: String,
    pub encrypted_payload_uri: String,
    /// Zero means no expiry.
    pub expires_at: u64,
}

/// A state-changing contract call, prior to ABI encoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VaultCall {
    SetRegistrar {
        account: Address,
        allowed: bool,
    },
    UpsertInstitution {
        institution: Address,
        name: String,
        active: bool,
    },
    SetInstitutionController {
        institution: Address,
        controller: Address,
        allowed: bool,
    },
    IssueCredential(IssueCredentialRequest),
    RevokeCredential {
        credential_id: u64,
        reason_hash: B256,
    },
}

/// Fee fields the orchestrator pins on every transaction it submits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxFees {
    pub nonce: u64,
    pub gas_limit: u128,
    pub gas_price: u128,
}

/// A mined transaction as observed through its receipt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxOutcome {
    pub tx_hash: B256,
    pub success: bool,
    pub block_number: Option<u64>,
    pub logs: Vec<LogEntry>,
}
