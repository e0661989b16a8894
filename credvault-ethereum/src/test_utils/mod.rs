// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Helper types for tests: ABI-faithful log builders and an in-memory
//! [`VaultChain`] implementation.

use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
    time::Duration,
};

use alloy::primitives::{keccak256, Address, B256, U256};
use async_trait::async_trait;

use crate::{
    client::VaultChain,
    common::{
        ChainClientError, CredentialStatus, InstitutionState, LogEntry, TxFees, TxOutcome,
        VaultCall, VaultEventKind,
    },
    events::{IssuedEvent, RevokedEvent, ISSUED_SIGNATURE, REVOKED_SIGNATURE},
};

const WORD: usize = 32;

fn word_u64(value: u64) -> [u8; 32] {
    let mut buf = [0u8; 32];
    buf[24..32].copy_from_slice(&value.to_be_bytes());
    buf
}

fn string_tail_len(value: &str) -> usize {
    WORD + value.len().div_ceil(WORD) * WORD
}

fn push_string_tail(buf: &mut Vec<u8>, value: &str) {
    buf.extend_from_slice(&word_u64(value.len() as u64));
    buf.extend_from_slice(value.as_bytes());
    let padding = value.len().div_ceil(WORD) * WORD - value.len();
    buf.extend_from_slice(&vec![0u8; padding]);
}

fn id_topic(credential_id: u64) -> B256 {
    B256::from(U256::from(credential_id).to_be_bytes::<32>())
}

/// Encodes an [`IssuedEvent`] the way the contract emits it.
pub fn issued_log_entry(event: &IssuedEvent) -> LogEntry {
    let metadata_offset = 4 * WORD;
    let payload_offset = metadata_offset + string_tail_len(&event.metadata_uri);
    let mut data = Vec::new();
    data.extend_from_slice(&event.fingerprint.0);
    data.extend_from_slice(&word_u64(metadata_offset as u64));
    data.extend_from_slice(&word_u64(payload_offset as u64));
    data.extend_from_slice(&word_u64(event.expires_at.unwrap_or(0)));
    push_string_tail(&mut data, &event.metadata_uri);
    push_string_tail(&mut data, &event.encrypted_payload_uri);
    LogEntry {
        block_number: event.block_number,
        tx_hash: event.tx_hash,
        log_index: event.log_index,
        topics: vec![
            *ISSUED_SIGNATURE,
            id_topic(event.credential_id),
            event.student_wallet.into_word(),
            event.institution.into_word(),
        ],
        data,
    }
}

/// Encodes a [`RevokedEvent`] the way the contract emits it.
pub fn revoked_log_entry(event: &RevokedEvent) -> LogEntry {
    let mut data = Vec::new();
    data.extend_from_slice(&event.reason_hash.0);
    data.extend_from_slice(&word_u64(event.revoked_at));
    LogEntry {
        block_number: event.block_number,
        tx_hash: event.tx_hash,
        log_index: event.log_index,
        topics: vec![
            *REVOKED_SIGNATURE,
            id_topic(event.credential_id),
            event.revoked_by.into_word(),
        ],
        data,
    }
}

/// A transaction recorded by [`MockChain::submit`].
#[derive(Clone, Debug)]
pub struct SubmittedTx {
    pub call: VaultCall,
    pub fees: TxFees,
    pub tx_hash: B256,
}

#[derive(Default)]
struct MockChainState {
    block_number: u64,
    issued_logs: Vec<LogEntry>,
    revoked_logs: Vec<LogEntry>,
    credentials: HashMap<u64, CredentialStatus>,
    institutions: HashMap<Address, InstitutionState>,
    registrars: HashSet<Address>,
    controllers: HashSet<(Address, Address)>,
    balances: HashMap<Address, U256>,
    pending_nonce: u64,
    gas_price: u128,
    gas_estimate: Option<u128>,
    next_credential_id: u64,
    submitted: Vec<SubmittedTx>,
    receipts: HashMap<B256, TxOutcome>,
    fail_rpc: bool,
    withhold_receipts: bool,
    revert_next: bool,
}

/// An in-memory chain: logs, contract state and a mempool of recorded
/// submissions. Submissions mine instantly and update the mock's own
/// contract state, so orchestrator precondition re-checks behave like the
/// real thing.
pub struct MockChain {
    state: Mutex<MockChainState>,
    signer: Address,
    super_admin: Mutex<Address>,
    chain_id: u64,
}

impl MockChain {
    pub fn new(signer: Address, chain_id: u64) -> Self {
        let state = MockChainState {
            gas_price: 1_000_000_000,
            gas_estimate: Some(100_000),
            next_credential_id: 1,
            ..MockChainState::default()
        };
        Self {
            state: Mutex::new(state),
            signer,
            super_admin: Mutex::new(signer),
            chain_id,
        }
    }

    pub fn set_block_number(&self, block_number: u64) {
        self.state.lock().unwrap().block_number = block_number;
    }

    pub fn add_issued_event(&self, event: &IssuedEvent) {
        self.state
            .lock()
            .unwrap()
            .issued_logs
            .push(issued_log_entry(event));
    }

    pub fn add_revoked_event(&self, event: &RevokedEvent) {
        self.state
            .lock()
            .unwrap()
            .revoked_logs
            .push(revoked_log_entry(event));
    }

    /// Injects a raw, possibly malformed log into one of the streams.
    pub fn add_raw_log(&self, kind: VaultEventKind, log: LogEntry) {
        let mut state = self.state.lock().unwrap();
        match kind {
            VaultEventKind::Issued => state.issued_logs.push(log),
            VaultEventKind::Revoked => state.revoked_logs.push(log),
        }
    }

    pub fn set_credential_status(&self, credential_id: u64, status: CredentialStatus) {
        self.state
            .lock()
            .unwrap()
            .credentials
            .insert(credential_id, status);
    }

    pub fn set_institution(&self, institution: Address, state: InstitutionState) {
        self.state
            .lock()
            .unwrap()
            .institutions
            .insert(institution, state);
    }

    pub fn add_registrar(&self, account: Address) {
        self.state.lock().unwrap().registrars.insert(account);
    }

    pub fn add_controller(&self, institution: Address, issuer: Address) {
        self.state
            .lock()
            .unwrap()
            .controllers
            .insert((institution, issuer));
    }

    pub fn set_super_admin(&self, account: Address) {
        *self.super_admin.lock().unwrap() = account;
    }

    pub fn set_pending_nonce(&self, nonce: u64) {
        self.state.lock().unwrap().pending_nonce = nonce;
    }

    pub fn set_balance(&self, account: Address, balance: U256) {
        self.state.lock().unwrap().balances.insert(account, balance);
    }

    /// `None` makes gas estimation fail, exercising the fallback path.
    pub fn set_gas_estimate(&self, estimate: Option<u128>) {
        self.state.lock().unwrap().gas_estimate = estimate;
    }

    pub fn set_fail_rpc(&self, fail: bool) {
        self.state.lock().unwrap().fail_rpc = fail;
    }

    /// Makes receipt waits time out without mining anything.
    pub fn set_withhold_receipts(&self, withhold: bool) {
        self.state.lock().unwrap().withhold_receipts = withhold;
    }

    /// The next submitted transaction mines with a failed status.
    pub fn set_revert_next(&self, revert: bool) {
        self.state.lock().unwrap().revert_next = revert;
    }

    pub fn submitted(&self) -> Vec<SubmittedTx> {
        self.state.lock().unwrap().submitted.clone()
    }

    fn rpc_failure() -> ChainClientError {
        alloy::transports::TransportErrorKind::custom_str("mock RPC failure").into()
    }

    fn check_rpc(state: &MockChainState) -> Result<(), ChainClientError> {
        if state.fail_rpc {
            Err(Self::rpc_failure())
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl VaultChain for MockChain {
    async fn block_number(&self) -> Result<u64, ChainClientError> {
        let state = self.state.lock().unwrap();
        Self::check_rpc(&state)?;
        Ok(state.block_number)
    }

    async fn balance(&self, account: Address) -> Result<U256, ChainClientError> {
        let state = self.state.lock().unwrap();
        Self::check_rpc(&state)?;
        Ok(state.balances.get(&account).copied().unwrap_or(U256::ZERO))
    }

    async fn event_logs(
        &self,
        kind: VaultEventKind,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<LogEntry>, ChainClientError> {
        let state = self.state.lock().unwrap();
        Self::check_rpc(&state)?;
        let logs = match kind {
            VaultEventKind::Issued => &state.issued_logs,
            VaultEventKind::Revoked => &state.revoked_logs,
        };
        Ok(logs
            .iter()
            .filter(|log| log.block_number >= from_block && log.block_number <= to_block)
            .cloned()
            .collect())
    }

    async fn credential_status(
        &self,
        credential_id: u64,
    ) -> Result<CredentialStatus, ChainClientError> {
        let state = self.state.lock().unwrap();
        Self::check_rpc(&state)?;
        Ok(state
            .credentials
            .get(&credential_id)
            .cloned()
            .unwrap_or_else(|| CredentialStatus {
                exists: false,
                valid: false,
                revoked: false,
                fingerprint: B256::ZERO,
                student_wallet: Address::ZERO,
                institution: Address::ZERO,
                issued_at: 0,
                expires_at: 0,
                revoked_at: 0,
            }))
    }

    async fn verify_fingerprint(
        &self,
        credential_id: u64,
        fingerprint: B256,
    ) -> Result<bool, ChainClientError> {
        let state = self.state.lock().unwrap();
        Self::check_rpc(&state)?;
        Ok(state
            .credentials
            .get(&credential_id)
            .is_some_and(|status| status.exists && status.fingerprint == fingerprint))
    }

    async fn institution_state(
        &self,
        institution: Address,
    ) -> Result<InstitutionState, ChainClientError> {
        let state = self.state.lock().unwrap();
        Self::check_rpc(&state)?;
        Ok(state
            .institutions
            .get(&institution)
            .cloned()
            .unwrap_or_else(|| InstitutionState {
                name: String::new(),
                is_active: false,
                exists: false,
                created_at: 0,
                last_updated_at: 0,
            }))
    }

    async fn can_issue_for(
        &self,
        institution: Address,
        issuer: Address,
    ) -> Result<bool, ChainClientError> {
        let state = self.state.lock().unwrap();
        Self::check_rpc(&state)?;
        Ok(state.controllers.contains(&(institution, issuer)))
    }

    async fn super_admin(&self) -> Result<Address, ChainClientError> {
        let state = self.state.lock().unwrap();
        Self::check_rpc(&state)?;
        Ok(*self.super_admin.lock().unwrap())
    }

    async fn is_registrar(&self, account: Address) -> Result<bool, ChainClientError> {
        let state = self.state.lock().unwrap();
        Self::check_rpc(&state)?;
        Ok(state.registrars.contains(&account))
    }

    async fn pending_nonce(&self, account: Address) -> Result<u64, ChainClientError> {
        let state = self.state.lock().unwrap();
        Self::check_rpc(&state)?;
        let _ = account;
        Ok(state.pending_nonce)
    }

    async fn gas_price(&self) -> Result<u128, ChainClientError> {
        let state = self.state.lock().unwrap();
        Self::check_rpc(&state)?;
        Ok(state.gas_price)
    }

    async fn estimate_gas(&self, _call: &VaultCall) -> Result<u128, ChainClientError> {
        let state = self.state.lock().unwrap();
        Self::check_rpc(&state)?;
        state.gas_estimate.ok_or_else(Self::rpc_failure)
    }

    async fn submit(&self, call: &VaultCall, fees: TxFees) -> Result<B256, ChainClientError> {
        let mut state = self.state.lock().unwrap();
        Self::check_rpc(&state)?;
        let index = state.submitted.len() as u64;
        let mut seed = [0u8; 16];
        seed[..8].copy_from_slice(&index.to_be_bytes());
        seed[8..].copy_from_slice(&fees.nonce.to_be_bytes());
        let tx_hash = keccak256(seed);
        let block_number = state.block_number + 1;
        state.block_number = block_number;

        let success = !state.revert_next;
        state.revert_next = false;
        let mut logs = Vec::new();
        if success {
            match call {
                VaultCall::SetRegistrar { account, allowed } => {
                    if *allowed {
                        state.registrars.insert(*account);
                    } else {
                        state.registrars.remove(account);
                    }
                }
                VaultCall::UpsertInstitution {
                    institution,
                    name,
                    active,
                } => {
                    state.institutions.insert(
                        *institution,
                        InstitutionState {
                            name: name.clone(),
                            is_active: *active,
                            exists: true,
                            created_at: block_number,
                            last_updated_at: block_number,
                        },
                    );
                }
                VaultCall::SetInstitutionController {
                    institution,
                    controller,
                    allowed,
                } => {
                    if *allowed {
                        state.controllers.insert((*institution, *controller));
                    } else {
                        state.controllers.remove(&(*institution, *controller));
                    }
                }
                VaultCall::IssueCredential(request) => {
                    let credential_id = state.next_credential_id;
                    state.next_credential_id += 1;
                    let issued_at = 1_700_000_000 + credential_id;
                    let event = IssuedEvent {
                        credential_id,
                        student_wallet: request.student_wallet,
                        institution: request.institution,
                        fingerprint: request.fingerprint,
                        metadata_uri: request.metadata_uri.clone(),
                        encrypted_payload_uri: request.encrypted_payload_uri.clone(),
                        expires_at: (request.expires_at > 0).then_some(request.expires_at),
                        block_number,
                        tx_hash,
                        log_index: 0,
                    };
                    let log = issued_log_entry(&event);
                    state.issued_logs.push(log.clone());
                    logs.push(log);
                    state.credentials.insert(
                        credential_id,
                        CredentialStatus {
                            exists: true,
                            valid: true,
                            revoked: false,
                            fingerprint: request.fingerprint,
                            student_wallet: request.student_wallet,
                            institution: request.institution,
                            issued_at,
                            expires_at: request.expires_at,
                            revoked_at: 0,
                        },
                    );
                }
                VaultCall::RevokeCredential {
                    credential_id,
                    reason_hash,
                } => {
                    let event = RevokedEvent {
                        credential_id: *credential_id,
                        revoked_by: self.signer,
                        reason_hash: *reason_hash,
                        revoked_at: block_number,
                        block_number,
                        tx_hash,
                        log_index: 0,
                    };
                    let log = revoked_log_entry(&event);
                    state.revoked_logs.push(log.clone());
                    logs.push(log);
                    if let Some(status) = state.credentials.get_mut(credential_id) {
                        status.revoked = true;
                        status.valid = false;
                        status.revoked_at = block_number;
                    }
                }
            }
        }

        state.submitted.push(SubmittedTx {
            call: call.clone(),
            fees,
            tx_hash,
        });
        state.receipts.insert(
            tx_hash,
            TxOutcome {
                tx_hash,
                success,
                block_number: Some(block_number),
                logs,
            },
        );
        Ok(tx_hash)
    }

    async fn wait_for_receipt(
        &self,
        tx_hash: B256,
        _timeout: Duration,
    ) -> Result<Option<TxOutcome>, ChainClientError> {
        let state = self.state.lock().unwrap();
        Self::check_rpc(&state)?;
        if state.withhold_receipts {
            return Ok(None);
        }
        Ok(state.receipts.get(&tx_hash).cloned())
    }

    async fn receipt(&self, tx_hash: B256) -> Result<Option<TxOutcome>, ChainClientError> {
        let state = self.state.lock().unwrap();
        Self::check_rpc(&state)?;
        if state.withhold_receipts {
            return Ok(None);
        }
        Ok(state.receipts.get(&tx_hash).cloned())
    }

    fn signer_address(&self) -> Address {
        self.signer
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }
}
