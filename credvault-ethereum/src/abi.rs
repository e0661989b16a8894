// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Hand-rolled ABI encoding for the credential vault contract surface.
//!
//! The contract interface is small and fixed, so calldata is assembled from
//! 32-byte words directly instead of going through generated bindings.

use alloy::primitives::{keccak256, Address, B256, U256};

use crate::common::{AbiError, CredentialStatus, InstitutionState, VaultCall};

const WORD: usize = 32;

// -- Function signatures --

const SET_REGISTRAR: &str = "setRegistrar(address,bool)";
const UPSERT_INSTITUTION: &str = "upsertInstitution(address,string,bool)";
const SET_INSTITUTION_CONTROLLER: &str = "setInstitutionController(address,address,bool)";
const ISSUE_CREDENTIAL: &str = "issueCredential((address,address,bytes32,string,string,uint64))";
const REVOKE_CREDENTIAL: &str = "revokeCredential(uint256,bytes32)";
const CREDENTIAL_STATUS: &str = "credentialStatus(uint256)";
const VERIFY_FINGERPRINT: &str = "verifyFingerprint(uint256,bytes32)";
const GET_INSTITUTION: &str = "getInstitution(address)";
const CAN_ISSUE_FOR_INSTITUTION: &str = "canIssueForInstitution(address,address)";
const SUPER_ADMIN: &str = "superAdmin()";
const REGISTRARS: &str = "registrars(address)";

fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature);
    [hash[0], hash[1], hash[2], hash[3]]
}

// -- Word encoding helpers --

fn word_address(value: Address) -> [u8; 32] {
    value.into_word().0
}

fn word_u64(value: u64) -> [u8; 32] {
    let mut buf = [0u8; 32];
    buf[24..32].copy_from_slice(&value.to_be_bytes());
    buf
}

fn word_bool(value: bool) -> [u8; 32] {
    let mut buf = [0u8; 32];
    buf[31] = value as u8;
    buf
}

fn word_usize(value: usize) -> [u8; 32] {
    word_u64(value as u64)
}

/// Length of a string tail: one length word plus the bytes padded to a
/// 32-byte boundary.
fn string_tail_len(value: &str) -> usize {
    WORD + value.len().div_ceil(WORD) * WORD
}

fn push_string_tail(buf: &mut Vec<u8>, value: &str) {
    buf.extend_from_slice(&word_usize(value.len()));
    buf.extend_from_slice(value.as_bytes());
    let padding = value.len().div_ceil(WORD) * WORD - value.len();
    buf.extend_from_slice(&vec![0u8; padding]);
}

// -- Call encoding --

/// Encodes a state-changing call into calldata.
pub fn encode_call(call: &VaultCall) -> Vec<u8> {
    match call {
        VaultCall::SetRegistrar { account, allowed } => {
            let mut data = selector(SET_REGISTRAR).to_vec();
            data.extend_from_slice(&word_address(*account));
            data.extend_from_slice(&word_bool(*allowed));
            data
        }
        VaultCall::UpsertInstitution {
            institution,
            name,
            active,
        } => {
            let mut data = selector(UPSERT_INSTITUTION).to_vec();
            data.extend_from_slice(&word_address(*institution));
            // The string head slot holds the offset of its tail, relative to
            // the start of the argument block.
            data.extend_from_slice(&word_usize(3 * WORD));
            data.extend_from_slice(&word_bool(*active));
            push_string_tail(&mut data, name);
            data
        }
        VaultCall::SetInstitutionController {
            institution,
            controller,
            allowed,
        } => {
            let mut data = selector(SET_INSTITUTION_CONTROLLER).to_vec();
            data.extend_from_slice(&word_address(*institution));
            data.extend_from_slice(&word_address(*controller));
            data.extend_from_slice(&word_bool(*allowed));
            data
        }
        VaultCall::IssueCredential(request) => {
            let mut data = selector(ISSUE_CREDENTIAL).to_vec();
            // The request struct contains dynamic members, so the single
            // argument is an offset to the tuple encoding.
            data.extend_from_slice(&word_usize(WORD));
            // Tuple head: six slots; string offsets are relative to the
            // start of the tuple.
            let metadata_offset = 6 * WORD;
            let payload_offset = metadata_offset + string_tail_len(&request.metadata_uri);
            data.extend_from_slice(&word_address(request.institution));
            data.extend_from_slice(&word_address(request.student_wallet));
            data.extend_from_slice(&request.fingerprint.0);
            data.extend_from_slice(&word_usize(metadata_offset));
            data.extend_from_slice(&word_usize(payload_offset));
            data.extend_from_slice(&word_u64(request.expires_at));
            push_string_tail(&mut data, &request.metadata_uri);
            push_string_tail(&mut data, &request.encrypted_payload_uri);
            data
        }
        VaultCall::RevokeCredential {
            credential_id,
            reason_hash,
        } => {
            let mut data = selector(REVOKE_CREDENTIAL).to_vec();
            data.extend_from_slice(&word_u64(*credential_id));
            data.extend_from_slice(&reason_hash.0);
            data
        }
    }
}

pub fn encode_credential_status(credential_id: u64) -> Vec<u8> {
    let mut data = selector(CREDENTIAL_STATUS).to_vec();
    data.extend_from_slice(&word_u64(credential_id));
    data
}

pub fn encode_verify_fingerprint(credential_id: u64, fingerprint: B256) -> Vec<u8> {
    let mut data = selector(VERIFY_FINGERPRINT).to_vec();
    data.extend_from_slice(&word_u64(credential_id));
    data.extend_from_slice(&fingerprint.0);
    data
}

pub fn encode_get_institution(institution: Address) -> Vec<u8> {
    let mut data = selector(GET_INSTITUTION).to_vec();
    data.extend_from_slice(&word_address(institution));
    data
}

pub fn encode_can_issue_for_institution(institution: Address, issuer: Address) -> Vec<u8> {
    let mut data = selector(CAN_ISSUE_FOR_INSTITUTION).to_vec();
    data.extend_from_slice(&word_address(institution));
    data.extend_from_slice(&word_address(issuer));
    data
}

pub fn encode_super_admin() -> Vec<u8> {
    selector(SUPER_ADMIN).to_vec()
}

pub fn encode_registrars(account: Address) -> Vec<u8> {
    let mut data = selector(REGISTRARS).to_vec();
    data.extend_from_slice(&word_address(account));
    data
}

// -- Return data decoding --

fn word(data: &[u8], index: usize) -> Result<&[u8], AbiError> {
    let start = index * WORD;
    let end = start + WORD;
    if data.len() < end {
        return Err(AbiError::ShortReturnData {
            expected: end,
            got: data.len(),
        });
    }
    Ok(&data[start..end])
}

fn decode_word_bool(data: &[u8], index: usize) -> Result<bool, AbiError> {
    Ok(word(data, index)?[31] != 0)
}

fn decode_word_address(data: &[u8], index: usize) -> Result<Address, AbiError> {
    Ok(Address::from_word(B256::from_slice(word(data, index)?)))
}

fn decode_word_b256(data: &[u8], index: usize) -> Result<B256, AbiError> {
    Ok(B256::from_slice(word(data, index)?))
}

fn decode_word_u64(data: &[u8], index: usize) -> Result<u64, AbiError> {
    let value = U256::from_be_slice(word(data, index)?);
    u64::try_from(value).map_err(|_| AbiError::ValueOutOfRange)
}

fn decode_string_at(data: &[u8], offset_index: usize) -> Result<String, AbiError> {
    let offset = decode_word_u64(data, offset_index)? as usize;
    if offset % WORD != 0 || offset + WORD > data.len() {
        return Err(AbiError::StringOutOfBounds);
    }
    let length = decode_word_u64(data, offset / WORD)? as usize;
    let start = offset + WORD;
    let end = start
        .checked_add(length)
        .ok_or(AbiError::StringOutOfBounds)?;
    if end > data.len() {
        return Err(AbiError::StringOutOfBounds);
    }
    String::from_utf8(data[start..end].to_vec()).map_err(|_| AbiError::InvalidUtf8)
}

pub fn decode_bool(data: &[u8]) -> Result<bool, AbiError> {
    decode_word_bool(data, 0)
}

pub fn decode_address(data: &[u8]) -> Result<Address, AbiError> {
    decode_word_address(data, 0)
}

/// Decodes the nine-field static tuple returned by `credentialStatus`.
pub fn decode_credential_status(data: &[u8]) -> Result<CredentialStatus, AbiError> {
    Ok(CredentialStatus {
        exists: decode_word_bool(data, 0)?,
        valid: decode_word_bool(data, 1)?,
        revoked: decode_word_bool(data, 2)?,
        fingerprint: decode_word_b256(data, 3)?,
        student_wallet: decode_word_address(data, 4)?,
        institution: decode_word_address(data, 5)?,
        issued_at: decode_word_u64(data, 6)?,
        expires_at: decode_word_u64(data, 7)?,
        revoked_at: decode_word_u64(data, 8)?,
    })
}

/// Decodes the `(string,bool,bool,uint64,uint64)` tuple returned by
/// `getInstitution`.
pub fn decode_institution_state(data: &[u8]) -> Result<InstitutionState, AbiError> {
    Ok(InstitutionState {
        name: decode_string_at(data, 0)?,
        is_active: decode_word_bool(data, 1)?,
        exists: decode_word_bool(data, 2)?,
        created_at: decode_word_u64(data, 3)?,
        last_updated_at: decode_word_u64(data, 4)?,
    })
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{address, b256};

    use super::*;
    use crate::common::IssueCredentialRequest;

    #[test]
    fn selectors_match_known_values() {
        // Spot-check against values computed with an independent keccak
        // implementation.
        assert_eq!(
            selector("transfer(address,uint256)"),
            [0xa9, 0x05, 0x9c, 0xbb]
        );
    }

    #[test]
    fn issue_credential_calldata_layout() {
        let request = IssueCredentialRequest {
            institution: address!("00000000000000000000000000000000000000aa"),
            student_wallet: address!("00000000000000000000000000000000000000bb"),
            fingerprint: b256!("1111111111111111111111111111111111111111111111111111111111111111"),
            metadata_uri: "ipfs://meta".to_string(),
            encrypted_payload_uri: "ipfs://payload".to_string(),
            expires_at: 0,
        };
        let data = encode_call(&VaultCall::IssueCredential(request));

        // selector + argument offset + 6-slot tuple head + two string tails
        // of one length word and one padded content word each.
        assert_eq!(data.len(), 4 + 32 + 6 * 32 + 2 * 64);
        let arg_word = |index: usize| decode_word_u64(&data[4..], index).unwrap();
        // Argument offset points just past itself.
        assert_eq!(arg_word(0), 0x20);
        // Metadata offset (tuple-relative) is the size of the tuple head.
        assert_eq!(arg_word(4), 0xc0);
        // Payload offset skips the metadata tail as well.
        assert_eq!(arg_word(5), 0xc0 + 0x40);
        // Metadata tail starts with its length.
        let tail = 4 + 32 + 6 * 32;
        assert_eq!(data[tail + 31] as usize, "ipfs://meta".len());
        assert_eq!(&data[tail + 32..tail + 32 + 11], b"ipfs://meta");
    }

    #[test]
    fn upsert_institution_calldata_layout() {
        let data = encode_call(&VaultCall::UpsertInstitution {
            institution: address!("00000000000000000000000000000000000000aa"),
            name: "Example University".to_string(),
            active: true,
        });
        // selector + 3-slot head + length word + one padded content word.
        assert_eq!(data.len(), 4 + 3 * 32 + 64);
        // String offset covers the three head slots.
        assert_eq!(data[4 + 32 + 31], 0x60);
        assert_eq!(data[4 + 2 * 32 + 31], 1);
    }

    #[test]
    fn credential_status_round_trip() {
        let mut data = Vec::new();
        data.extend_from_slice(&word_bool(true));
        data.extend_from_slice(&word_bool(false));
        data.extend_from_slice(&word_bool(true));
        data.extend_from_slice(
            &b256!("2222222222222222222222222222222222222222222222222222222222222222").0,
        );
        data.extend_from_slice(&word_address(address!(
            "00000000000000000000000000000000000000cc"
        )));
        data.extend_from_slice(&word_address(address!(
            "00000000000000000000000000000000000000dd"
        )));
        data.extend_from_slice(&word_u64(1_700_000_000));
        data.extend_from_slice(&word_u64(0));
        data.extend_from_slice(&word_u64(1_700_000_500));

        let status = decode_credential_status(&data).unwrap();
        assert!(status.exists);
        assert!(!status.valid);
        assert!(status.revoked);
        assert_eq!(status.issued_at, 1_700_000_000);
        assert_eq!(status.revoked_at, 1_700_000_500);
    }

    #[test]
    fn institution_state_round_trip() {
        let mut data = Vec::new();
        data.extend_from_slice(&word_usize(5 * WORD));
        data.extend_from_slice(&word_bool(true));
        data.extend_from_slice(&word_bool(true));
        data.extend_from_slice(&word_u64(100));
        data.extend_from_slice(&word_u64(200));
        push_string_tail(&mut data, "Example University");

        let state = decode_institution_state(&data).unwrap();
        assert_eq!(state.name, "Example University");
        assert!(state.is_active);
        assert!(state.exists);
        assert_eq!(state.created_at, 100);
        assert_eq!(state.last_updated_at, 200);
    }

    #[test]
    fn short_return_data_is_rejected() {
        assert_eq!(
            decode_credential_status(&[0u8; 32]),
            Err(AbiError::ShortReturnData {
                expected: 64,
                got: 32
            })
        );
    }

    #[test]
    fn string_with_bad_offset_is_rejected() {
        let mut data = Vec::new();
        data.extend_from_slice(&word_usize(31)); // not word-aligned
        assert_eq!(decode_string_at(&data, 0), Err(AbiError::StringOutOfBounds));
    }
}
