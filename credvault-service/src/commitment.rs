// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Hash commitments over credential data.
//!
//! A commitment here is a plain SHA-256 digest of the canonical JSON
//! serialization of the credential fields, usable as a binding
//! proof-of-knowledge stand-in. It is not a zero-knowledge argument.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicInputs {
    pub credential_id: u64,
    pub fingerprint: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofData {
    pub student_wallet_hash: String,
    pub institution_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_hash: Option<String>,
}

/// A commitment proof: the digest plus the inputs a verifier may see.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentProof {
    pub commitment: String,
    pub public_inputs: PublicInputs,
    pub proof_data: ProofData,
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    alloy::primitives::hex::encode(hasher.finalize())
}

/// Canonical serialization: keys in sorted order, no whitespace.
fn canonical_digest(fields: &BTreeMap<&str, Value>) -> String {
    let serialized = serde_json::to_vec(fields).unwrap_or_default();
    sha256_hex(&serialized)
}

/// Commits to the identifying fields of a credential, optionally binding a
/// caller-supplied secret.
pub fn generate(
    credential_id: u64,
    fingerprint: &str,
    student_wallet: &str,
    institution: &str,
    secret: Option<&Value>,
) -> CommitmentProof {
    let secret_hash = secret.map(|value| {
        let mut fields = BTreeMap::new();
        fields.insert("secret", value.clone());
        canonical_digest(&fields)
    });

    let mut fields = BTreeMap::new();
    fields.insert("credential_id", json!(credential_id));
    fields.insert("fingerprint", json!(fingerprint));
    fields.insert("student_wallet", json!(student_wallet));
    fields.insert("institution", json!(institution));
    if let Some(hash) = &secret_hash {
        fields.insert("secret_hash", json!(hash));
    }

    CommitmentProof {
        commitment: canonical_digest(&fields),
        public_inputs: PublicInputs {
            credential_id,
            fingerprint: fingerprint.to_string(),
        },
        proof_data: ProofData {
            student_wallet_hash: sha256_hex(student_wallet.as_bytes()),
            institution_hash: sha256_hex(institution.as_bytes()),
            secret_hash,
        },
    }
}

/// Recomputes the commitment from the claimed private inputs and checks it
/// against the proof, optionally pinning the fingerprint.
pub fn verify(
    proof: &CommitmentProof,
    student_wallet: &str,
    institution: &str,
    expected_fingerprint: Option<&str>,
) -> bool {
    if let Some(expected) = expected_fingerprint {
        if proof.public_inputs.fingerprint != expected {
            return false;
        }
    }
    if sha256_hex(student_wallet.as_bytes()) != proof.proof_data.student_wallet_hash
        || sha256_hex(institution.as_bytes()) != proof.proof_data.institution_hash
    {
        return false;
    }

    let mut fields = BTreeMap::new();
    fields.insert("credential_id", json!(proof.public_inputs.credential_id));
    fields.insert("fingerprint", json!(proof.public_inputs.fingerprint));
    fields.insert("student_wallet", json!(student_wallet));
    fields.insert("institution", json!(institution));
    if let Some(hash) = &proof.proof_data.secret_hash {
        fields.insert("secret_hash", json!(hash));
    }
    canonical_digest(&fields) == proof.commitment
}

#[cfg(test)]
mod tests {
    use super::*;

    const FP: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const WALLET: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const INSTITUTION: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    #[test]
    fn generate_and_verify_round_trip() {
        let proof = generate(1, FP, WALLET, INSTITUTION, None);
        assert!(verify(&proof, WALLET, INSTITUTION, Some(FP)));
        assert!(verify(&proof, WALLET, INSTITUTION, None));
    }

    #[test]
    fn verification_fails_on_wrong_private_inputs() {
        let proof = generate(1, FP, WALLET, INSTITUTION, None);
        assert!(!verify(&proof, WALLET, WALLET, Some(FP)));
        assert!(!verify(&proof, INSTITUTION, INSTITUTION, Some(FP)));
    }

    #[test]
    fn verification_fails_on_wrong_fingerprint() {
        let proof = generate(1, FP, WALLET, INSTITUTION, None);
        let other = FP.replace('a', "b");
        assert!(!verify(&proof, WALLET, INSTITUTION, Some(&other)));
    }

    #[test]
    fn tampered_commitment_is_rejected() {
        let mut proof = generate(1, FP, WALLET, INSTITUTION, None);
        proof.public_inputs.credential_id = 2;
        assert!(!verify(&proof, WALLET, INSTITUTION, Some(FP)));
    }

    #[test]
    fn secret_binds_the_commitment() {
        let secret = serde_json::json!({"grade": "summa cum laude"});
        let with_secret = generate(1, FP, WALLET, INSTITUTION, Some(&secret));
        let without = generate(1, FP, WALLET, INSTITUTION, None);
        assert_ne!(with_secret.commitment, without.commitment);
        assert!(with_secret.proof_data.secret_hash.is_some());
        assert!(verify(&with_secret, WALLET, INSTITUTION, Some(FP)));
    }
}
