// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! SQLite schema definitions and constants.

/// SQL schema for the cached `CredentialIssued` events
pub const CREATE_ISSUED_EVENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS issued_events (
    tx_hash TEXT PRIMARY KEY NOT NULL,
    block_number INTEGER NOT NULL,
    log_index INTEGER NOT NULL,
    credential_id INTEGER NOT NULL,
    student_wallet TEXT NOT NULL,
    institution TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    metadata_uri TEXT NOT NULL,
    encrypted_payload_uri TEXT NOT NULL,
    expires_at INTEGER,
    processed INTEGER NOT NULL DEFAULT 0,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_issued_events_block ON issued_events(block_number);
CREATE INDEX IF NOT EXISTS idx_issued_events_credential ON issued_events(credential_id);
"#;

/// SQL schema for the cached `CredentialRevoked` events
pub const CREATE_REVOKED_EVENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS revoked_events (
    tx_hash TEXT PRIMARY KEY NOT NULL,
    block_number INTEGER NOT NULL,
    log_index INTEGER NOT NULL,
    credential_id INTEGER NOT NULL,
    revoked_by TEXT NOT NULL,
    reason_hash TEXT NOT NULL,
    revoked_at INTEGER NOT NULL,
    processed INTEGER NOT NULL DEFAULT 0,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_revoked_events_block ON revoked_events(block_number);
CREATE INDEX IF NOT EXISTS idx_revoked_events_credential ON revoked_events(credential_id);
"#;

/// SQL schema for the per-stream indexing checkpoint
pub const CREATE_CHECKPOINTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS indexer_checkpoints (
    stream TEXT PRIMARY KEY NOT NULL,
    last_processed_block INTEGER NOT NULL DEFAULT 0,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
);
"#;

/// SQL schema for the materialized institutions
pub const CREATE_INSTITUTIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS institutions (
    address TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at INTEGER NOT NULL,
    last_updated_at INTEGER NOT NULL,
    cached_at DATETIME DEFAULT CURRENT_TIMESTAMP
);
"#;

/// SQL schema for the materialized credentials
pub const CREATE_CREDENTIALS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS credentials (
    credential_id INTEGER PRIMARY KEY NOT NULL,
    student_wallet TEXT NOT NULL,
    institution_address TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    metadata_uri TEXT NOT NULL,
    encrypted_payload_uri TEXT NOT NULL,
    issued_at INTEGER NOT NULL,
    expires_at INTEGER,
    revoked INTEGER NOT NULL DEFAULT 0,
    revoked_at INTEGER,
    revocation_reason_hash TEXT,
    student_name TEXT NOT NULL DEFAULT '',
    passport_number TEXT NOT NULL DEFAULT '',
    degree_type TEXT NOT NULL DEFAULT '',
    graduation_year INTEGER,
    document_hash TEXT,
    tx_hash TEXT,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_credentials_student_wallet ON credentials(student_wallet);
CREATE INDEX IF NOT EXISTS idx_credentials_fingerprint ON credentials(fingerprint);
CREATE INDEX IF NOT EXISTS idx_credentials_institution ON credentials(institution_address);
"#;
