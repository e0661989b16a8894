// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! SQLite-backed cache of on-chain state: raw event records, the indexing
//! checkpoint, and the materialized credential/institution projections.

use credvault_ethereum::{
    common::bare_hex,
    events::{IssuedEvent, RevokedEvent},
};
use serde::Serialize;
use sqlx::{
    sqlite::{SqlitePool, SqlitePoolOptions},
    Row, Sqlite, Transaction,
};
use thiserror::Error;

use crate::schema;

/// Placeholder until the orchestrator supplies a real display name.
pub const UNKNOWN_INSTITUTION: &str = "Unknown Institution";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Outcome of applying a revocation event to the projected state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RevocationOutcome {
    Applied,
    /// The matching issuance has not been projected yet. Expected while the
    /// issuance and revocation land in different batches; a later pass
    /// reconciles it.
    UnknownCredential,
}

/// A row of the `credentials` projection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CredentialRow {
    pub credential_id: u64,
    pub student_wallet: String,
    pub institution_address: String,
    pub fingerprint: String,
    pub metadata_uri: String,
    pub encrypted_payload_uri: String,
    pub issued_at: u64,
    pub expires_at: Option<u64>,
    pub revoked: bool,
    pub revoked_at: Option<u64>,
    pub revocation_reason_hash: Option<String>,
    pub student_name: String,
    pub passport_number: String,
    pub degree_type: String,
    pub graduation_year: Option<i64>,
    pub document_hash: Option<String>,
    pub tx_hash: Option<String>,
}

impl CredentialRow {
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at < now)
    }

    /// Derived validity; recomputed on every read, never stored.
    pub fn is_valid(&self, now: u64) -> bool {
        !self.revoked && !self.is_expired(now)
    }
}

/// A row of the `institutions` projection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InstitutionRow {
    pub address: String,
    pub name: String,
    pub is_active: bool,
    pub created_at: u64,
    pub last_updated_at: u64,
}

/// Field set both writers upsert into the `credentials` table. The revoked
/// flag and its metadata are deliberately absent: only the revocation
/// projection writes those.
#[derive(Clone, Debug, Default)]
pub struct CredentialProjection {
    pub credential_id: u64,
    pub student_wallet: String,
    pub institution_address: String,
    pub institution_name: Option<String>,
    pub fingerprint: String,
    pub metadata_uri: String,
    pub encrypted_payload_uri: String,
    pub issued_at: u64,
    pub expires_at: Option<u64>,
    pub student_name: String,
    pub passport_number: String,
    pub degree_type: String,
    pub graduation_year: Option<i64>,
    pub document_hash: Option<String>,
    pub tx_hash: Option<String>,
}

impl CredentialProjection {
    /// The projection the indexer derives from a `CredentialIssued` event.
    /// Local-only fields stay empty so an earlier optimistic write is not
    /// clobbered.
    pub fn from_event(event: &IssuedEvent, now: u64) -> Self {
        CredentialProjection {
            credential_id: event.credential_id,
            student_wallet: format!("{:?}", event.student_wallet),
            institution_address: format!("{:?}", event.institution),
            institution_name: None,
            fingerprint: bare_hex(&event.fingerprint),
            metadata_uri: event.metadata_uri.clone(),
            encrypted_payload_uri: event.encrypted_payload_uri.clone(),
            issued_at: now,
            expires_at: event.expires_at,
            tx_hash: Some(format!("{:?}", event.tx_hash)),
            ..CredentialProjection::default()
        }
    }
}

/// The shared relational cache.
///
/// Event tables are written only by the indexer; the credential and
/// institution projections are written by the indexer (authoritative) and
/// the issuance orchestrator (optimistic) through the same upsert.
#[derive(Clone)]
pub struct CacheStore {
    pool: SqlitePool,
}

impl CacheStore {
    /// Opens the database and initializes the schema.
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.initialize_schema().await?;
        Ok(store)
    }

    /// An in-memory database for tests.
    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::new("sqlite::memory:").await
    }

    async fn initialize_schema(&self) -> Result<(), StoreError> {
        for statement in [
            schema::CREATE_ISSUED_EVENTS_TABLE,
            schema::CREATE_REVOKED_EVENTS_TABLE,
            schema::CREATE_CHECKPOINTS_TABLE,
            schema::CREATE_INSTITUTIONS_TABLE,
            schema::CREATE_CREDENTIALS_TABLE,
        ] {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    // -- Checkpoint --

    /// Last fully processed block for `stream`; 0 when the stream has never
    /// run.
    pub async fn last_processed_block(&self, stream: &str) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT last_processed_block FROM indexer_checkpoints WHERE stream = ?1")
            .bind(stream)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row
            .map(|row| row.get::<i64, _>("last_processed_block") as u64)
            .unwrap_or(0))
    }

    /// Advances the checkpoint for `stream`. The guard keeps the stored
    /// value non-decreasing even if a stale writer retries.
    pub async fn advance_checkpoint(&self, stream: &str, block_number: u64) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO indexer_checkpoints (stream, last_processed_block, updated_at)
            VALUES (?1, ?2, CURRENT_TIMESTAMP)
            ON CONFLICT(stream) DO UPDATE SET
                last_processed_block = excluded.last_processed_block,
                updated_at = CURRENT_TIMESTAMP
            WHERE excluded.last_processed_block > indexer_checkpoints.last_processed_block
            "#,
        )
        .bind(stream)
        .bind(block_number as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // -- Event application --

    /// Records a `CredentialIssued` event and projects it into the
    /// credential and institution tables, atomically. Replaying the same
    /// transaction hash overwrites in place.
    pub async fn apply_issued_event(&self, event: &IssuedEvent, now: u64) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO issued_events
                (tx_hash, block_number, log_index, credential_id, student_wallet,
                 institution, fingerprint, metadata_uri, encrypted_payload_uri,
                 expires_at, processed)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 1)
            "#,
        )
        .bind(format!("{:?}", event.tx_hash))
        .bind(event.block_number as i64)
        .bind(event.log_index as i64)
        .bind(event.credential_id as i64)
        .bind(format!("{:?}", event.student_wallet))
        .bind(format!("{:?}", event.institution))
        .bind(bare_hex(&event.fingerprint))
        .bind(&event.metadata_uri)
        .bind(&event.encrypted_payload_uri)
        .bind(event.expires_at.map(|value| value as i64))
        .execute(&mut *tx)
        .await?;

        let projection = CredentialProjection::from_event(event, now);
        Self::insert_institution_tx(&mut tx, &projection, event.block_number).await?;
        Self::upsert_credential_tx(&mut tx, &projection).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Records a `CredentialRevoked` event and flips the projected
    /// credential to revoked. The flag is only ever set here, never
    /// cleared.
    pub async fn apply_revoked_event(
        &self,
        event: &RevokedEvent,
    ) -> Result<RevocationOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO revoked_events
                (tx_hash, block_number, log_index, credential_id, revoked_by,
                 reason_hash, revoked_at, processed)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1)
            "#,
        )
        .bind(format!("{:?}", event.tx_hash))
        .bind(event.block_number as i64)
        .bind(event.log_index as i64)
        .bind(event.credential_id as i64)
        .bind(format!("{:?}", event.revoked_by))
        .bind(bare_hex(&event.reason_hash))
        .bind(event.revoked_at as i64)
        .execute(&mut *tx)
        .await?;

        let updated = sqlx::query(
            r#"
            UPDATE credentials SET
                revoked = 1,
                revoked_at = ?2,
                revocation_reason_hash = ?3,
                updated_at = CURRENT_TIMESTAMP
            WHERE credential_id = ?1
            "#,
        )
        .bind(event.credential_id as i64)
        .bind(event.revoked_at as i64)
        .bind(bare_hex(&event.reason_hash))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        if updated.rows_affected() == 0 {
            Ok(RevocationOutcome::UnknownCredential)
        } else {
            Ok(RevocationOutcome::Applied)
        }
    }

    // -- Credential / institution upserts --

    /// Upserts one credential row. Used by the indexer projection and by
    /// the orchestrator's optimistic write; neither path touches the
    /// revoked columns.
    pub async fn upsert_credential(
        &self,
        projection: &CredentialProjection,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        Self::insert_institution_tx(&mut tx, projection, projection.issued_at).await?;
        Self::upsert_credential_tx(&mut tx, projection).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn insert_institution_tx(
        tx: &mut Transaction<'_, Sqlite>,
        projection: &CredentialProjection,
        timestamp: u64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO institutions (address, name, is_active, created_at, last_updated_at)
            VALUES (?1, ?2, 1, ?3, ?3)
            "#,
        )
        .bind(&projection.institution_address)
        .bind(
            projection
                .institution_name
                .as_deref()
                .unwrap_or(UNKNOWN_INSTITUTION),
        )
        .bind(timestamp as i64)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn upsert_credential_tx(
        tx: &mut Transaction<'_, Sqlite>,
        projection: &CredentialProjection,
    ) -> Result<(), StoreError> {
        // Local-only fields (names, document hash) only overwrite when the
        // new value is present, so an event replay cannot blank out what
        // the orchestrator recorded at issuance time.
        sqlx::query(
            r#"
            INSERT INTO credentials
                (credential_id, student_wallet, institution_address, fingerprint,
                 metadata_uri, encrypted_payload_uri, issued_at, expires_at,
                 student_name, passport_number, degree_type, graduation_year,
                 document_hash, tx_hash)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            ON CONFLICT(credential_id) DO UPDATE SET
                student_wallet = excluded.student_wallet,
                institution_address = excluded.institution_address,
                fingerprint = excluded.fingerprint,
                metadata_uri = excluded.metadata_uri,
                encrypted_payload_uri = excluded.encrypted_payload_uri,
                issued_at = excluded.issued_at,
                expires_at = excluded.expires_at,
                student_name = CASE WHEN excluded.student_name <> ''
                    THEN excluded.student_name ELSE credentials.student_name END,
                passport_number = CASE WHEN excluded.passport_number <> ''
                    THEN excluded.passport_number ELSE credentials.passport_number END,
                degree_type = CASE WHEN excluded.degree_type <> ''
                    THEN excluded.degree_type ELSE credentials.degree_type END,
                graduation_year = COALESCE(excluded.graduation_year, credentials.graduation_year),
                document_hash = COALESCE(excluded.document_hash, credentials.document_hash),
                tx_hash = COALESCE(excluded.tx_hash, credentials.tx_hash),
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(projection.credential_id as i64)
        .bind(&projection.student_wallet)
        .bind(&projection.institution_address)
        .bind(&projection.fingerprint)
        .bind(&projection.metadata_uri)
        .bind(&projection.encrypted_payload_uri)
        .bind(projection.issued_at as i64)
        .bind(projection.expires_at.map(|value| value as i64))
        .bind(&projection.student_name)
        .bind(&projection.passport_number)
        .bind(&projection.degree_type)
        .bind(projection.graduation_year)
        .bind(&projection.document_hash)
        .bind(&projection.tx_hash)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Corrects the placeholder name once a real one is known.
    pub async fn update_institution_name(
        &self,
        address: &str,
        name: &str,
        now: u64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE institutions SET name = ?2, last_updated_at = ?3, cached_at = CURRENT_TIMESTAMP
            WHERE address = ?1 AND name <> ?2
            "#,
        )
        .bind(address)
        .bind(name)
        .bind(now as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // -- Lookups --

    pub async fn get_credential(
        &self,
        credential_id: u64,
    ) -> Result<Option<CredentialRow>, StoreError> {
        let row = sqlx::query("SELECT * FROM credentials WHERE credential_id = ?1")
            .bind(credential_id as i64)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| CredentialRow {
            credential_id: row.get::<i64, _>("credential_id") as u64,
            student_wallet: row.get("student_wallet"),
            institution_address: row.get("institution_address"),
            fingerprint: row.get("fingerprint"),
            metadata_uri: row.get("metadata_uri"),
            encrypted_payload_uri: row.get("encrypted_payload_uri"),
            issued_at: row.get::<i64, _>("issued_at") as u64,
            expires_at: row.get::<Option<i64>, _>("expires_at").map(|v| v as u64),
            revoked: row.get::<i64, _>("revoked") != 0,
            revoked_at: row.get::<Option<i64>, _>("revoked_at").map(|v| v as u64),
            revocation_reason_hash: row.get("revocation_reason_hash"),
            student_name: row.get("student_name"),
            passport_number: row.get("passport_number"),
            degree_type: row.get("degree_type"),
            graduation_year: row.get("graduation_year"),
            document_hash: row.get("document_hash"),
            tx_hash: row.get("tx_hash"),
        }))
    }

    pub async fn get_institution(
        &self,
        address: &str,
    ) -> Result<Option<InstitutionRow>, StoreError> {
        let row = sqlx::query("SELECT * FROM institutions WHERE address = ?1")
            .bind(address)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| InstitutionRow {
            address: row.get("address"),
            name: row.get("name"),
            is_active: row.get::<i64, _>("is_active") != 0,
            created_at: row.get::<i64, _>("created_at") as u64,
            last_updated_at: row.get::<i64, _>("last_updated_at") as u64,
        }))
    }

    pub async fn issued_event_count(&self) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM issued_events")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("count") as u64)
    }

    pub async fn revoked_event_count(&self) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM revoked_events")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("count") as u64)
    }

    pub async fn credential_count(&self) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM credentials")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("count") as u64)
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{address, b256};
    use credvault_ethereum::events::{IssuedEvent, RevokedEvent};

    use super::*;

    fn issued(credential_id: u64, block_number: u64, tx_byte: u8) -> IssuedEvent {
        IssuedEvent {
            credential_id,
            student_wallet: address!("00000000000000000000000000000000000000aa"),
            institution: address!("00000000000000000000000000000000000000bb"),
            fingerprint: b256!("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"),
            metadata_uri: "ipfs://QmMeta".to_string(),
            encrypted_payload_uri: "ipfs://QmPayload".to_string(),
            expires_at: None,
            block_number,
            tx_hash: alloy::primitives::B256::repeat_byte(tx_byte),
            log_index: 0,
        }
    }

    fn revoked(credential_id: u64, block_number: u64, tx_byte: u8) -> RevokedEvent {
        RevokedEvent {
            credential_id,
            revoked_by: address!("00000000000000000000000000000000000000cc"),
            reason_hash: b256!("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"),
            revoked_at: 1_700_000_000,
            block_number,
            tx_hash: alloy::primitives::B256::repeat_byte(tx_byte),
            log_index: 0,
        }
    }

    #[tokio::test]
    async fn issued_event_upsert_is_idempotent() {
        let store = CacheStore::in_memory().await.unwrap();
        let event = issued(1, 10, 0x01);

        store.apply_issued_event(&event, 1_700_000_000).await.unwrap();
        store.apply_issued_event(&event, 1_700_000_060).await.unwrap();

        assert_eq!(store.issued_event_count().await.unwrap(), 1);
        assert_eq!(store.credential_count().await.unwrap(), 1);
        let credential = store.get_credential(1).await.unwrap().unwrap();
        assert_eq!(
            credential.fingerprint,
            "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
        );
    }

    #[tokio::test]
    async fn institution_is_created_with_placeholder_name() {
        let store = CacheStore::in_memory().await.unwrap();
        store
            .apply_issued_event(&issued(1, 10, 0x01), 1_700_000_000)
            .await
            .unwrap();

        let institution = store
            .get_institution("0x00000000000000000000000000000000000000bb")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(institution.name, UNKNOWN_INSTITUTION);
        assert!(institution.is_active);
    }

    #[tokio::test]
    async fn revocation_of_unknown_credential_is_reported() {
        let store = CacheStore::in_memory().await.unwrap();
        let outcome = store.apply_revoked_event(&revoked(9, 11, 0x02)).await.unwrap();
        assert_eq!(outcome, RevocationOutcome::UnknownCredential);
        // The raw event is still recorded.
        assert_eq!(store.revoked_event_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn revocation_survives_later_issuance_upserts() {
        let store = CacheStore::in_memory().await.unwrap();
        let event = issued(1, 10, 0x01);
        store.apply_issued_event(&event, 1_700_000_000).await.unwrap();
        store.apply_revoked_event(&revoked(1, 11, 0x02)).await.unwrap();

        // Replaying the issuance (indexer) and an optimistic write
        // (orchestrator) must not clear the flag.
        store.apply_issued_event(&event, 1_700_000_120).await.unwrap();
        let projection = CredentialProjection::from_event(&event, 1_700_000_180);
        store.upsert_credential(&projection).await.unwrap();

        let credential = store.get_credential(1).await.unwrap().unwrap();
        assert!(credential.revoked);
        assert_eq!(credential.revoked_at, Some(1_700_000_000));
        assert!(credential.revocation_reason_hash.is_some());
    }

    #[tokio::test]
    async fn optimistic_extras_survive_event_replay() {
        let store = CacheStore::in_memory().await.unwrap();
        let event = issued(1, 10, 0x01);

        let mut projection = CredentialProjection::from_event(&event, 1_700_000_000);
        projection.student_name = "Ada Lovelace".to_string();
        projection.document_hash = Some("abcd".to_string());
        store.upsert_credential(&projection).await.unwrap();

        store.apply_issued_event(&event, 1_700_000_060).await.unwrap();

        let credential = store.get_credential(1).await.unwrap().unwrap();
        assert_eq!(credential.student_name, "Ada Lovelace");
        assert_eq!(credential.document_hash.as_deref(), Some("abcd"));
    }

    #[tokio::test]
    async fn checkpoint_defaults_to_zero_and_is_monotonic() {
        let store = CacheStore::in_memory().await.unwrap();
        assert_eq!(store.last_processed_block("credential_events").await.unwrap(), 0);

        store.advance_checkpoint("credential_events", 100).await.unwrap();
        assert_eq!(
            store.last_processed_block("credential_events").await.unwrap(),
            100
        );

        // A stale retry must not move the checkpoint backwards.
        store.advance_checkpoint("credential_events", 50).await.unwrap();
        assert_eq!(
            store.last_processed_block("credential_events").await.unwrap(),
            100
        );
    }

    #[tokio::test]
    async fn institution_name_update_replaces_placeholder() {
        let store = CacheStore::in_memory().await.unwrap();
        store
            .apply_issued_event(&issued(1, 10, 0x01), 1_700_000_000)
            .await
            .unwrap();
        store
            .update_institution_name(
                "0x00000000000000000000000000000000000000bb",
                "Example University",
                1_700_000_100,
            )
            .await
            .unwrap();

        let institution = store
            .get_institution("0x00000000000000000000000000000000000000bb")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(institution.name, "Example University");
        assert_eq!(institution.last_updated_at, 1_700_000_100);
    }

    #[tokio::test]
    async fn derived_validity_reflects_expiry() {
        let store = CacheStore::in_memory().await.unwrap();
        let mut event = issued(1, 10, 0x01);
        event.expires_at = Some(1_700_000_000);
        store.apply_issued_event(&event, 1_699_000_000).await.unwrap();

        let credential = store.get_credential(1).await.unwrap().unwrap();
        assert!(credential.is_valid(1_699_999_999));
        assert!(!credential.is_valid(1_700_000_001));
    }
}
