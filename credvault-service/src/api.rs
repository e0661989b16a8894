// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Thin HTTP adapters over the resolver and orchestrator contracts.

use std::sync::Arc;

use alloy::primitives::{Address, B256};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use credvault_ethereum::client::VaultChain;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::error;

use crate::{
    error::ServiceError,
    orchestrator::{IssuanceOrchestrator, IssueOutcome, IssueParams},
    resolver::{normalize_fingerprint, VerificationResolver},
};

#[derive(Clone)]
pub struct AppState {
    pub chain: Arc<dyn VaultChain>,
    pub orchestrator: Arc<IssuanceOrchestrator>,
    pub resolver: Arc<VerificationResolver>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/verify", post(verify))
        .route("/api/verify/:credential_id/:fingerprint", get(verify_from_link))
        .route("/api/credentials/issue", post(issue))
        .route("/api/credentials/:credential_id/status", get(credential_status))
        .route("/api/credentials/:credential_id/revoke", post(revoke))
        .route("/api/credentials/share-link", get(share_link))
        .route("/api/tx/:tx_hash", get(transaction_receipt))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        match &self {
            ServiceError::Validation(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            ServiceError::CredentialNotFound(_) | ServiceError::ReceiptNotFound(_) => (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": self.to_string() })),
            )
                .into_response(),
            ServiceError::ChainUnavailable(_) => {
                error!(error = %self, "chain access failed");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(json!({ "error": self.to_string() })),
                )
                    .into_response()
            }
            ServiceError::TransactionReverted { tx_hash } => (
                StatusCode::BAD_GATEWAY,
                Json(json!({
                    "error": "transaction reverted (contract execution failed)",
                    "transaction_hash": format!("{tx_hash:?}"),
                })),
            )
                .into_response(),
            ServiceError::Unconfirmed { tx_hash } => (
                StatusCode::ACCEPTED,
                Json(json!({
                    "status": "SUBMITTED",
                    "message": "transaction submitted but not confirmed in time",
                    "transaction_hash": format!("{tx_hash:?}"),
                })),
            )
                .into_response(),
            ServiceError::Store(_) => {
                error!(error = %self, "cache access failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "internal error" })),
                )
                    .into_response()
            }
        }
    }
}

async fn health(State(state): State<AppState>) -> Result<impl IntoResponse, ServiceError> {
    let signer = state.chain.signer_address();
    let block_number = state.chain.block_number().await?;
    let balance = state.chain.balance(signer).await?;
    Ok(Json(json!({
        "status": "ok",
        "chain_id": state.chain.chain_id(),
        "block_number": block_number,
        "signer": format!("{signer:?}"),
        "signer_balance_wei": balance.to_string(),
    })))
}

#[derive(Deserialize)]
struct VerifyRequest {
    credential_id: u64,
    fingerprint: String,
}

async fn verify(
    State(state): State<AppState>,
    Json(request): Json<VerifyRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let report = state
        .resolver
        .verify(request.credential_id, &request.fingerprint)
        .await?;
    Ok(Json(report))
}

async fn verify_from_link(
    State(state): State<AppState>,
    Path((credential_id, fingerprint)): Path<(u64, String)>,
) -> Result<impl IntoResponse, ServiceError> {
    let report = state.resolver.verify(credential_id, &fingerprint).await?;
    Ok(Json(report))
}

async fn credential_status(
    State(state): State<AppState>,
    Path(credential_id): Path<u64>,
) -> Result<impl IntoResponse, ServiceError> {
    let report = state.resolver.credential_status(credential_id).await?;
    Ok(Json(report))
}

#[derive(Deserialize)]
struct IssueRequest {
    institution_address: String,
    #[serde(default)]
    institution_name: String,
    #[serde(default)]
    student_wallet: Option<String>,
    #[serde(default)]
    passport_number: String,
    fingerprint: String,
    metadata_uri: String,
    encrypted_payload_uri: String,
    #[serde(default)]
    expires_at: Option<u64>,
    #[serde(default)]
    student_name: String,
    #[serde(default)]
    degree_type: String,
    #[serde(default)]
    graduation_year: Option<i64>,
    #[serde(default)]
    document_hash: Option<String>,
}

#[derive(Serialize)]
struct IssueResponse {
    transaction_hash: String,
    confirmed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    credential_id: Option<u64>,
    fingerprint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    share_link: Option<String>,
    message: &'static str,
}

impl From<IssueOutcome> for IssueResponse {
    fn from(outcome: IssueOutcome) -> Self {
        let message = if outcome.credential_id.is_some() {
            "Credential issued and cached."
        } else {
            "Transaction submitted; the credential will appear after event indexing."
        };
        IssueResponse {
            transaction_hash: format!("{:?}", outcome.tx_hash),
            confirmed: outcome.confirmed,
            credential_id: outcome.credential_id,
            fingerprint: outcome.fingerprint,
            share_link: outcome.share_link,
            message,
        }
    }
}

fn parse_address(value: &str, field: &str) -> Result<Address, ServiceError> {
    value
        .trim()
        .parse()
        .map_err(|_| ServiceError::Validation(format!("{field} is not a valid address")))
}

fn parse_tx_hash(value: &str) -> Result<B256, ServiceError> {
    let trimmed = value.trim();
    let prefixed = if trimmed.starts_with("0x") {
        trimmed.to_string()
    } else {
        format!("0x{trimmed}")
    };
    prefixed
        .parse()
        .map_err(|_| ServiceError::Validation("malformed transaction hash".to_string()))
}

impl IssueRequest {
    fn into_params(self) -> Result<IssueParams, ServiceError> {
        let institution_address = parse_address(&self.institution_address, "institution_address")?;
        let student_wallet = match &self.student_wallet {
            Some(wallet) if !wallet.trim().is_empty() => parse_address(wallet, "student_wallet")?,
            _ if !self.passport_number.trim().is_empty() => {
                IssuanceOrchestrator::derive_student_wallet(&self.passport_number)
            }
            _ => {
                return Err(ServiceError::Validation(
                    "either student_wallet or passport_number is required".to_string(),
                ))
            }
        };
        let fingerprint: B256 = normalize_fingerprint(&self.fingerprint)?
            .parse()
            .map_err(|_| ServiceError::Validation("fingerprint must be hex".to_string()))?;
        Ok(IssueParams {
            institution_address,
            institution_name: self.institution_name.trim().to_string(),
            student_wallet,
            fingerprint,
            metadata_uri: self.metadata_uri,
            encrypted_payload_uri: self.encrypted_payload_uri,
            expires_at: self.expires_at.filter(|expires_at| *expires_at > 0),
            student_name: self.student_name,
            passport_number: self.passport_number,
            degree_type: self.degree_type,
            graduation_year: self.graduation_year,
            document_hash: self.document_hash,
        })
    }
}

async fn issue(
    State(state): State<AppState>,
    Json(request): Json<IssueRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let params = request.into_params()?;
    let outcome = state.orchestrator.issue(params).await?;
    let status = if outcome.credential_id.is_some() {
        StatusCode::CREATED
    } else {
        StatusCode::ACCEPTED
    };
    Ok((status, Json(IssueResponse::from(outcome))))
}

#[derive(Deserialize)]
struct RevokeRequest {
    #[serde(default)]
    reason: String,
}

async fn revoke(
    State(state): State<AppState>,
    Path(credential_id): Path<u64>,
    Json(request): Json<RevokeRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let outcome = state
        .orchestrator
        .revoke(credential_id, &request.reason)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "transaction_hash": format!("{:?}", outcome.tx_hash),
            "reason_hash": outcome.reason_hash,
            "message": "Revocation transaction submitted. It will be processed by the event indexer.",
        })),
    ))
}

#[derive(Deserialize)]
struct ShareLinkQuery {
    credential_id: u64,
    fingerprint: String,
}

async fn share_link(
    State(state): State<AppState>,
    Query(query): Query<ShareLinkQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let fingerprint = normalize_fingerprint(&query.fingerprint)?;
    let link = state
        .orchestrator
        .share_link(query.credential_id, &fingerprint);
    Ok(Json(json!({
        "share_link": link,
        "credential_id": query.credential_id,
        "fingerprint": fingerprint,
    })))
}

async fn transaction_receipt(
    State(state): State<AppState>,
    Path(tx_hash): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let tx_hash = parse_tx_hash(&tx_hash)?;
    let report = state.orchestrator.transaction_receipt(tx_hash).await?;
    Ok(Json(json!({
        "transaction_hash": format!("{:?}", report.tx_hash),
        "status": report.success as u8,
        "block_number": report.block_number,
        "decoded": report.issued.map(|event| json!({
            "credential_id": event.credential_id,
            "student_wallet": format!("{:?}", event.student_wallet),
            "institution": format!("{:?}", event.institution),
            "fingerprint": format!("0x{}", credvault_ethereum::common::bare_hex(&event.fingerprint)),
            "metadata_uri": event.metadata_uri,
            "encrypted_payload_uri": event.encrypted_payload_uri,
            "expires_at": event.expires_at,
        })),
    })))
}
