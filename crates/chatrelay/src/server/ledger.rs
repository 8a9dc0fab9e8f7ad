//! Certificate facade handlers over the configured [`Ledger`]
//!
//! [`Ledger`]: crate::ledger::Ledger

use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::ledger::{Certificate, CertificateStatistics, CertificateStatus, LedgerError};

use super::{AppState, create_error_response};

pub(super) fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/blockchain/status", get(network_status_handler))
        .route(
            "/certificate",
            post(create_certificate_handler).get(list_certificates_handler),
        )
        .route("/certificate/verify", post(verify_certificate_handler))
        .route("/certificate/{id}", get(get_certificate_handler))
}

#[derive(Debug, Deserialize)]
pub struct CertificateRequest {
    pub id: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct CertificateResponse {
    pub certificate: Certificate,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub cert_id: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub valid: bool,
    pub certificate: Certificate,
    pub message: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub certificates: Vec<Certificate>,
    pub statistics: CertificateStatistics,
}

#[derive(Debug, Serialize)]
pub struct CertificateDetail {
    pub certificate: Certificate,
    pub valid: bool,
}

fn ledger_error_response(error: &LedgerError) -> Response {
    match error {
        LedgerError::NotFound(_) => {
            create_error_response(StatusCode::NOT_FOUND, "not_found", &error.to_string())
        }
        LedgerError::AlreadyExists(_) => {
            create_error_response(StatusCode::CONFLICT, "conflict", &error.to_string())
        }
        LedgerError::Invalid(_) => {
            create_error_response(StatusCode::BAD_REQUEST, "invalid_request", &error.to_string())
        }
    }
}

fn rejection_response(rejection: JsonRejection) -> Response {
    tracing::warn!("Rejected certificate request body: {}", rejection.body_text());
    create_error_response(
        StatusCode::BAD_REQUEST,
        "invalid_request",
        &rejection.body_text(),
    )
}

async fn network_status_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.ledger.network_status().await {
        Ok(status) => Json(status).into_response(),
        Err(e) => {
            tracing::error!("Failed to get network status: {e}");
            create_error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "ledger_unavailable",
                "Failed to get network status",
            )
        }
    }
}

async fn create_certificate_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CertificateRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(request) => request,
        Err(rejection) => return rejection_response(rejection),
    };

    match state.ledger.create_record(&request.id, &request.content).await {
        Ok(certificate) => Json(CertificateResponse {
            certificate,
            message: "Certificate created successfully".to_string(),
        })
        .into_response(),
        Err(e) => {
            tracing::warn!(cert_id = %request.id, "Failed to create certificate: {e}");
            ledger_error_response(&e)
        }
    }
}

async fn verify_certificate_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<VerifyRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(request) => request,
        Err(rejection) => return rejection_response(rejection),
    };

    match state.ledger.verify_record(&request.cert_id).await {
        Ok((certificate, valid)) => {
            let message = if valid {
                "Verification succeeded, certificate is valid"
            } else {
                "Verification failed, certificate content does not match its hash"
            };
            Json(VerifyResponse {
                valid,
                certificate,
                message: message.to_string(),
            })
            .into_response()
        }
        Err(e) => {
            tracing::warn!(cert_id = %request.cert_id, "Failed to verify certificate: {e}");
            ledger_error_response(&e)
        }
    }
}

async fn list_certificates_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Response {
    let status = match query.status.as_deref() {
        None | Some("") => None,
        Some(raw) => match raw.parse::<CertificateStatus>() {
            Ok(status) => Some(status),
            Err(e) => return ledger_error_response(&e),
        },
    };

    match state.ledger.list_records(status).await {
        Ok(certificates) => {
            let statistics = CertificateStatistics::from_records(&certificates);
            Json(ListResponse {
                certificates,
                statistics,
            })
            .into_response()
        }
        Err(e) => {
            tracing::error!("Failed to list certificates: {e}");
            ledger_error_response(&e)
        }
    }
}

async fn get_certificate_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.ledger.verify_record(&id).await {
        Ok((certificate, valid)) => Json(CertificateDetail { certificate, valid }).into_response(),
        Err(e) => {
            tracing::debug!(cert_id = %id, "Certificate lookup failed: {e}");
            ledger_error_response(&e)
        }
    }
}
