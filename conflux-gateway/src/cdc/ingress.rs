//! CDC ingress endpoint: `POST /internal/cdc` (spec.md §4.5, C5).

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::Value;

use conflux_service::error::{Error, Result};

use super::record::{CdcBatch, CdcRecord};
use crate::state::GatewayState;

const SECRET_HEADER: &str = "x-cdc-secret";

/// Two framework tables are special: the ingress publishes them directly
/// to the owning user's channel rather than going through an integration,
/// since they are the control-plane echo that lets clients react to their
/// own settings changing elsewhere (spec.md §4.5).
fn is_framework_table(table: &str) -> bool {
    matches!(table, "user_preferences" | "user_streams")
}

/// Constant-time-ish comparison so the shared secret isn't checked with a
/// short-circuiting `==` that leaks timing on the first mismatched byte.
fn secrets_match(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// `POST /internal/cdc`: verify the shared secret, then dispatch every
/// record in the batch independently. A malformed or unroutable record is
/// logged and skipped; the batch as a whole always replies 200 (spec.md
/// §4.5 step 5, "partial success is success").
pub async fn ingest(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Json(batch): Json<CdcBatch>,
) -> Result<StatusCode> {
    let configured = state.service.config.cdc.shared_secret.as_deref();
    let provided = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok());

    let authorized = matches!(
        (configured, provided),
        (Some(expected), Some(actual)) if secrets_match(expected.as_bytes(), actual.as_bytes())
    );
    if !authorized {
        return Err(Error::Unauthenticated("invalid CDC shared secret".into()));
    }

    let max_batch = state.service.config.cdc.max_batch_size;
    if batch.records.len() > max_batch {
        tracing::warn!(
            received = batch.records.len(),
            max_batch,
            "CDC batch exceeds configured max size, truncating"
        );
    }

    let jobs = batch
        .records
        .into_iter()
        .take(max_batch)
        .map(|raw| process_one(state.clone(), raw));

    futures::future::join_all(jobs).await;

    Ok(StatusCode::OK)
}

async fn process_one(state: GatewayState, raw: Value) {
    let record: CdcRecord = match serde_json::from_value(raw) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, "skipping malformed CDC record");
            return;
        }
    };

    if is_framework_table(record.table_name()) {
        publish_framework_echo(&state, &record).await;
        return;
    }

    let Some(integration) = state.registry.routable_for_table(record.table_name()) else {
        tracing::debug!(table = record.table_name(), "no integration claims table, dropping");
        return;
    };
    let Some(routable) = integration.as_routable() else {
        return;
    };

    let payload = match record.canonical_payload() {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = %e, "failed to marshal CDC payload");
            return;
        }
    };

    if let Err(e) = routable.route_cdc_record(&state, &record, &payload).await {
        tracing::warn!(integration = integration.name(), error = %e, "CDC routing failed for record");
    }
}

async fn publish_framework_echo(state: &GatewayState, record: &CdcRecord) {
    let Some(user_id) = record.column_str("user_id").map(str::to_string) else {
        tracing::warn!(table = record.table_name(), "framework-table record missing user_id");
        return;
    };
    let payload = match record.canonical_payload() {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = %e, "failed to marshal framework echo payload");
            return;
        }
    };
    state.pubsub.publish_user(&user_id, payload).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secrets_match() {
        assert!(secrets_match(b"abc123", b"abc123"));
        assert!(!secrets_match(b"abc123", b"abc124"));
        assert!(!secrets_match(b"short", b"longer-secret"));
    }

    #[test]
    fn test_framework_tables() {
        assert!(is_framework_table("user_preferences"));
        assert!(is_framework_table("user_streams"));
        assert!(!is_framework_table("trades"));
    }
}
