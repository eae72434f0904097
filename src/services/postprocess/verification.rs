//! Optional claim verification against collected citations.

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::domain::models::Citation;
use crate::domain::ports::Activities;
use crate::services::retry::RetryPolicy;

/// Run the claim-verification activity. Verification is always recoverable:
/// a failure returns `None` and the caller annotates metadata instead of
/// failing the strategy.
pub async fn verify_claims(
    activities: &Arc<dyn Activities>,
    retry: &RetryPolicy,
    answer: &str,
    citations: &[Citation],
) -> Option<Value> {
    if citations.is_empty() {
        return None;
    }
    match retry
        .run("VerifyClaimsActivity", || {
            activities.verify_claims(answer, citations)
        })
        .await
    {
        Ok(digest) => Some(digest),
        Err(err) => {
            warn!(error = %err, "claim verification failed, continuing without digest");
            None
        }
    }
}
