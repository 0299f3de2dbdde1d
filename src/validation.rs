use std::str::FromStr;

use axum::http::Uri;

use crate::error::ApiError;
use crate::models::AuditRequest;

/// Rejects malformed audit requests before any job id or status record
/// exists. Device/throttle/detail enums are already enforced by serde at
/// the deserialization boundary; this covers the free-form fields.
pub fn validate_audit_request(request: &AuditRequest, max_runs: u32) -> Result<(), ApiError> {
    let url = request.url.trim();
    if url.is_empty() {
        return Err(ApiError::invalid(
            "INVALID_URL",
            "URL is required and must be a valid string.",
        ));
    }

    let uri = Uri::from_str(url).map_err(|_| {
        ApiError::invalid(
            "INVALID_URL",
            "Please provide a valid URL (e.g., https://example.com).",
        )
    })?;
    if !matches!(uri.scheme_str(), Some("http") | Some("https")) || uri.host().is_none() {
        return Err(ApiError::invalid(
            "INVALID_URL",
            "Please provide a valid URL (e.g., https://example.com).",
        ));
    }

    if request.runs < 1 || request.runs > max_runs {
        return Err(ApiError::invalid(
            "INVALID_RUNS",
            format!("Runs must be a number between 1 and {max_runs}."),
        ));
    }

    Ok(())
}
