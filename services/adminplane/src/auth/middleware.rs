//! Request middleware for authenticated route groups.
//!
//! # Key invariants
//! - The enforced resource is the matched route pattern, the same string
//!   permission discovery stored, so rules line up with routes exactly.
//! - Verified claims are inserted into request extensions for handlers.
//! - Policies are resynced before enforcement whenever the stored policy
//!   revision moved, so grants changed by another instance apply here too.
//!   A failed staleness check denies with 500 rather than enforcing stale
//!   rules.
use crate::api::error::{ApiError, api_forbidden, api_internal_message, api_unauthorized};
use crate::app::AppState;
use crate::auth::token::{AdminClaims, verify_admin_token};
use axum::extract::{MatchedPath, Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use homework_authz::{role_subject, tenant_domain};

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(axum::http::header::AUTHORIZATION)?;
    let value = value.to_str().ok()?;
    value.strip_prefix("Bearer ")
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<AdminClaims, ApiError> {
    let bearer = extract_bearer(headers).ok_or_else(|| api_unauthorized("missing bearer token"))?;
    verify_admin_token(&state.jwt, bearer).map_err(|err| {
        tracing::debug!(error = %err, "bearer token rejected");
        api_unauthorized("invalid token")
    })
}

/// Require a valid bearer token.
pub async fn require_token(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let claims = authenticate(&state, request.headers())?;
    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

/// Require a valid bearer token whose role may call the matched route.
pub async fn enforce_admin_policy(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let claims = authenticate(&state, request.headers())?;
    let resource = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let action = request.method().as_str().to_string();
    let subject = role_subject(&claims.role);
    let domain = tenant_domain(claims.tid);

    state.roles.sync_policies_if_stale().await.map_err(|err| {
        tracing::error!(error = %err, "policy resync before enforcement failed");
        api_internal_message("authorization check failed")
    })?;
    let allowed = state
        .policy
        .enforce(&subject, &domain, &resource, &action)
        .await
        .map_err(|err| {
            tracing::error!(error = %err, subject = %subject, "policy evaluation failed");
            api_internal_message("authorization check failed")
        })?;
    if !allowed {
        metrics::counter!("adminplane_policy_denials_total").increment(1);
        tracing::info!(
            subject = %subject,
            domain = %domain,
            resource = %resource,
            action = %action,
            "admin request denied"
        );
        return Err(api_forbidden("permission denied"));
    }
    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}
