#![forbid(unsafe_code)]

//! Request principal and ownership checks.
//!
//! Credentials are verified upstream; the identity collaborator forwards the
//! resolved user id in a configurable header. Every handler that needs a
//! principal takes [`Principal`] as an extractor, so an unauthenticated
//! request never reaches handler code.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::api::AppState;
use crate::error::{ApiError, ApiResult};
use crate::ids::{canonical_id, parse_id};
use crate::store::users::UserRecord;

/// The authenticated user a request acts on behalf of.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user: UserRecord,
}

impl Principal {
    pub fn id(&self) -> &str {
        &self.user.id
    }
}

impl FromRequestParts<AppState> for Principal {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(&state.principal_header)
            .ok_or_else(|| ApiError::unauthorized("Unauthorized request"))?
            .to_str()
            .map_err(|_| ApiError::unauthorized("Invalid principal"))?;
        let id = parse_id(raw).ok_or_else(|| ApiError::unauthorized("Invalid principal"))?;
        let user = state
            .store
            .get_user(&id)
            .await?
            .ok_or_else(|| ApiError::unauthorized("Invalid principal"))?;
        Ok(Self { user })
    }
}

/// Canonical comparison of a principal against a resource owner. An absent
/// or blank principal never owns anything.
pub fn is_owner(principal: Option<&str>, owner: &str) -> bool {
    match principal {
        Some(principal) if !principal.trim().is_empty() => {
            canonical_id(principal) == canonical_id(owner)
        }
        _ => false,
    }
}

/// Fails with `Forbidden` unless `principal` owns the resource.
pub fn ensure_owner(principal: &Principal, owner: &str, action: &str) -> ApiResult<()> {
    if is_owner(Some(principal.id()), owner) {
        Ok(())
    } else {
        tracing::warn!(principal = principal.id(), owner, action, "ownership check failed");
        Err(ApiError::forbidden(format!(
            "You do not have permission to {action}"
        )))
    }
}
