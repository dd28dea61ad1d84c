use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use std::ops::Deref;
use std::sync::Arc;

use crate::error::ApiError;
use crate::tenant::{store, RequestContext};

/// Handler-side view of the context the gate installed.
///
/// Reads the context store rather than request extensions, so a handler
/// mounted without the gate fails closed instead of running unscoped.
#[derive(Debug, Clone)]
pub struct CurrentTenant(pub Arc<RequestContext>);

impl Deref for CurrentTenant {
    type Target = RequestContext;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentTenant
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        store::get().map(CurrentTenant).map_err(|err| {
            tracing::error!(
                reason = err.code(),
                path = %parts.uri.path(),
                "handler reached without an active tenant context"
            );
            ApiError::from(err)
        })
    }
}
