use axum::http::{header::InvalidHeaderName, HeaderMap, HeaderName};

use super::context::{Resolution, ResolutionSource};
use super::error::TenantError;
use super::id::{IdFormat, TenantId};
use crate::auth::Claims;

/// Longest client-supplied value echoed into a log line
pub const MAX_LOGGED_LEN: usize = 64;

/// Turns the tenant signals on a request into exactly one tenant, or refuses.
///
/// A verified token claim outranks the header so a caller cannot switch
/// tenants by editing a header. When both are present they must agree.
/// There is no fallback tenant.
#[derive(Debug, Clone)]
pub struct TenantResolver {
    header_name: HeaderName,
    id_format: IdFormat,
}

impl TenantResolver {
    pub fn new(header_name: &str, id_format: IdFormat) -> Result<Self, InvalidHeaderName> {
        Ok(Self {
            header_name: HeaderName::from_bytes(header_name.as_bytes())?,
            id_format,
        })
    }

    pub fn resolve(&self, headers: &HeaderMap, claims: Option<&Claims>) -> Result<Resolution, TenantError> {
        let from_header = self.header_tenant(headers)?;
        let from_claim = claims
            .and_then(|c| c.tenant_id.as_ref())
            .map(|claim| claim.to_tenant_id(self.id_format))
            .transpose()?;

        match (from_claim, from_header) {
            (Some(claim), Some(header)) if claim != header => Err(TenantError::TenantMismatch {
                header: header.to_string(),
                claim: claim.to_string(),
            }),
            (Some(claim), _) => Ok(Resolution {
                tenant_id: claim,
                source: ResolutionSource::Claim,
            }),
            (None, Some(header)) => Ok(Resolution {
                tenant_id: header,
                source: ResolutionSource::Header,
            }),
            (None, None) => Err(TenantError::MissingTenantContext),
        }
    }

    /// Raw identifier the caller tried to use, for rejection logs.
    /// Capped so a hostile header cannot flood the log line.
    pub fn attempted(&self, headers: &HeaderMap, claims: Option<&Claims>) -> Option<String> {
        let raw = claims
            .and_then(|c| c.tenant_id.as_ref())
            .map(|claim| claim.raw())
            .or_else(|| {
                headers
                    .get(&self.header_name)
                    .and_then(|v| v.to_str().ok())
                    .map(|s| s.trim().to_string())
            })
            .filter(|s| !s.is_empty())?;

        Some(raw.chars().take(MAX_LOGGED_LEN).collect())
    }

    fn header_tenant(&self, headers: &HeaderMap) -> Result<Option<TenantId>, TenantError> {
        let mut values = headers.get_all(&self.header_name).iter();
        let Some(first) = values.next() else {
            return Ok(None);
        };
        if values.next().is_some() {
            return Err(TenantError::InvalidTenantIdentifier(format!(
                "multiple {} headers",
                self.header_name
            )));
        }

        let raw = first.to_str().map_err(|_| {
            TenantError::InvalidTenantIdentifier(format!("{} header is not valid ASCII", self.header_name))
        })?;
        if raw.trim().is_empty() {
            return Ok(None);
        }

        TenantId::parse(raw, self.id_format).map(Some)
    }
}
