//! HTTP route handlers. Handlers own the transaction boundary: they open a
//! transaction, call the core services, commit, then emit events for the
//! audit/realtime collaborators.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::events::Event;
use crate::AppState;

pub mod batches;
pub mod health;
pub mod movement_requests;
pub mod sales_orders;
pub mod stock;

/// Per-request tenant identity, resolved upstream by the gateway and passed
/// down as headers. Authentication itself lives outside this service.
#[derive(Debug, Clone, Copy)]
pub struct TenantContext {
    pub tenant_id: Uuid,
    pub user_id: Uuid,
}

fn header_uuid(parts: &Parts, name: &str) -> Result<Uuid, ServiceError> {
    let raw = parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ServiceError::InvalidRequest(format!("Missing {} header", name)))?;
    Uuid::parse_str(raw)
        .map_err(|_| ServiceError::InvalidRequest(format!("Invalid {} header", name)))
}

#[async_trait]
impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(TenantContext {
            tenant_id: header_uuid(parts, "x-tenant-id")?,
            user_id: header_uuid(parts, "x-user-id")?,
        })
    }
}

/// Expiry-gate failures write a dedicated audit action before the 409 goes
/// out; every transactional handler funnels its error through here.
pub(crate) async fn audit_blocked_expiry(state: &AppState, tenant_id: Uuid, err: &ServiceError) {
    if let ServiceError::BatchExpired {
        batch_id,
        batch_number,
        expires_at,
    } = err
    {
        state
            .event_sender
            .send_best_effort(Event::ExpiryBlocked {
                tenant_id,
                batch_id: *batch_id,
                batch_number: batch_number.clone(),
                expires_at: *expires_at,
            })
            .await;
    }
}
