//! Account takeover between tenants.
//!
//! When a tenant reaches `ready` bound to an account that another tenant
//! still holds, the other tenant is disconnected. The check-then-act is
//! not atomic across tenants: two tenants going `ready` on the same
//! account at the same instant each wait at most `takeover_timeout` for
//! the other, then force the other down. Both end up disconnected.

use std::collections::BTreeSet;

use tracing::{info, warn};

use crate::{
    controller::{self, StopReason},
    events::LifecycleEvent, manager::SessionContext,
    registry::StopOutcome, ConnectionState, TenantId,
};

/// Disconnect every tenant other than `tenant` bound to `account_id`.
///
/// Returns the displaced tenants.
pub(crate) async fn resolve(
    ctx: &SessionContext,
    tenant: &TenantId,
    account_id: &str,
) -> Vec<TenantId> {
    let mut stale: BTreeSet<TenantId> = BTreeSet::new();

    match ctx.tenants.find_connected_by_account(account_id).await {
        Ok(records) => stale.extend(records.into_iter().map(|r| r.id)),
        Err(err) => warn!(tenant_id = %tenant, error = %err, "could not look up account owners"),
    }
    // the live handles are authoritative when the store lags behind
    stale.extend(
        ctx.registry
            .handles()
            .into_iter()
            .filter(|h| h.is_connected() && h.account_id().as_deref() == Some(account_id))
            .map(|h| h.tenant_id().clone()),
    );
    stale.remove(tenant);

    for other in &stale {
        info!(tenant_id = %tenant, stale_tenant = %other, "account already bound to another project, disconnecting it");
        takeover(ctx, other).await;
    }

    stale.into_iter().collect()
}

async fn takeover(ctx: &SessionContext, other: &TenantId) {
    if let Some(handle) = ctx.registry.get(other) {
        match handle
            .request_stop(StopReason::AccountTakeover, ctx.config.takeover_timeout)
            .await
        {
            StopOutcome::Stopped => return,
            outcome => {
                warn!(stale_tenant = %other, ?outcome, "stale session did not stop, forcing it down");
                controller::force_release(ctx, &handle, StopReason::AccountTakeover.logs_out()).await;
            }
        }
    }

    ctx.delete_session(other).await;
    ctx.persist_connection(other, ConnectionState::Disconnected, None)
        .await;
    ctx.events.publish_event(LifecycleEvent::disconnected(
        other,
        StopReason::AccountTakeover.as_str(),
    ));
}
