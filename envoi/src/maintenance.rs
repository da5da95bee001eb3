use chrono::{DateTime, TimeDelta, Utc};
use envoi_common::tracing::{info, warn};
use envoi_store::{SessionId, SessionStore};

/// Sessions older than this are eligible for pruning
pub const DEFAULT_RETENTION_DAYS: i64 = 7;

/// Delete every session created more than `max_age` before `now`.
///
/// Resumable sessions are pruned as well: past the retention window they
/// are considered abandoned. Returns the ids that were deleted.
///
/// # Errors
/// Returns the first store error; sessions deleted before it stay deleted
pub async fn prune_sessions(
    store: &dyn SessionStore,
    max_age: TimeDelta,
    now: DateTime<Utc>,
) -> envoi_store::Result<Vec<SessionId>> {
    let mut pruned = Vec::new();

    for summary in store.list().await? {
        if summary.age_at(now) <= max_age {
            continue;
        }

        if summary.is_resumable() {
            warn!(
                session = %summary.id,
                cursor = summary.cursor,
                total = summary.total,
                "Pruning an unfinished session"
            );
        }

        store.delete(&summary.id).await?;
        pruned.push(summary.id);
    }

    info!(pruned = pruned.len(), "Pruned expired sessions");
    Ok(pruned)
}
