//! Bounded waiting for artifacts to become visible in the store.
//!
//! A matching file showing up is the only completion signal trusted here;
//! whatever the delegation layer said about the outcome is not consulted.

use std::time::Duration;

use atelier_contracts::config::PollRequest;

use crate::store::ArtifactStore;

const PROGRESS_LOG_EVERY: Duration = Duration::from_secs(10);

/// Lists matching artifacts, newest first, until at least `min_count` are
/// visible or `max_wait` has been spent sleeping.
///
/// Returns at most `min_count` names. Running out of time is not an error:
/// the last listing is returned as-is, possibly empty. Elapsed time is the
/// sum of the sleeps, so the bound is on waiting, not on listing cost. A zero
/// `poll_interval` lists once.
pub async fn await_artifacts(store: &ArtifactStore, request: &PollRequest) -> Vec<String> {
    let mut found = list_matching(store, request).await;
    let mut elapsed = Duration::ZERO;
    let mut last_progress_log = Duration::ZERO;

    while found.len() < request.min_count
        && elapsed < request.max_wait
        && !request.poll_interval.is_zero()
    {
        tokio::time::sleep(request.poll_interval).await;
        elapsed += request.poll_interval;
        found = list_matching(store, request).await;
        if elapsed - last_progress_log >= PROGRESS_LOG_EVERY {
            last_progress_log = elapsed;
            tracing::debug!(
                prefix = %request.prefix,
                found = found.len(),
                wanted = request.min_count,
                elapsed_s = elapsed.as_secs_f64(),
                "still waiting for artifacts"
            );
        }
    }

    if found.len() < request.min_count {
        tracing::info!(
            prefix = %request.prefix,
            found = found.len(),
            wanted = request.min_count,
            "poll bound reached"
        );
    }
    found
}

/// Directory listing runs on the blocking pool; a failed listing counts as
/// nothing found.
async fn list_matching(store: &ArtifactStore, request: &PollRequest) -> Vec<String> {
    let store = store.clone();
    let prefix = request.prefix.clone();
    let (since, limit) = (request.since, request.min_count);
    let listed =
        tokio::task::spawn_blocking(move || store.list_since(&prefix, since, limit)).await;
    match listed {
        Ok(Ok(names)) => names,
        Ok(Err(err)) => {
            tracing::warn!(error = %err, "artifact listing failed");
            Vec::new()
        }
        Err(err) => {
            tracing::warn!(error = %err, "artifact listing task failed");
            Vec::new()
        }
    }
}
