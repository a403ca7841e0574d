use std::time::Duration;

use tokio::time;

use crate::AppState;

/// Background task that expires stale sessions, prunes dead OTP codes and
/// sweeps agreement obligations/deadlines.
///
/// Runs every **5 minutes**.
pub async fn run(state: AppState) {
    let mut interval = time::interval(Duration::from_secs(300));

    loop {
        interval.tick().await;

        if let Err(e) = sweep(&state).await {
            tracing::error!(error = %e, "expiry: cycle failed");
        }
    }
}

async fn sweep(state: &AppState) -> anyhow::Result<()> {
    let expired = state.sessions.expire_stale().await?;
    if expired > 0 {
        tracing::info!(count = expired, "expiry: expired stale sessions");
        metrics::counter!("sessions_swept_total").increment(expired as u64);
    }

    let pruned = state.otp.prune_expired().await?;
    if pruned > 0 {
        tracing::debug!(count = pruned, "expiry: pruned expired OTP records");
    }

    let overdue = state.agreements.get_overdue_obligations().await?;
    if !overdue.is_empty() {
        tracing::info!(count = overdue.len(), "expiry: obligations overdue");
    }

    let missed = state.agreements.check_deadlines().await?;
    if !missed.is_empty() {
        tracing::info!(count = missed.len(), "expiry: deadlines missed");
    }

    Ok(())
}
