pub mod backup;
pub mod expiry;

use crate::AppState;

pub fn spawn_all(state: AppState) {
    tokio::spawn(expiry::run(state.clone()));
    tokio::spawn(backup::run(state));
    tracing::info!("Background tasks spawned");
}
