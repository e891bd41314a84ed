use std::sync::Arc;

use printcast_core::types::PrintState;
use printcast_streamer::Orchestrator;
use tokio::sync::watch;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Last state seen by the print monitor; stays `unknown` without one.
    pub print_state: watch::Receiver<PrintState>,
}

impl AppState {
    /// State for a deployment without a print monitor.
    pub fn standalone(orchestrator: Arc<Orchestrator>) -> Self {
        let (tx, print_state) = watch::channel(PrintState::Unknown);
        // Receivers keep reading the last value after the sender is gone.
        drop(tx);
        Self {
            orchestrator,
            print_state,
        }
    }
}
