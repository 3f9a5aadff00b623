use std::time::Instant;

use isoport_core::DispatchError;
use tracing::{debug, info, warn};

/// Lifecycle of one dispatched call. Terminal states are final.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl CallState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CallState::Succeeded | CallState::Failed)
    }
}

/// Bookkeeping for a single call: id, job kind, state and timings.
#[derive(Debug)]
pub struct Call {
    id: u64,
    kind: &'static str,
    state: CallState,
    created_at: Instant,
    started_at: Option<Instant>,
}

impl Call {
    pub fn new(id: u64, kind: &'static str) -> Self {
        debug!(call_id = id, kind, "call pending");
        Self {
            id,
            kind,
            state: CallState::Pending,
            created_at: Instant::now(),
            started_at: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    /// Pending -> Running. Ignored in any other state.
    pub fn start(&mut self) {
        if self.state != CallState::Pending {
            return;
        }
        self.state = CallState::Running;
        self.started_at = Some(Instant::now());
        debug!(
            call_id = self.id,
            kind = self.kind,
            queued_us = self.created_at.elapsed().as_micros() as u64,
            "call running"
        );
    }

    /// Move to a terminal state. A call that already finished stays as it is.
    pub fn finish<T>(&mut self, result: &Result<T, DispatchError>) {
        if self.state.is_terminal() {
            return;
        }
        let run_us = self
            .started_at
            .map(|t| t.elapsed().as_micros() as u64)
            .unwrap_or(0);
        match result {
            Ok(_) => {
                self.state = CallState::Succeeded;
                info!(call_id = self.id, kind = self.kind, run_us, "call succeeded");
            }
            Err(err) => {
                self.state = CallState::Failed;
                warn!(call_id = self.id, kind = self.kind, run_us, error = %err, "call failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_running_succeeded() {
        let mut call = Call::new(1, "detect");
        assert_eq!(call.state(), CallState::Pending);
        call.start();
        assert_eq!(call.state(), CallState::Running);
        call.finish::<()>(&Ok(()));
        assert_eq!(call.state(), CallState::Succeeded);
    }

    #[test]
    fn terminal_state_is_final() {
        let mut call = Call::new(2, "separate");
        call.start();
        call.finish::<()>(&Err(DispatchError::NoResult));
        assert_eq!(call.state(), CallState::Failed);

        call.finish::<()>(&Ok(()));
        call.start();
        assert_eq!(call.state(), CallState::Failed);
    }

    #[test]
    fn can_fail_before_running() {
        let mut call = Call::new(3, "detect");
        call.finish::<()>(&Err(DispatchError::Cancelled));
        assert_eq!(call.state(), CallState::Failed);
    }
}
