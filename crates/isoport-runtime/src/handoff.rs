//! The one-shot location a worker leaves its result in.
//!
//! A slot is written at most once and read at most once. If the writer goes
//! away without filling it, the reader sees an empty slot.

use isoport_core::{DispatchError, JobOutcome, Payload};
use tokio::sync::oneshot;
use tracing::debug;

/// Allocate a fresh, empty slot.
pub fn slot() -> (SlotWriter, SlotReader) {
    let (tx, rx) = oneshot::channel();
    (SlotWriter { tx }, SlotReader { rx })
}

#[derive(Debug)]
pub struct SlotWriter {
    tx: oneshot::Sender<JobOutcome>,
}

impl SlotWriter {
    pub fn fill(self, outcome: JobOutcome) {
        // The reader may already have given up (timeout, cancellation).
        let _ = self.tx.send(outcome);
    }
}

#[derive(Debug)]
pub struct SlotReader {
    rx: oneshot::Receiver<JobOutcome>,
}

impl SlotReader {
    /// Wait for the writer to fill or drop the slot.
    pub async fn take(self) -> Option<JobOutcome> {
        self.rx.await.ok()
    }
}

/// Read a slot serialized on a worker's stdout.
///
/// Native libraries sometimes print to stdout, so the outcome is taken from
/// the last non-empty line. Anything unparsable counts as an empty slot.
pub fn read_serialized_slot(raw: &[u8]) -> Option<JobOutcome> {
    let line = raw
        .split(|b| *b == b'\n')
        .map(|line| line.trim_ascii())
        .filter(|line| !line.is_empty())
        .next_back()?;

    match serde_json::from_slice(line) {
        Ok(outcome) => Some(outcome),
        Err(err) => {
            debug!(error = %err, "unreadable worker output");
            None
        }
    }
}

/// Turn whatever the slot held into the caller-facing result.
pub fn resolve(slot: Option<JobOutcome>) -> Result<Payload, DispatchError> {
    match slot {
        Some(JobOutcome::Success(payload)) => Ok(payload),
        Some(JobOutcome::Failure { message }) if !message.trim().is_empty() => {
            Err(DispatchError::Worker { message })
        }
        Some(JobOutcome::Failure { .. }) | None => Err(DispatchError::NoResult),
    }
}
