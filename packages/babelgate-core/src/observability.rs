//! Structured log helpers and the optional wire-capture hook (`spec.md` §6.4).
//!
//! The core logs through the `log` facade everywhere; this module exists so
//! the handful of record *shapes* `spec.md` calls out (state transitions,
//! commits, queue drops, actuator calls) are emitted consistently rather
//! than each call site inventing its own key names.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::AsyncWriteExt;

/// Logs a state-machine transition (`spec.md` §4.9: "always logged with
/// old->new and a reason string").
pub fn log_transition(session_id: &str, machine: &str, from: &str, to: &str, reason: &str) {
    log::info!(
        target: "babelgate_core::transition",
        "session_id={session_id} machine={machine} from={from} to={to} reason={reason}"
    );
}

/// Logs a batcher auto-commit (`spec.md` §4.6, §6.4).
pub fn log_commit(session_id: &str, participant_id: &str, commit_id: &str, trigger: &str, byte_count: usize) {
    log::info!(
        target: "babelgate_core::commit",
        "session_id={session_id} participant_id={participant_id} commit_id={commit_id} trigger={trigger} byte_count={byte_count}"
    );
}

/// Logs a bounded-queue overflow drop (`spec.md` §6.4).
pub fn log_drop(session_id: &str, bus: &str, handler: &str, policy: &str, count: usize) {
    log::warn!(
        target: "babelgate_core::drop",
        "session_id={session_id} bus={bus} handler={handler} policy={policy} count={count}"
    );
}

/// Logs an actuator invocation from the control plane (`spec.md` §4.9, §6.4).
pub fn log_actuator_call(session_id: &str, operation: &str, reason: &str) {
    log::info!(
        target: "babelgate_core::actuator",
        "session_id={session_id} operation={operation} reason={reason}"
    );
}

/// Best-effort dump of raw inbound/outbound wire frames to a directory,
/// enabled only when a capture directory is configured (`spec.md` §6.4:
/// "may dump raw inbound/outbound frames... when enabled").
///
/// One file per session, newline-delimited, direction-tagged. Write
/// failures are logged and otherwise ignored: capture is a debugging aid,
/// never allowed to affect session behavior.
pub struct WireCapture {
    dir: PathBuf,
    sequence: AtomicU64,
}

impl WireCapture {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            sequence: AtomicU64::new(0),
        }
    }

    /// Appends one captured frame. `direction` is `"in"` or `"out"`.
    pub async fn record(&self, session_id: &str, direction: &str, raw: &str) {
        if let Err(e) = self.try_record(session_id, direction, raw).await {
            log::debug!("[wire-capture] failed to record frame for {session_id}: {e}");
        }
    }

    async fn try_record(&self, session_id: &str, direction: &str, raw: &str) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(format!("{session_id}.ndjson"));
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let line = format!(
            "{{\"seq\":{seq},\"direction\":\"{direction}\",\"frame\":{raw}}}\n",
        );
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }
}
