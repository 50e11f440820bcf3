//! Per-participant audio buffering and auto-commit (`spec.md` §4.6).
//!
//! The largest subscriber on `acs_inbound`. Accumulates PCM16 bytes per
//! `(session, participant)` pair and emits exactly one commit onto
//! `provider_outbound` whenever the size, duration, or idle trigger fires,
//! breaking ties in the order size > duration > idle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use base64::Engine as _;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

use super::format::{duration_ms, is_silence, pcm16_samples, rms_energy};
use crate::bus::EventBus;
use crate::clock::Clock;
use crate::observability::log_commit;
use crate::runtime::TaskSpawner;

/// Which trigger caused a commit to be emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Size,
    Duration,
    Idle,
}

fn trigger_name(trigger: Trigger) -> &'static str {
    match trigger {
        Trigger::Size => "size",
        Trigger::Duration => "duration",
        Trigger::Idle => "idle",
    }
}

/// Metadata attached to every commit (`spec.md` §4.6).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitMetadata {
    pub first_frame_ts_ms: u64,
    pub last_frame_ts_ms: u64,
    pub duration_ms: u64,
    pub byte_count: usize,
    pub trigger: Trigger,
    pub rms_energy: f64,
    pub is_silence: bool,
}

/// A batched PCM payload published to `provider_outbound`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioCommit {
    pub commit_id: Uuid,
    pub session_id: String,
    pub participant_id: String,
    pub audio_base64: String,
    pub metadata: CommitMetadata,
}

/// Configuration for the batcher's triggers (`spec.md` §4.11 `batching`).
#[derive(Debug, Clone, Copy, serde::Deserialize)]
#[serde(default)]
pub struct BatchingConfig {
    pub enabled: bool,
    pub max_batch_bytes: usize,
    pub max_batch_ms: u64,
    pub idle_timeout_ms: u64,
    pub sample_rate_hz: u32,
    pub channels: u16,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_batch_bytes: 65_536,
            max_batch_ms: 200,
            idle_timeout_ms: 500,
            sample_rate_hz: 16_000,
            channels: 1,
        }
    }
}

#[derive(Default)]
struct ParticipantBuffer {
    pcm_bytes: Vec<u8>,
    first_append_timestamp_ms: Option<u64>,
    last_append_timestamp_ms: u64,
    /// Bumped on every append; used to invalidate stale idle-check tasks
    /// without needing to cancel them explicitly.
    generation: u64,
}

impl ParticipantBuffer {
    fn accumulated_byte_count(&self) -> usize {
        self.pcm_bytes.len()
    }

    fn clear(&mut self) {
        self.pcm_bytes.clear();
        self.first_append_timestamp_ms = None;
        self.generation += 1;
    }
}

/// Per-(session, participant) PCM accumulator with size/duration/idle
/// auto-commit onto a `provider_outbound`-shaped bus.
pub struct AudioBatcher {
    config: BatchingConfig,
    clock: Arc<dyn Clock>,
    buffers: DashMap<(String, String), Mutex<ParticipantBuffer>>,
    flush_drops: AtomicU64,
    decode_failures: AtomicU64,
}

impl AudioBatcher {
    #[must_use]
    pub fn new(config: BatchingConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            buffers: DashMap::new(),
            flush_drops: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
        }
    }

    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }

    pub fn flush_drops(&self) -> u64 {
        self.flush_drops.load(Ordering::Relaxed)
    }

    /// Appends base64-encoded PCM16 audio for `participant_id`, committing
    /// onto `provider_outbound` if a trigger fires. Spawns a per-participant
    /// idle-check task via `spawner` so a pause longer than the idle timeout
    /// auto-commits even with no further appends. Takes `self` as an `Arc`
    /// so the idle-check task can outlive this call.
    pub fn append(
        self: &Arc<Self>,
        session_id: &str,
        participant_id: &str,
        audio_base64: &str,
        spawner: &dyn TaskSpawner,
        provider_outbound: &Arc<EventBus<AudioCommit>>,
    ) {
        if !self.config.enabled {
            return;
        }
        let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(audio_base64) else {
            self.decode_failures.fetch_add(1, Ordering::Relaxed);
            log::warn!(
                "[batcher] session={session_id} participant={participant_id}: base64 decode failed, dropping frame"
            );
            return;
        };

        let key = (session_id.to_string(), participant_id.to_string());
        let entry = self
            .buffers
            .entry(key)
            .or_insert_with(|| Mutex::new(ParticipantBuffer::default()));

        let now = self.clock.now_ms();
        let (commit, generation) = {
            let mut buf = entry.lock();
            if buf.pcm_bytes.is_empty() {
                buf.first_append_timestamp_ms = Some(now);
            }
            buf.pcm_bytes.extend_from_slice(&bytes);
            buf.last_append_timestamp_ms = now;
            buf.generation += 1;

            let commit = self.maybe_commit(&mut buf, session_id, participant_id, now);
            (commit, buf.generation)
        };

        if let Some(commit) = commit {
            provider_outbound.publish(commit);
        } else {
            self.arm_idle_check(
                generation,
                session_id.to_string(),
                participant_id.to_string(),
                spawner,
                provider_outbound.clone(),
            );
        }
    }

    fn arm_idle_check(
        self: &Arc<Self>,
        generation: u64,
        session_id: String,
        participant_id: String,
        spawner: &dyn TaskSpawner,
        provider_outbound: Arc<EventBus<AudioCommit>>,
    ) {
        let idle_timeout_ms = self.config.idle_timeout_ms;
        let this = self.clone();
        spawner.spawn(Box::pin(async move {
            tokio::time::sleep(std::time::Duration::from_millis(idle_timeout_ms)).await;
            this.check_idle_commit(&session_id, &participant_id, generation, &provider_outbound);
        }));
    }

    fn check_idle_commit(
        &self,
        session_id: &str,
        participant_id: &str,
        generation: u64,
        provider_outbound: &Arc<EventBus<AudioCommit>>,
    ) {
        let key = (session_id.to_string(), participant_id.to_string());
        let Some(entry) = self.buffers.get(&key) else {
            return;
        };
        let now = self.clock.now_ms();
        let commit = {
            let mut buf = entry.lock();
            if buf.generation != generation || buf.pcm_bytes.is_empty() {
                return;
            }
            if now.saturating_sub(buf.last_append_timestamp_ms) < self.config.idle_timeout_ms {
                return;
            }
            self.build_commit(&mut buf, session_id, participant_id, Trigger::Idle)
        };
        provider_outbound.publish(commit);
    }

    fn maybe_commit(
        &self,
        buf: &mut ParticipantBuffer,
        session_id: &str,
        participant_id: &str,
        now: u64,
    ) -> Option<AudioCommit> {
        let accumulated_bytes = buf.accumulated_byte_count();
        let accumulated_duration = duration_ms(
            accumulated_bytes,
            self.config.sample_rate_hz,
            self.config.channels,
        );

        let trigger = if accumulated_bytes >= self.config.max_batch_bytes {
            Some(Trigger::Size)
        } else if accumulated_duration >= self.config.max_batch_ms {
            Some(Trigger::Duration)
        } else if now.saturating_sub(buf.last_append_timestamp_ms) >= self.config.idle_timeout_ms
        {
            Some(Trigger::Idle)
        } else {
            None
        };

        trigger.map(|t| self.build_commit(buf, session_id, participant_id, t))
    }

    fn build_commit(
        &self,
        buf: &mut ParticipantBuffer,
        session_id: &str,
        participant_id: &str,
        trigger: Trigger,
    ) -> AudioCommit {
        let samples = pcm16_samples(&buf.pcm_bytes);
        let energy = rms_energy(&samples);
        let metadata = CommitMetadata {
            first_frame_ts_ms: buf.first_append_timestamp_ms.unwrap_or(buf.last_append_timestamp_ms),
            last_frame_ts_ms: buf.last_append_timestamp_ms,
            duration_ms: duration_ms(
                buf.pcm_bytes.len(),
                self.config.sample_rate_hz,
                self.config.channels,
            ),
            byte_count: buf.pcm_bytes.len(),
            trigger,
            rms_energy: energy,
            is_silence: is_silence(&samples),
        };
        let audio_base64 = base64::engine::general_purpose::STANDARD.encode(&buf.pcm_bytes);
        let commit_id = Uuid::new_v4();
        let byte_count = metadata.byte_count;
        buf.clear();
        log_commit(session_id, participant_id, &commit_id.to_string(), trigger_name(metadata.trigger), byte_count);
        AudioCommit {
            commit_id,
            session_id: session_id.to_string(),
            participant_id: participant_id.to_string(),
            audio_base64,
            metadata,
        }
    }

    /// Actuator operation: discard `participant_id`'s buffer (or every
    /// buffer, if `None`) with no commit (`spec.md` §4.5 `flush_inbound_buffers`).
    pub fn flush(&self, session_id: &str, participant_id: Option<&str>) {
        match participant_id {
            Some(pid) => {
                let key = (session_id.to_string(), pid.to_string());
                if let Some(entry) = self.buffers.get(&key) {
                    let mut buf = entry.lock();
                    if !buf.pcm_bytes.is_empty() {
                        self.flush_drops.fetch_add(1, Ordering::Relaxed);
                    }
                    buf.clear();
                }
            }
            None => {
                for entry in self.buffers.iter() {
                    if entry.key().0 == session_id {
                        let mut buf = entry.value().lock();
                        if !buf.pcm_bytes.is_empty() {
                            self.flush_drops.fetch_add(1, Ordering::Relaxed);
                        }
                        buf.clear();
                    }
                }
            }
        }
    }

    /// Removes all buffers belonging to `session_id` (called on session cleanup).
    pub fn remove_session(&self, session_id: &str) {
        self.buffers.retain(|k, _| k.0 != session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::OverflowPolicy;
    use crate::clock::FakeClock;
    use crate::runtime::TokioSpawner;
    use std::sync::Arc;

    fn small_config() -> BatchingConfig {
        BatchingConfig {
            enabled: true,
            max_batch_bytes: 64,
            max_batch_ms: 200,
            idle_timeout_ms: 500,
            sample_rate_hz: 16_000,
            channels: 1,
        }
    }

    fn encode_silence(byte_len: usize) -> String {
        base64::engine::general_purpose::STANDARD.encode(vec![0u8; byte_len])
    }

    #[tokio::test]
    async fn size_trigger_fires_before_duration() {
        let clock = Arc::new(FakeClock::new());
        let batcher = Arc::new(AudioBatcher::new(small_config(), clock.clone()));
        let bus: Arc<EventBus<AudioCommit>> = Arc::new(EventBus::new("provider_outbound"));
        let spawner = TokioSpawner::current();
        let commits = Arc::new(Mutex::new(Vec::new()));
        let commits2 = commits.clone();
        bus.subscribe(
            "collector",
            16,
            OverflowPolicy::DropOldest,
            1,
            &spawner,
            move |c: AudioCommit| {
                let commits2 = commits2.clone();
                async move {
                    commits2.lock().push(c);
                }
            },
        )
        .unwrap();

        // 64 bytes >= max_batch_bytes triggers size immediately.
        batcher.append("s1", "p1", &encode_silence(64), &spawner, &bus);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let collected = commits.lock();
        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].metadata.trigger, Trigger::Size);
    }

    #[tokio::test]
    async fn idle_timer_commits_after_pause_with_no_further_audio() {
        let clock = Arc::new(FakeClock::new());
        let batcher = Arc::new(AudioBatcher::new(
            BatchingConfig {
                idle_timeout_ms: 30,
                ..small_config()
            },
            clock.clone(),
        ));
        let bus: Arc<EventBus<AudioCommit>> = Arc::new(EventBus::new("provider_outbound"));
        let spawner = TokioSpawner::current();
        let commits = Arc::new(Mutex::new(Vec::new()));
        let commits2 = commits.clone();
        bus.subscribe(
            "collector",
            16,
            OverflowPolicy::DropOldest,
            1,
            &spawner,
            move |c: AudioCommit| {
                let commits2 = commits2.clone();
                async move {
                    commits2.lock().push(c);
                }
            },
        )
        .unwrap();

        // The idle-check task sleeps on the real tokio clock for
        // idle_timeout_ms (30ms here); advancing the fake application clock
        // past the threshold before that real sleep elapses is what lets
        // check_idle_commit observe an idle gap once it wakes.
        batcher.append("s1", "p1", &encode_silence(16), &spawner, &bus);
        clock.advance(1000);
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let collected = commits.lock();
        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].metadata.trigger, Trigger::Idle);
    }

    #[test]
    fn flush_on_empty_buffer_does_not_count_as_a_drop() {
        let clock = Arc::new(FakeClock::new());
        let batcher = AudioBatcher::new(small_config(), clock);
        let key = ("s1".to_string(), "p1".to_string());
        batcher
            .buffers
            .insert(key, Mutex::new(ParticipantBuffer::default()));
        batcher.flush("s1", Some("p1"));
        assert_eq!(batcher.flush_drops.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn flush_on_nonempty_buffer_counts_as_a_drop_and_clears_it() {
        let clock = Arc::new(FakeClock::new());
        let batcher = AudioBatcher::new(small_config(), clock);
        let key = ("s1".to_string(), "p1".to_string());
        let mut buf = ParticipantBuffer::default();
        buf.pcm_bytes = vec![1, 2, 3, 4];
        batcher.buffers.insert(key, Mutex::new(buf));
        batcher.flush("s1", Some("p1"));
        assert_eq!(batcher.flush_drops.load(Ordering::Relaxed), 1);
        let key = ("s1".to_string(), "p1".to_string());
        assert!(batcher.buffers.get(&key).unwrap().lock().pcm_bytes.is_empty());
    }

    #[tokio::test]
    async fn decode_failure_increments_counter_and_drops_frame_only() {
        let clock = Arc::new(FakeClock::new());
        let batcher = Arc::new(AudioBatcher::new(small_config(), clock));
        let bus: Arc<EventBus<AudioCommit>> = Arc::new(EventBus::new("provider_outbound"));
        let spawner = TokioSpawner::current();
        batcher.append("s1", "p1", "not valid base64!!", &spawner, &bus);
        assert_eq!(batcher.decode_failures(), 1);
    }
}
