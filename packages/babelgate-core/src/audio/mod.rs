//! Audio batching and PCM utilities (`spec.md` §4.6, §4.10).

pub mod batcher;
pub mod format;

pub use batcher::{AudioBatcher, AudioCommit, BatchingConfig, CommitMetadata, Trigger};
pub use format::{pcm16_samples, pcm16_to_bytes, resample_linear};
