//! Input (voice activity) state machine (`spec.md` §4.9).

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InputStatus {
    Silent,
    Speaking,
}

#[derive(Debug, Clone)]
pub struct InputState {
    pub status: InputStatus,
    pub voice_onset_ms: Option<u64>,
    pub voice_last_ms: u64,
    voice_hysteresis_ms: u64,
    silence_threshold_ms: u64,
}

impl InputState {
    #[must_use]
    pub fn new(voice_hysteresis_ms: u64, silence_threshold_ms: u64) -> Self {
        Self {
            status: InputStatus::Silent,
            voice_onset_ms: None,
            voice_last_ms: 0,
            voice_hysteresis_ms,
            silence_threshold_ms,
        }
    }

    /// A batcher commit arrived with the given silence flag at `now_ms`.
    /// Returns `true` if this call promoted SILENT → SPEAKING.
    pub fn on_commit(&mut self, is_silence: bool, now_ms: u64) -> bool {
        if is_silence {
            if self.status == InputStatus::Speaking
                && now_ms.saturating_sub(self.voice_last_ms) > self.silence_threshold_ms
            {
                self.status = InputStatus::Silent;
                self.voice_onset_ms = None;
            }
            false
        } else {
            self.voice_last_ms = now_ms;
            match self.status {
                InputStatus::Speaking => false,
                InputStatus::Silent => {
                    let onset = *self.voice_onset_ms.get_or_insert(now_ms);
                    if now_ms.saturating_sub(onset) >= self.voice_hysteresis_ms {
                        self.status = InputStatus::Speaking;
                        true
                    } else {
                        false
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_non_silent_commit_below_hysteresis_stays_silent() {
        let mut state = InputState::new(100, 350);
        let promoted = state.on_commit(false, 0);
        assert!(!promoted);
        assert_eq!(state.status, InputStatus::Silent);
    }

    #[test]
    fn sustained_voice_past_hysteresis_promotes_to_speaking() {
        let mut state = InputState::new(100, 350);
        state.on_commit(false, 0);
        let promoted = state.on_commit(false, 150);
        assert!(promoted);
        assert_eq!(state.status, InputStatus::Speaking);
    }

    #[test]
    fn gap_in_voice_resets_onset() {
        let mut state = InputState::new(100, 350);
        state.on_commit(false, 0);
        // Silence before hysteresis window elapses.
        state.on_commit(true, 50);
        assert_eq!(state.status, InputStatus::Silent);
        // New onset starts at 200, so 100ms later (t=300) should promote.
        state.on_commit(false, 200);
        assert!(!state.on_commit(false, 250));
        assert!(state.on_commit(false, 310));
    }

    #[test]
    fn silence_under_threshold_stays_speaking() {
        let mut state = InputState::new(100, 350);
        state.on_commit(false, 0);
        state.on_commit(false, 150);
        assert_eq!(state.status, InputStatus::Speaking);
        state.on_commit(true, 300);
        assert_eq!(state.status, InputStatus::Speaking);
    }

    #[test]
    fn silence_past_threshold_demotes_to_silent() {
        let mut state = InputState::new(100, 350);
        state.on_commit(false, 0);
        state.on_commit(false, 150);
        state.on_commit(true, 600);
        assert_eq!(state.status, InputStatus::Silent);
        assert!(state.voice_onset_ms.is_none());
    }
}
