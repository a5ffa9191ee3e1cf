use std::time::Duration;

use tokio::time::Instant;

pub const ERROR_COOLDOWN: Duration = Duration::from_secs(3);

/// Per-session de-duplication memory for spoken repetition numbers and form errors.
#[derive(Debug, Clone)]
pub struct NarrationMemory {
    cooldown: Duration,
    last_rep: u32,
    last_error: Option<(String, Instant)>,
}

impl NarrationMemory {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_rep: 0,
            last_error: None,
        }
    }

    pub fn reset(&mut self) {
        self.last_rep = 0;
        self.last_error = None;
    }

    pub fn last_rep(&self) -> u32 {
        self.last_rep
    }

    /// True (and remembered) when `rep` differs from the last spoken number.
    pub fn take_rep(&mut self, rep: u32) -> bool {
        if rep == self.last_rep {
            return false;
        }
        self.last_rep = rep;
        true
    }

    /// Forget the spoken number so counting restarts after a counter reset.
    pub fn forget_rep(&mut self) {
        self.last_rep = 0;
    }

    /// True (and remembered) when `text` differs from the previous announcement
    /// or the cooldown has elapsed since it.
    pub fn take_error(&mut self, text: &str, now: Instant) -> bool {
        let allowed = match &self.last_error {
            None => true,
            Some((last, at)) => last != text || now.saturating_duration_since(*at) >= self.cooldown,
        };
        if allowed {
            self.last_error = Some((text.to_string(), now));
        }
        allowed
    }
}

impl Default for NarrationMemory {
    fn default() -> Self {
        Self::new(ERROR_COOLDOWN)
    }
}
