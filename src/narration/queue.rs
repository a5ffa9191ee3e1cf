//! Single-consumer speech queue.
//!
//! At most one utterance is in flight. Interrupting speech cancels it together
//! with everything pending; enqueued speech waits for the engine's completion
//! signal and is drained strictly in submission order.

use std::collections::VecDeque;

use tracing::{debug, warn};

use super::engine::{SpeechDone, SpeechEngine, Utterance};
use super::prefs::{clamp_rate, clamp_volume, VoicePreferences};

pub struct NarrationQueue {
    engine: Option<Box<dyn SpeechEngine>>,
    prefs: VoicePreferences,
    pending: VecDeque<String>,
    speaking: Option<Utterance>,
    next_id: u64,
}

impl NarrationQueue {
    /// `None` engine means speech is unavailable; every operation is then a no-op.
    pub fn new(engine: Option<Box<dyn SpeechEngine>>, prefs: VoicePreferences) -> Self {
        Self {
            engine,
            prefs: prefs.clamped(),
            pending: VecDeque::new(),
            speaking: None,
            next_id: 1,
        }
    }

    pub fn is_available(&self) -> bool {
        self.engine.is_some()
    }

    pub fn preferences(&self) -> VoicePreferences {
        self.prefs
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking.is_some()
    }

    pub fn current(&self) -> Option<&str> {
        self.speaking.as_ref().map(|u| u.text.as_str())
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn accepts(&self, text: &str) -> bool {
        self.prefs.enabled && self.engine.is_some() && !text.is_empty()
    }

    /// `interrupt = true` cancels in-flight and queued speech and speaks now;
    /// otherwise equivalent to [`enqueue`](Self::enqueue).
    pub fn speak(&mut self, text: &str, interrupt: bool) {
        if !interrupt {
            self.enqueue(text);
            return;
        }
        if !self.accepts(text) {
            return;
        }
        self.stop();
        self.begin(text.to_string());
    }

    pub fn enqueue(&mut self, text: &str) {
        if !self.accepts(text) {
            return;
        }
        self.pending.push_back(text.to_string());
        if self.speaking.is_none() {
            self.drain_next();
        }
    }

    /// Engine completion callback. Completions for cancelled utterances are ignored.
    pub fn on_finished(&mut self, done: SpeechDone) {
        match &self.speaking {
            Some(current) if current.id == done.id => {
                self.speaking = None;
                self.drain_next();
            }
            _ => debug!(id = done.id, "ignoring stale speech completion"),
        }
    }

    /// Cancel in-flight speech and drop the queue.
    pub fn stop(&mut self) {
        self.pending.clear();
        if self.speaking.take().is_some() {
            if let Some(engine) = self.engine.as_mut() {
                engine.cancel();
            }
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.prefs.enabled = enabled;
        if !enabled {
            self.stop();
        }
    }

    /// Applies from the next utterance on.
    pub fn set_rate(&mut self, rate: f32) {
        self.prefs.rate = clamp_rate(rate);
    }

    /// Applies from the next utterance on.
    pub fn set_volume(&mut self, volume: f32) {
        self.prefs.volume = clamp_volume(volume);
    }

    fn drain_next(&mut self) {
        while self.speaking.is_none() {
            let Some(text) = self.pending.pop_front() else {
                return;
            };
            self.begin(text);
        }
    }

    fn begin(&mut self, text: String) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        let utterance = Utterance {
            id: self.next_id,
            text,
            rate: self.prefs.rate,
            volume: self.prefs.volume,
        };
        self.next_id += 1;
        match engine.start(&utterance) {
            Ok(()) => self.speaking = Some(utterance),
            Err(e) => {
                warn!(error = %e, "speech engine unavailable, narration disabled");
                self.engine = None;
                self.pending.clear();
            }
        }
    }
}
