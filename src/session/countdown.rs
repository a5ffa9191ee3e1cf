/// Whole-second countdown driven by an external 1 Hz tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Countdown {
    remaining: u32,
    cues: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Still running; `cue` is the cue value this second started at, if any.
    Running { remaining: u32, cue: Option<u32> },
    Expired,
}

impl Countdown {
    pub fn new(total_secs: u32, cues: &[u32]) -> Self {
        Self {
            remaining: total_secs,
            cues: cues.to_vec(),
        }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn is_expired(&self) -> bool {
        self.remaining == 0
    }

    /// Decrement by one second. Never increases `remaining`.
    ///
    /// Cues match the value before the decrement, so a cue equal to the
    /// total duration is announced on the first tick.
    pub fn tick(&mut self) -> Tick {
        if self.remaining == 0 {
            return Tick::Expired;
        }
        let before = self.remaining;
        self.remaining -= 1;
        if self.remaining == 0 {
            return Tick::Expired;
        }
        let cue = self.cues.contains(&before).then_some(before);
        Tick::Running {
            remaining: self.remaining,
            cue,
        }
    }
}
