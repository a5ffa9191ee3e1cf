use super::countdown::{Countdown, Tick};
use super::effects::NarrationIntent;
use crate::narration::Cue;

/// Guided rest after a completed session.
#[derive(Debug, Clone)]
pub struct RelaxationBreak {
    countdown: Countdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelaxationStep {
    Running {
        remaining: u32,
        cue: Option<NarrationIntent>,
    },
    Finished(NarrationIntent),
}

impl RelaxationBreak {
    /// Returns the break and the cue that opens it.
    pub fn begin(duration_secs: u32, cues: &[u32]) -> (Self, NarrationIntent) {
        let relax = Self {
            countdown: Countdown::new(duration_secs, cues),
        };
        (relax, NarrationIntent::interrupt(Cue::RelaxationStart))
    }

    pub fn remaining(&self) -> u32 {
        self.countdown.remaining()
    }

    pub fn tick(&mut self) -> RelaxationStep {
        match self.countdown.tick() {
            Tick::Running { remaining, cue } => RelaxationStep::Running {
                remaining,
                cue: cue.map(|secs| NarrationIntent::enqueue(Cue::RelaxationRemaining(secs))),
            },
            Tick::Expired => {
                RelaxationStep::Finished(NarrationIntent::interrupt(Cue::RelaxationComplete))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_break() {
        let (mut relax, opening) = RelaxationBreak::begin(180, &[90, 30]);
        assert_eq!(opening.cue, Cue::RelaxationStart);
        let mut cues = Vec::new();
        let finished = loop {
            match relax.tick() {
                RelaxationStep::Running { cue, .. } => cues.extend(cue.map(|c| c.cue)),
                RelaxationStep::Finished(intent) => break intent,
            }
        };
        assert_eq!(
            cues,
            vec![Cue::RelaxationRemaining(90), Cue::RelaxationRemaining(30)]
        );
        assert_eq!(finished.cue, Cue::RelaxationComplete);
        assert_eq!(relax.remaining(), 0);
    }

    #[test]
    fn test_remaining_counts_down() {
        let (mut relax, _) = RelaxationBreak::begin(3, &[]);
        assert_eq!(
            relax.tick(),
            RelaxationStep::Running {
                remaining: 2,
                cue: None
            }
        );
        assert_eq!(relax.remaining(), 2);
    }
}
