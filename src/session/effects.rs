use std::time::Duration;

use crate::narration::Cue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NarrationMode {
    /// Cancel current and queued speech, speak now.
    Interrupt,
    /// Wait behind anything already queued.
    Enqueue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NarrationIntent {
    pub cue: Cue,
    pub mode: NarrationMode,
}

impl NarrationIntent {
    pub fn interrupt(cue: Cue) -> Self {
        Self {
            cue,
            mode: NarrationMode::Interrupt,
        }
    }

    pub fn enqueue(cue: Cue) -> Self {
        Self {
            cue,
            mode: NarrationMode::Enqueue,
        }
    }
}

/// Timer-driven follow-ups, handed back to [`SessionMachine::fire`](super::SessionMachine::fire).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deferred {
    StartCue,
    CompletionDue,
    RelaxationIntro,
    RelaxationOffer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed,
    TimedOut,
    Aborted,
}

impl SessionOutcome {
    pub fn cue(self) -> Cue {
        match self {
            SessionOutcome::Completed => Cue::Completed,
            SessionOutcome::TimedOut => Cue::TimedOut,
            SessionOutcome::Aborted => Cue::Stopped,
        }
    }
}

/// Side effects requested by a state transition, executed in order by the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Clear queued speech before a new session.
    ResetNarration,
    /// Start the countdown, the frame pacer and the transport.
    Activate,
    Narrate(NarrationIntent),
    /// A new landmark set is in the snapshot.
    Redraw,
    Schedule {
        after: Duration,
        action: Deferred,
        epoch: u64,
    },
    /// Stop countdown, stop pacer, close transport, cancel narration. In that order.
    Teardown,
    /// The session reached a terminal state; hand the summary to persistence.
    Finished(SessionOutcome),
    OfferRelaxation,
}

impl Effect {
    pub fn narration(&self) -> Option<NarrationIntent> {
        match self {
            Effect::Narrate(intent) => Some(*intent),
            _ => None,
        }
    }
}
