pub mod countdown;
pub mod effects;
pub mod machine;
pub mod milestones;
pub mod relaxation;

pub use countdown::{Countdown, Tick};
pub use effects::{Deferred, Effect, NarrationIntent, NarrationMode, SessionOutcome};
pub use machine::{
    Session, SessionError, SessionId, SessionMachine, SessionPlan, SessionReport, SessionStatus,
    SessionTiming,
};
pub use milestones::{Milestone, MilestonePlan};
pub use relaxation::{RelaxationBreak, RelaxationStep};
