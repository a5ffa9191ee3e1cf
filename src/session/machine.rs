//! Pure session state machine.
//!
//! Every input returns the ordered list of [`Effect`]s it caused. Nothing here
//! touches the clock, the network or the speech engine; the orchestrator feeds
//! timestamps in and executes the effects.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info};

use super::countdown::{Countdown, Tick};
use super::effects::{Deferred, Effect, NarrationIntent, SessionOutcome};
use super::milestones::MilestonePlan;
use crate::narration::{match_error, Cue, NarrationMemory, ERROR_COOLDOWN};
use crate::protocol::{AnalysisEvent, Thresholds};

/// Externally issued session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub i64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Active,
    Completed,
    TimedOut,
    Aborted,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::TimedOut | SessionStatus::Aborted
        )
    }
}

impl From<SessionOutcome> for SessionStatus {
    fn from(outcome: SessionOutcome) -> Self {
        match outcome {
            SessionOutcome::Completed => SessionStatus::Completed,
            SessionOutcome::TimedOut => SessionStatus::TimedOut,
            SessionOutcome::Aborted => SessionStatus::Aborted,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("a session is already active")]
    AlreadyActive,
    #[error("no session is active")]
    NotActive,
    #[error("session has not finished yet")]
    NotTerminal,
    #[error("invalid session plan: {0}")]
    InvalidPlan(&'static str),
}

/// Everything needed to start a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionPlan {
    pub id: Option<SessionId>,
    pub exercise: String,
    pub target_reps: u32,
    pub duration_secs: u32,
    pub thresholds: Option<Thresholds>,
}

impl SessionPlan {
    fn validate(&self) -> Result<(), SessionError> {
        if self.exercise.is_empty() {
            return Err(SessionError::InvalidPlan("exercise name is empty"));
        }
        if self.target_reps == 0 {
            return Err(SessionError::InvalidPlan("target must be at least one repetition"));
        }
        if self.duration_secs == 0 {
            return Err(SessionError::InvalidPlan("duration must be at least one second"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionTiming {
    /// Delay between reaching the target and tearing the session down.
    pub grace: Duration,
    pub start_cue_delay: Duration,
    /// Remaining-time values that get a spoken cue.
    pub time_cues: Vec<u32>,
    pub error_cooldown: Duration,
    pub relaxation_intro_delay: Duration,
    pub relaxation_offer_delay: Duration,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(2),
            start_cue_delay: Duration::from_secs(1),
            time_cues: vec![60, 30, 10],
            error_cooldown: ERROR_COOLDOWN,
            relaxation_intro_delay: Duration::from_secs(3),
            relaxation_offer_delay: Duration::from_secs(5),
        }
    }
}

/// The live exercise attempt.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Option<SessionId>,
    pub exercise: String,
    pub target_reps: u32,
    pub duration_secs: u32,
    pub remaining_secs: u32,
    pub rep_count: u32,
    pub feedback: Vec<String>,
    /// Last analysis event, replaced wholesale by each new one.
    pub snapshot: Option<AnalysisEvent>,
    pub status: SessionStatus,
    pub started_at: Instant,
    pub ended_at: Option<Instant>,
}

/// Local summary of a finished session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub id: Option<SessionId>,
    pub exercise: String,
    pub outcome: SessionOutcome,
    pub rep_count: u32,
    pub target_reps: u32,
    pub elapsed: Duration,
    pub remaining_secs: u32,
}

pub struct SessionMachine {
    timing: SessionTiming,
    session: Option<Session>,
    countdown: Countdown,
    milestones: MilestonePlan,
    /// Highest repetition value seen; milestones only fire above it.
    high_water: u32,
    completion_pending: bool,
    memory: NarrationMemory,
    epoch: u64,
}

impl SessionMachine {
    pub fn new(timing: SessionTiming) -> Self {
        let memory = NarrationMemory::new(timing.error_cooldown);
        Self {
            timing,
            session: None,
            countdown: Countdown::new(0, &[]),
            milestones: MilestonePlan::for_target(1),
            high_water: 0,
            completion_pending: false,
            memory,
            epoch: 0,
        }
    }

    pub fn timing(&self) -> &SessionTiming {
        &self.timing
    }

    pub fn status(&self) -> SessionStatus {
        self.session
            .as_ref()
            .map_or(SessionStatus::Idle, |s| s.status)
    }

    pub fn is_active(&self) -> bool {
        self.status() == SessionStatus::Active
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Incremented on every start; deferred actions from older sessions are dropped.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// `idle → active`. A finished session still on screen is dismissed implicitly.
    pub fn start(&mut self, plan: SessionPlan, now: Instant) -> Result<Vec<Effect>, SessionError> {
        if self.is_active() {
            return Err(SessionError::AlreadyActive);
        }
        plan.validate()?;

        self.epoch += 1;
        self.countdown = Countdown::new(plan.duration_secs, &self.timing.time_cues);
        self.milestones = MilestonePlan::for_target(plan.target_reps);
        self.high_water = 0;
        self.completion_pending = false;
        self.memory.reset();
        info!(
            exercise = %plan.exercise,
            target = plan.target_reps,
            duration = plan.duration_secs,
            epoch = self.epoch,
            "session started"
        );
        self.session = Some(Session {
            id: plan.id,
            exercise: plan.exercise,
            target_reps: plan.target_reps,
            duration_secs: plan.duration_secs,
            remaining_secs: plan.duration_secs,
            rep_count: 0,
            feedback: Vec::new(),
            snapshot: None,
            status: SessionStatus::Active,
            started_at: now,
            ended_at: None,
        });

        Ok(vec![
            Effect::ResetNarration,
            Effect::Activate,
            Effect::Schedule {
                after: self.timing.start_cue_delay,
                action: Deferred::StartCue,
                epoch: self.epoch,
            },
        ])
    }

    /// `active → active` on each inbound analysis event.
    pub fn on_analysis(&mut self, event: AnalysisEvent, now: Instant) -> Vec<Effect> {
        let Some(session) = self.session.as_mut().filter(|s| s.status == SessionStatus::Active)
        else {
            debug!("analysis event outside an active session ignored");
            return Vec::new();
        };
        let mut effects = Vec::new();

        if event.landmarks.is_some() {
            effects.push(Effect::Redraw);
        }

        if let Some(rep) = event.rep_count {
            session.rep_count = rep;
            if rep > 0 {
                if rep <= session.target_reps && self.memory.take_rep(rep) {
                    effects.push(Effect::Narrate(NarrationIntent::interrupt(Cue::RepNumber(
                        rep,
                    ))));
                }
                if rep > self.high_water {
                    effects.extend(
                        self.milestones
                            .crossed(self.high_water, rep)
                            .map(|m| Effect::Narrate(NarrationIntent::enqueue(m.cue()))),
                    );
                    self.high_water = rep;
                }
            }
        }

        if let Some(latest) = event.latest_feedback() {
            if let Some(hint) = match_error(latest) {
                if self.memory.take_error(latest, now) {
                    effects.push(Effect::Narrate(NarrationIntent::enqueue(Cue::FormHint(hint))));
                }
            }
        }

        if session.rep_count >= session.target_reps && !self.completion_pending {
            self.completion_pending = true;
            debug!(rep = session.rep_count, "target reached, completion pending");
            effects.push(Effect::Schedule {
                after: self.timing.grace,
                action: Deferred::CompletionDue,
                epoch: self.epoch,
            });
        }

        session.feedback = event.feedback.clone().unwrap_or_default();
        session.snapshot = Some(event);
        effects
    }

    /// One second of the session countdown.
    pub fn on_tick(&mut self, now: Instant) -> Vec<Effect> {
        if !self.is_active() {
            return Vec::new();
        }
        match self.countdown.tick() {
            Tick::Running { remaining, cue } => {
                if let Some(session) = self.session.as_mut() {
                    session.remaining_secs = remaining;
                }
                cue.map(|secs| vec![Effect::Narrate(NarrationIntent::enqueue(Cue::TimeRemaining(secs)))])
                    .unwrap_or_default()
            }
            Tick::Expired => {
                let target_met = self.session.as_mut().is_some_and(|s| {
                    s.remaining_secs = 0;
                    s.rep_count >= s.target_reps
                });
                if target_met {
                    self.finish(SessionOutcome::Completed, now)
                } else {
                    self.finish(SessionOutcome::TimedOut, now)
                }
            }
        }
    }

    /// A previously scheduled action came due.
    pub fn fire(&mut self, action: Deferred, epoch: u64, now: Instant) -> Vec<Effect> {
        if epoch != self.epoch {
            debug!(?action, epoch, current = self.epoch, "stale deferred action dropped");
            return Vec::new();
        }
        let status = self.status();
        match action {
            Deferred::StartCue if status == SessionStatus::Active => {
                vec![Effect::Narrate(NarrationIntent::interrupt(Cue::SessionStart))]
            }
            Deferred::CompletionDue if status == SessionStatus::Active => {
                let target_met = self
                    .session
                    .as_ref()
                    .is_some_and(|s| s.rep_count >= s.target_reps);
                if target_met {
                    self.finish(SessionOutcome::Completed, now)
                } else {
                    // counter was reset during the grace period
                    self.completion_pending = false;
                    Vec::new()
                }
            }
            Deferred::RelaxationIntro if status == SessionStatus::Completed => {
                vec![Effect::Narrate(NarrationIntent::interrupt(Cue::RelaxationIntro))]
            }
            Deferred::RelaxationOffer if status == SessionStatus::Completed => {
                vec![Effect::OfferRelaxation]
            }
            _ => Vec::new(),
        }
    }

    /// The service confirmed its repetition counter is zero again.
    pub fn on_counter_reset(&mut self) -> Vec<Effect> {
        let Some(session) = self.session.as_mut().filter(|s| s.status == SessionStatus::Active)
        else {
            return Vec::new();
        };
        session.rep_count = 0;
        self.memory.forget_rep();
        info!("repetition counter reset");
        Vec::new()
    }

    /// Manual stop. Meeting the target already counts as completion.
    pub fn stop(&mut self, now: Instant) -> Result<Vec<Effect>, SessionError> {
        let session = self
            .session
            .as_ref()
            .filter(|s| s.status == SessionStatus::Active)
            .ok_or(SessionError::NotActive)?;
        let outcome = if session.rep_count >= session.target_reps {
            SessionOutcome::Completed
        } else {
            SessionOutcome::Aborted
        };
        Ok(self.finish(outcome, now))
    }

    /// Any terminal state → idle.
    pub fn dismiss(&mut self) -> Result<(), SessionError> {
        match self.status() {
            SessionStatus::Active => Err(SessionError::NotTerminal),
            _ => {
                self.session = None;
                Ok(())
            }
        }
    }

    pub fn report(&self) -> Option<SessionReport> {
        let session = self.session.as_ref()?;
        let outcome = match session.status {
            SessionStatus::Completed => SessionOutcome::Completed,
            SessionStatus::TimedOut => SessionOutcome::TimedOut,
            SessionStatus::Aborted => SessionOutcome::Aborted,
            SessionStatus::Idle | SessionStatus::Active => return None,
        };
        let ended = session.ended_at.unwrap_or(session.started_at);
        Some(SessionReport {
            id: session.id,
            exercise: session.exercise.clone(),
            outcome,
            rep_count: session.rep_count,
            target_reps: session.target_reps,
            elapsed: ended.saturating_duration_since(session.started_at),
            remaining_secs: session.remaining_secs,
        })
    }

    fn finish(&mut self, outcome: SessionOutcome, now: Instant) -> Vec<Effect> {
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };
        session.status = outcome.into();
        session.ended_at = Some(now);
        self.completion_pending = false;
        info!(
            ?outcome,
            reps = session.rep_count,
            target = session.target_reps,
            remaining = session.remaining_secs,
            "session finished"
        );

        let mut effects = vec![
            Effect::Teardown,
            Effect::Finished(outcome),
            Effect::Narrate(NarrationIntent::interrupt(outcome.cue())),
        ];
        if outcome == SessionOutcome::Completed {
            effects.push(Effect::Schedule {
                after: self.timing.relaxation_intro_delay,
                action: Deferred::RelaxationIntro,
                epoch: self.epoch,
            });
            effects.push(Effect::Schedule {
                after: self.timing.relaxation_offer_delay,
                action: Deferred::RelaxationOffer,
                epoch: self.epoch,
            });
        }
        effects
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::narration::phrases::hints;
    use crate::session::effects::NarrationMode;
    use proptest::prelude::*;

    fn plan(target: u32, duration: u32) -> SessionPlan {
        SessionPlan {
            id: Some(SessionId(7)),
            exercise: "squat".into(),
            target_reps: target,
            duration_secs: duration,
            thresholds: None,
        }
    }

    fn started(target: u32, duration: u32) -> (SessionMachine, Instant) {
        let mut m = SessionMachine::new(SessionTiming::default());
        let now = Instant::now();
        m.start(plan(target, duration), now).unwrap();
        (m, now)
    }

    fn reps(rep: u32) -> AnalysisEvent {
        AnalysisEvent {
            pose_detected: true,
            rep_count: Some(rep),
            ..AnalysisEvent::default()
        }
    }

    fn feedback(text: &str) -> AnalysisEvent {
        AnalysisEvent {
            pose_detected: true,
            feedback: Some(vec![text.to_string()]),
            ..AnalysisEvent::default()
        }
    }

    fn cues(effects: &[Effect]) -> Vec<Cue> {
        effects.iter().filter_map(|e| e.narration()).map(|n| n.cue).collect()
    }

    fn milestone_cues(effects: &[Effect]) -> Vec<Cue> {
        cues(effects)
            .into_iter()
            .filter(|c| {
                matches!(
                    c,
                    Cue::Quarter | Cue::Halfway | Cue::AlmostDone | Cue::LastRep
                )
            })
            .collect()
    }

    #[test]
    fn test_start_effects() {
        let mut m = SessionMachine::new(SessionTiming::default());
        let effects = m.start(plan(10, 180), Instant::now()).unwrap();
        assert_eq!(
            effects,
            vec![
                Effect::ResetNarration,
                Effect::Activate,
                Effect::Schedule {
                    after: Duration::from_secs(1),
                    action: Deferred::StartCue,
                    epoch: 1,
                },
            ]
        );
        assert!(m.is_active());
        assert_eq!(m.session().unwrap().remaining_secs, 180);
    }

    #[test]
    fn test_start_while_active_rejected() {
        let (mut m, now) = started(10, 180);
        assert_eq!(m.start(plan(5, 60), now), Err(SessionError::AlreadyActive));
        assert_eq!(m.session().unwrap().target_reps, 10);
    }

    #[test]
    fn test_invalid_plan_rejected() {
        let mut m = SessionMachine::new(SessionTiming::default());
        let now = Instant::now();
        assert!(matches!(m.start(plan(0, 60), now), Err(SessionError::InvalidPlan(_))));
        assert!(matches!(m.start(plan(5, 0), now), Err(SessionError::InvalidPlan(_))));
        assert_eq!(m.status(), SessionStatus::Idle);
    }

    #[test]
    fn test_start_cue_fires_after_delay() {
        let (mut m, now) = started(10, 180);
        let effects = m.fire(Deferred::StartCue, m.epoch(), now);
        assert_eq!(
            effects,
            vec![Effect::Narrate(NarrationIntent::interrupt(Cue::SessionStart))]
        );
    }

    #[test]
    fn test_normal_completion_cues() {
        let (mut m, now) = started(10, 180);
        let mut fired = Vec::new();
        let mut scheduled = Vec::new();
        for rep in 1..=10 {
            let effects = m.on_analysis(reps(rep), now);
            for cue in milestone_cues(&effects) {
                fired.push((rep, cue));
            }
            scheduled.extend(effects.into_iter().filter(|e| matches!(e, Effect::Schedule { .. })));
        }
        assert_eq!(
            fired,
            vec![
                (2, Cue::Quarter),
                (5, Cue::Halfway),
                (7, Cue::AlmostDone),
                (9, Cue::LastRep),
            ]
        );
        assert_eq!(
            scheduled,
            vec![Effect::Schedule {
                after: Duration::from_secs(2),
                action: Deferred::CompletionDue,
                epoch: 1,
            }]
        );
        // still active during the grace period
        assert!(m.is_active());

        let effects = m.fire(Deferred::CompletionDue, 1, now);
        assert_eq!(effects[0], Effect::Teardown);
        assert_eq!(effects[1], Effect::Finished(SessionOutcome::Completed));
        assert_eq!(cues(&effects), vec![Cue::Completed]);
        assert!(!cues(&effects).contains(&Cue::TimedOut));
        assert_eq!(m.status(), SessionStatus::Completed);
    }

    #[test]
    fn test_rep_number_interrupts_then_milestone_queues() {
        let (mut m, now) = started(10, 180);
        m.on_analysis(reps(1), now);
        let effects = m.on_analysis(reps(2), now);
        let narrations: Vec<NarrationIntent> =
            effects.iter().filter_map(|e| e.narration()).collect();
        assert_eq!(
            narrations,
            vec![
                NarrationIntent::interrupt(Cue::RepNumber(2)),
                NarrationIntent::enqueue(Cue::Quarter),
            ]
        );
    }

    #[test]
    fn test_duplicate_event_is_idempotent() {
        let (mut m, now) = started(10, 180);
        let first = m.on_analysis(reps(5), now);
        let second = m.on_analysis(reps(5), now);
        assert!(!cues(&first).is_empty());
        assert!(cues(&second).is_empty());
    }

    #[test]
    fn test_rep_above_target_not_spoken() {
        let (mut m, now) = started(3, 180);
        m.on_analysis(reps(3), now);
        let effects = m.on_analysis(reps(4), now);
        assert!(!cues(&effects).contains(&Cue::RepNumber(4)));
    }

    #[test]
    fn test_target_one_boundary() {
        let (mut m, now) = started(1, 60);
        let effects = m.on_analysis(reps(1), now);
        assert_eq!(milestone_cues(&effects), vec![Cue::LastRep]);
        assert!(effects.contains(&Effect::Schedule {
            after: Duration::from_secs(2),
            action: Deferred::CompletionDue,
            epoch: 1,
        }));
        let effects = m.on_analysis(reps(1), now);
        assert!(milestone_cues(&effects).is_empty());
        m.fire(Deferred::CompletionDue, 1, now);
        assert_eq!(m.status(), SessionStatus::Completed);
    }

    #[test]
    fn test_small_target_collision_fires_both() {
        let (mut m, now) = started(4, 60);
        m.on_analysis(reps(1), now);
        m.on_analysis(reps(2), now);
        let effects = m.on_analysis(reps(3), now);
        assert_eq!(milestone_cues(&effects), vec![Cue::AlmostDone, Cue::LastRep]);
    }

    #[test]
    fn test_timeout_scenario() {
        let (mut m, now) = started(10, 5);
        m.on_analysis(reps(3), now);
        let mut all = Vec::new();
        for _ in 0..4 {
            all.extend(m.on_tick(now));
        }
        assert!(cues(&all).is_empty());
        assert!(m.is_active());
        assert_eq!(m.session().unwrap().remaining_secs, 1);

        let effects = m.on_tick(now);
        assert_eq!(effects[0], Effect::Teardown);
        assert_eq!(effects[1], Effect::Finished(SessionOutcome::TimedOut));
        assert_eq!(cues(&effects), vec![Cue::TimedOut]);
        assert!(!effects.iter().any(|e| matches!(e, Effect::Schedule { .. })));
        assert_eq!(m.status(), SessionStatus::TimedOut);
        assert_eq!(m.session().unwrap().remaining_secs, 0);
    }

    #[test]
    fn test_time_cues_enqueued() {
        let (mut m, now) = started(10, 61);
        let mut all = Vec::new();
        for _ in 0..60 {
            all.extend(m.on_tick(now));
        }
        assert_eq!(
            cues(&all),
            vec![
                Cue::TimeRemaining(60),
                Cue::TimeRemaining(30),
                Cue::TimeRemaining(10)
            ]
        );
        assert!(all
            .iter()
            .filter_map(|e| e.narration())
            .all(|n| n.mode == NarrationMode::Enqueue));
    }

    #[test]
    fn test_expiry_with_target_met_completes() {
        let (mut m, now) = started(2, 2);
        m.on_analysis(reps(2), now);
        m.on_tick(now);
        let effects = m.on_tick(now);
        assert_eq!(effects[1], Effect::Finished(SessionOutcome::Completed));
        // the pending grace timer is now a no-op
        assert!(m.fire(Deferred::CompletionDue, 1, now).is_empty());
    }

    #[test]
    fn test_manual_stop_below_target_aborts() {
        let (mut m, now) = started(10, 180);
        m.on_analysis(reps(4), now);
        let effects = m.stop(now).unwrap();
        assert_eq!(effects[1], Effect::Finished(SessionOutcome::Aborted));
        assert_eq!(cues(&effects), vec![Cue::Stopped]);
        let report = m.report().unwrap();
        assert_eq!(report.rep_count, 4);
        assert_eq!(report.outcome, SessionOutcome::Aborted);
    }

    #[test]
    fn test_manual_stop_at_target_completes_with_offer() {
        let (mut m, now) = started(3, 180);
        m.on_analysis(reps(3), now);
        let effects = m.stop(now).unwrap();
        assert_eq!(effects[1], Effect::Finished(SessionOutcome::Completed));
        let later: Vec<Deferred> = effects
            .iter()
            .filter_map(|e| match e {
                Effect::Schedule { action, .. } => Some(*action),
                _ => None,
            })
            .collect();
        assert_eq!(later, vec![Deferred::RelaxationIntro, Deferred::RelaxationOffer]);
        assert_eq!(m.fire(Deferred::RelaxationOffer, 1, now), vec![Effect::OfferRelaxation]);
    }

    #[test]
    fn test_stop_when_idle_is_error() {
        let mut m = SessionMachine::new(SessionTiming::default());
        assert_eq!(m.stop(Instant::now()), Err(SessionError::NotActive));
    }

    #[test]
    fn test_late_events_after_stop_ignored() {
        let (mut m, now) = started(10, 180);
        m.on_analysis(reps(2), now);
        m.stop(now).unwrap();
        assert!(m.on_analysis(reps(3), now).is_empty());
        assert!(m.on_tick(now).is_empty());
        assert!(m.fire(Deferred::StartCue, 1, now).is_empty());
        assert_eq!(m.session().unwrap().rep_count, 2);
    }

    #[test]
    fn test_stale_epoch_dropped() {
        let (mut m, now) = started(3, 180);
        m.on_analysis(reps(3), now);
        m.stop(now).unwrap();
        m.dismiss().unwrap();
        m.start(plan(3, 180), now).unwrap();
        assert!(m.fire(Deferred::StartCue, 1, now).is_empty());
        assert!(m.fire(Deferred::RelaxationOffer, 1, now).is_empty());
        assert!(!m.fire(Deferred::StartCue, 2, now).is_empty());
    }

    #[test]
    fn test_dismiss_rules() {
        let (mut m, now) = started(10, 180);
        assert_eq!(m.dismiss(), Err(SessionError::NotTerminal));
        m.stop(now).unwrap();
        m.dismiss().unwrap();
        assert_eq!(m.status(), SessionStatus::Idle);
        assert!(m.report().is_none());
    }

    #[test]
    fn test_start_from_terminal_replaces_session() {
        let (mut m, now) = started(10, 180);
        m.on_analysis(reps(6), now);
        m.stop(now).unwrap();
        m.start(plan(5, 60), now).unwrap();
        let s = m.session().unwrap();
        assert_eq!(s.rep_count, 0);
        assert_eq!(s.target_reps, 5);
        // dedup memory and milestones were reset; target 5 puts the quarter at rep 1
        assert_eq!(
            cues(&m.on_analysis(reps(1), now)),
            vec![Cue::RepNumber(1), Cue::Quarter]
        );
    }

    #[test]
    fn test_duplicate_error_suppression_scenario() {
        let (mut m, t0) = started(10, 180);
        let text = "Chưa xuống đủ sâu";
        let hint = Cue::FormHint(hints::BEND_DEEPER);

        assert_eq!(cues(&m.on_analysis(feedback(text), t0)), vec![hint]);
        assert!(cues(&m.on_analysis(feedback(text), t0 + Duration::from_secs(1))).is_empty());
        assert_eq!(
            cues(&m.on_analysis(feedback(text), t0 + Duration::from_secs(4))),
            vec![hint]
        );
    }

    #[test]
    fn test_different_error_announced_immediately() {
        let (mut m, t0) = started(10, 180);
        m.on_analysis(feedback("Chưa xuống đủ sâu"), t0);
        let effects = m.on_analysis(feedback("Đừng cong lưng"), t0 + Duration::from_secs(1));
        assert_eq!(cues(&effects), vec![Cue::FormHint(hints::STAND_STRAIGHT)]);
    }

    #[test]
    fn test_only_last_feedback_line_matters() {
        let (mut m, now) = started(10, 180);
        let event = AnalysisEvent {
            pose_detected: true,
            feedback: Some(vec!["Chưa xuống đủ sâu".into(), "Tốt".into()]),
            ..AnalysisEvent::default()
        };
        assert!(cues(&m.on_analysis(event, now)).is_empty());
        assert_eq!(m.session().unwrap().feedback.len(), 2);
    }

    #[test]
    fn test_snapshot_replaced_and_redraw_on_landmarks() {
        let (mut m, now) = started(10, 180);
        let with_pose = AnalysisEvent {
            pose_detected: true,
            landmarks: Some(vec![crate::pose::Landmark::new(0.5, 0.5, 0.9)]),
            angles: Some([("knee".to_string(), 90.0)].into_iter().collect()),
            ..AnalysisEvent::default()
        };
        assert!(m.on_analysis(with_pose, now).contains(&Effect::Redraw));
        let without = AnalysisEvent::default();
        assert!(!m.on_analysis(without, now).contains(&Effect::Redraw));
        let snapshot = m.session().unwrap().snapshot.as_ref().unwrap();
        assert!(snapshot.angles.is_none());
        assert!(snapshot.landmarks.is_none());
    }

    #[test]
    fn test_counter_reset_keeps_milestones_once() {
        let (mut m, now) = started(10, 180);
        for rep in 1..=5 {
            m.on_analysis(reps(rep), now);
        }
        m.on_counter_reset();
        assert_eq!(m.session().unwrap().rep_count, 0);
        let mut all = Vec::new();
        for rep in 1..=6 {
            all.extend(m.on_analysis(reps(rep), now));
        }
        assert!(cues(&all).contains(&Cue::RepNumber(1)));
        assert_eq!(milestone_cues(&all), Vec::<Cue>::new());
    }

    #[test]
    fn test_counter_reset_during_grace_cancels_completion() {
        let (mut m, now) = started(2, 180);
        m.on_analysis(reps(2), now);
        m.on_counter_reset();
        assert!(m.fire(Deferred::CompletionDue, 1, now).is_empty());
        assert!(m.is_active());
        let effects = m.on_analysis(reps(2), now);
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::Schedule { action: Deferred::CompletionDue, .. })));
    }

    proptest! {
        #[test]
        fn prop_milestones_at_most_once(
            target in 1u32..40,
            steps in proptest::collection::vec(0u32..4, 1..80),
        ) {
            let (mut m, now) = started(target, 600);
            let mut rep = 0;
            let mut fired = Vec::new();
            for step in steps {
                rep += step;
                let effects = m.on_analysis(reps(rep), now);
                fired.extend(milestone_cues(&effects));
                // repeat delivery must not add anything
                let again = m.on_analysis(reps(rep), now);
                prop_assert!(milestone_cues(&again).is_empty());
            }
            for cue in [Cue::Quarter, Cue::Halfway, Cue::AlmostDone, Cue::LastRep] {
                prop_assert!(fired.iter().filter(|c| **c == cue).count() <= 1);
            }
        }

        #[test]
        fn prop_remaining_never_increases(target in 1u32..20, duration in 1u32..120, ticks in 0usize..200) {
            let (mut m, now) = started(target, duration);
            let mut last = duration;
            for _ in 0..ticks {
                m.on_tick(now);
                let remaining = m.session().unwrap().remaining_secs;
                prop_assert!(remaining <= last);
                last = remaining;
            }
        }
    }
}
