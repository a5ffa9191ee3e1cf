//! Session loop.
//!
//! One task owns every component and interleaves the four time sources with
//! `tokio::select!`: the display-rate tick driving the frame pacer, inbound
//! link events, the 1 Hz countdown and speech completions. Each handler runs to
//! completion before the next event is taken. Timer-driven follow-ups from the
//! session machine live in a `DelayQueue` tagged with the session epoch.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{interval, interval_at, timeout, Instant, Interval, MissedTickBehavior};
use tokio_util::time::DelayQueue;
use tracing::{debug, info, warn};

use crate::backend::{
    builtin_exercises, effective_target, fetch_personalization, ExerciseCatalog, ExerciseInfo,
    PersonalizedParams, ProfileService, SessionStore, SessionSummary,
};
use crate::camera::{CameraProvider, FrameSource};
use crate::config::Config;
use crate::narration::{NarrationQueue, SpeechDone, SpeechEngine, VoicePreferences};
use crate::pacer::FramePacer;
use crate::protocol::ControlMessage;
use crate::render::{DrawStats, OverlayRenderer, OverlayStyle, OverlaySurface};
use crate::session::{
    Deferred, Effect, NarrationIntent, NarrationMode, RelaxationBreak, RelaxationStep,
    SessionMachine, SessionPlan, SessionReport, SessionStatus, SessionTiming,
};
use crate::transport::{Connector, Inbound, LinkEnvelope, TransportClient};

const SECOND: Duration = Duration::from_secs(1);

/// Allotted time for exercises missing from the catalogue.
pub const DEFAULT_DURATION_SECS: u32 = 180;

/// User requests fed into the loop.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start { exercise: String },
    Stop,
    /// Ask the service to zero its repetition counter.
    ResetCounter,
    ToggleVoice,
    AdjustRate(f32),
    SetVolume(f32),
    AcceptRelaxation,
    SkipRelaxation,
    Dismiss,
    Quit,
}

/// What the loop reports back to the user interface.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Exercises(Vec<ExerciseInfo>),
    SessionStarted {
        exercise: String,
        target_reps: u32,
        duration_secs: u32,
        personalized: Option<PersonalizedParams>,
    },
    Rejected(String),
    /// Camera could not be opened; the session did not start.
    CameraUnavailable(String),
    Connection(bool),
    Progress {
        rep_count: u32,
        remaining_secs: u32,
        feedback: Vec<String>,
    },
    Redrawn(DrawStats),
    Finished {
        report: SessionReport,
        summary: Option<SessionSummary>,
    },
    RelaxationOffered,
    Relaxation { remaining_secs: u32 },
    RelaxationFinished,
    Voice(VoicePreferences),
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub timing: SessionTiming,
    pub frame_interval: Duration,
    pub display_period: Duration,
    pub default_target: u32,
    pub relaxation_secs: u32,
    pub relaxation_cues: Vec<u32>,
    pub overlay: OverlayStyle,
    /// Overlay size used until a camera reports its resolution.
    pub surface: (u32, u32),
    /// Voice preferences are saved here on every change.
    pub preferences_path: Option<PathBuf>,
    /// Upper bound on each REST call made from the loop.
    pub backend_timeout: Duration,
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            timing: config.session_timing(),
            frame_interval: config.pacer.frame_interval(),
            display_period: config.pacer.display_period(),
            default_target: config.session.default_target,
            relaxation_secs: config.relaxation.duration_secs,
            relaxation_cues: config.relaxation.cues.clone(),
            overlay: config.overlay.style(),
            surface: (config.camera.width, config.camera.height),
            preferences_path: Some(config.narration.preferences_path.clone()),
            backend_timeout: config.server.request_timeout(),
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// External collaborators, injected so tests can substitute fakes.
pub struct Collaborators {
    pub camera: Box<dyn CameraProvider>,
    pub connector: Box<dyn Connector>,
    pub catalog: Arc<dyn ExerciseCatalog>,
    pub store: Arc<dyn SessionStore>,
    pub profiles: Arc<dyn ProfileService>,
    /// `None` when no speech back-end is available.
    pub speech: Option<Box<dyn SpeechEngine>>,
    pub speech_done: mpsc::UnboundedReceiver<SpeechDone>,
    pub surface: Option<Box<dyn OverlaySurface>>,
}

pub struct Orchestrator {
    settings: OrchestratorSettings,
    machine: SessionMachine,
    narration: NarrationQueue,
    camera: Box<dyn CameraProvider>,
    connector: Box<dyn Connector>,
    catalog: Arc<dyn ExerciseCatalog>,
    store: Arc<dyn SessionStore>,
    profiles: Arc<dyn ProfileService>,
    renderer: OverlayRenderer,
    surface: Option<Box<dyn OverlaySurface>>,
    frame_size: (u32, u32),
    exercises: Vec<ExerciseInfo>,

    source: Option<Box<dyn FrameSource>>,
    pacer: FramePacer,
    transport: Option<TransportClient>,
    next_connection: u64,

    link_tx: mpsc::UnboundedSender<LinkEnvelope>,
    link_rx: mpsc::UnboundedReceiver<LinkEnvelope>,
    speech_done: mpsc::UnboundedReceiver<SpeechDone>,
    commands: mpsc::UnboundedReceiver<Command>,
    notices: mpsc::UnboundedSender<Notice>,

    countdown: Option<Interval>,
    timers: DelayQueue<(Deferred, u64)>,
    relaxation: Option<RelaxationBreak>,
    relax_clock: Option<Interval>,
    relaxation_offered: bool,
    /// Session end requests still waiting on the server.
    summaries: JoinSet<()>,
}

impl Orchestrator {
    pub fn new(
        settings: OrchestratorSettings,
        prefs: VoicePreferences,
        parts: Collaborators,
        commands: mpsc::UnboundedReceiver<Command>,
        notices: mpsc::UnboundedSender<Notice>,
    ) -> Self {
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let (w, h) = settings.surface;
        Self {
            machine: SessionMachine::new(settings.timing.clone()),
            narration: NarrationQueue::new(parts.speech, prefs),
            camera: parts.camera,
            connector: parts.connector,
            catalog: parts.catalog,
            store: parts.store,
            profiles: parts.profiles,
            renderer: OverlayRenderer::new(w as usize, h as usize, settings.overlay),
            surface: parts.surface,
            frame_size: settings.surface,
            exercises: builtin_exercises(),
            source: None,
            pacer: FramePacer::new(settings.frame_interval),
            transport: None,
            next_connection: 1,
            link_tx,
            link_rx,
            speech_done: parts.speech_done,
            commands,
            notices,
            countdown: None,
            timers: DelayQueue::new(),
            relaxation: None,
            relax_clock: None,
            relaxation_offered: false,
            summaries: JoinSet::new(),
            settings,
        }
    }

    pub fn machine(&self) -> &SessionMachine {
        &self.machine
    }

    pub fn renderer(&self) -> &OverlayRenderer {
        &self.renderer
    }

    /// Run until `Command::Quit` or the command channel closes.
    pub async fn run(&mut self) -> Result<()> {
        self.load_catalogue().await;

        let mut display = interval(self.settings.display_period);
        display.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let pacing = self.pacer.is_running();
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Quit) | None => break,
                    Some(cmd) => self.handle_command(cmd).await,
                },
                Some(done) = self.speech_done.recv() => self.narration.on_finished(done),
                Some(envelope) = self.link_rx.recv() => self.handle_link(envelope),
                Some(expired) = self.timers.next(), if !self.timers.is_empty() => {
                    let (action, epoch) = expired.into_inner();
                    let effects = self.machine.fire(action, epoch, Instant::now());
                    self.execute(effects);
                }
                _ = next_tick(&mut self.countdown) => self.on_countdown_tick(),
                _ = next_tick(&mut self.relax_clock) => self.on_relaxation_tick(),
                now = display.tick(), if pacing => self.on_display_tick(now),
                Some(joined) = self.summaries.join_next(), if !self.summaries.is_empty() => {
                    reaped(joined);
                }
            }
        }

        self.shutdown();
        // a session stopped by quitting still reports its end
        while let Some(joined) = self.summaries.join_next().await {
            reaped(joined);
        }
        info!("session loop stopped");
        Ok(())
    }

    async fn load_catalogue(&mut self) {
        let limit = self.settings.backend_timeout;
        match bounded(limit, "exercise catalogue", self.catalog.exercises()).await {
            Ok(list) if !list.is_empty() => self.exercises = list,
            Ok(_) => debug!("empty exercise catalogue, keeping built-in list"),
            Err(e) => warn!(error = %e, "exercise catalogue unavailable, using built-in list"),
        }
        self.notify(Notice::Exercises(self.exercises.clone()));
    }

    async fn handle_command(&mut self, cmd: Command) {
        debug!(?cmd, "command");
        match cmd {
            Command::Start { exercise } => self.start_session(exercise).await,
            Command::Stop => match self.machine.stop(Instant::now()) {
                Ok(effects) => self.execute(effects),
                Err(e) => self.notify(Notice::Rejected(e.to_string())),
            },
            Command::ResetCounter => {
                let sent = self.machine.is_active()
                    && self
                        .transport
                        .as_mut()
                        .is_some_and(|t| t.send_control(ControlMessage::Reset));
                if !sent {
                    self.notify(Notice::Rejected("not connected".to_string()));
                }
            }
            Command::ToggleVoice => {
                let enabled = !self.narration.preferences().enabled;
                self.narration.set_enabled(enabled);
                self.voice_changed();
            }
            Command::AdjustRate(delta) => {
                let rate = self.narration.preferences().rate + delta;
                self.narration.set_rate(rate);
                self.voice_changed();
            }
            Command::SetVolume(volume) => {
                self.narration.set_volume(volume);
                self.voice_changed();
            }
            Command::AcceptRelaxation => self.begin_relaxation(),
            Command::SkipRelaxation => self.end_relaxation(false),
            Command::Dismiss => match self.machine.dismiss() {
                Ok(()) => self.relaxation_offered = false,
                Err(e) => self.notify(Notice::Rejected(e.to_string())),
            },
            Command::Quit => {}
        }
    }

    async fn start_session(&mut self, exercise: String) {
        if self.machine.is_active() {
            self.notify(Notice::Rejected("a session is already active".to_string()));
            return;
        }
        self.end_relaxation(false);
        self.relaxation_offered = false;

        let info = self.exercises.iter().find(|e| e.id == exercise).cloned();
        let limit = self.settings.backend_timeout;
        let params = timeout(limit, fetch_personalization(self.profiles.as_ref(), &exercise))
            .await
            .unwrap_or_else(|_| {
                warn!(%exercise, ?limit, "personalization timed out, using exercise defaults");
                None
            });
        let target = effective_target(params.as_ref(), info.as_ref(), self.settings.default_target);
        let duration = info
            .as_ref()
            .map_or(DEFAULT_DURATION_SECS, |e| e.duration_seconds);

        let source = match self.camera.open() {
            Ok(source) => source,
            Err(e) => {
                warn!(error = %e, "camera unavailable, session not started");
                self.notify(Notice::CameraUnavailable(e.to_string()));
                return;
            }
        };

        let id = match bounded(limit, "session start", self.store.start_session(&exercise)).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(error = %e, "session could not be registered, continuing locally");
                None
            }
        };

        let plan = SessionPlan {
            id,
            exercise: exercise.clone(),
            target_reps: target,
            duration_secs: duration,
            thresholds: params.as_ref().and_then(PersonalizedParams::thresholds),
        };
        let thresholds = plan.thresholds;
        match self.machine.start(plan, Instant::now()) {
            Ok(effects) => {
                self.frame_size = source.resolution();
                self.source = Some(source);
                self.transport = Some(TransportClient::new(
                    self.next_connection,
                    exercise.clone(),
                    thresholds,
                ));
                self.next_connection += 1;
                self.notify(Notice::SessionStarted {
                    exercise,
                    target_reps: target,
                    duration_secs: duration,
                    personalized: params,
                });
                self.execute(effects);
            }
            Err(e) => self.notify(Notice::Rejected(e.to_string())),
        }
    }

    /// Apply machine effects in order.
    fn execute(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::ResetNarration => self.narration.stop(),
                Effect::Activate => self.activate(),
                Effect::Narrate(intent) => self.dispatch(intent),
                Effect::Redraw => self.redraw(),
                Effect::Schedule {
                    after,
                    action,
                    epoch,
                } => {
                    self.timers.insert((action, epoch), after);
                }
                Effect::Teardown => self.teardown(),
                Effect::Finished(outcome) => {
                    if let Some(report) = self.machine.report() {
                        debug!(?outcome, "handing summary to persistence");
                        self.finalize(report);
                    }
                }
                Effect::OfferRelaxation => {
                    self.relaxation_offered = true;
                    self.notify(Notice::RelaxationOffered);
                }
            }
        }
    }

    /// The narration dispatcher: the only place cues reach the speech queue.
    fn dispatch(&mut self, intent: NarrationIntent) {
        let text = intent.cue.text();
        match intent.mode {
            NarrationMode::Interrupt => self.narration.speak(&text, true),
            NarrationMode::Enqueue => self.narration.enqueue(&text),
        }
    }

    fn activate(&mut self) {
        let mut countdown = interval_at(Instant::now() + SECOND, SECOND);
        countdown.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.countdown = Some(countdown);
        self.pacer.start();
        if let Some(transport) = self.transport.as_mut() {
            if let Err(e) = transport.connect(self.connector.as_mut(), self.link_tx.clone()) {
                warn!(error = %e, "transport connect refused");
            }
        }
    }

    /// Countdown, pacer, transport, narration. In that order.
    fn teardown(&mut self) {
        self.countdown = None;
        self.pacer.stop();
        if let Some(mut transport) = self.transport.take() {
            let stats = transport.stats();
            transport.disconnect();
            info!(
                sent = stats.frames_sent,
                dropped = stats.frames_dropped,
                malformed = stats.malformed,
                "transport closed"
            );
        }
        self.source = None;
        self.narration.stop();
        self.notify(Notice::Connection(false));
    }

    fn finalize(&mut self, report: SessionReport) {
        let notices = self.notices.clone();
        let Some(id) = report.id else {
            let _ = notices.send(Notice::Finished {
                report,
                summary: None,
            });
            return;
        };
        let store = Arc::clone(&self.store);
        let limit = self.settings.backend_timeout;
        self.summaries.spawn(async move {
            let summary = match bounded(limit, "session end", store.end_session(id)).await {
                Ok(summary) => Some(summary),
                Err(e) => {
                    warn!(%id, error = %e, "session summary unavailable, using local report");
                    None
                }
            };
            let _ = notices.send(Notice::Finished { report, summary });
        });
    }

    fn redraw(&mut self) {
        let Some(landmarks) = self
            .machine
            .session()
            .and_then(|s| s.snapshot.as_ref())
            .and_then(|e| e.landmarks.as_deref())
        else {
            return;
        };
        let stats = self.renderer.render(landmarks, self.frame_size);
        if let Some(surface) = self.surface.as_mut() {
            if surface.is_open() {
                if let Err(e) = surface.present(self.renderer.canvas()) {
                    warn!(error = %e, "overlay surface failed, disabling preview");
                    self.surface = None;
                }
            }
        }
        self.notify(Notice::Redrawn(stats));
    }

    fn handle_link(&mut self, envelope: LinkEnvelope) {
        let Some(transport) = self.transport.as_mut() else {
            debug!(connection = envelope.connection, "link event after teardown ignored");
            return;
        };
        match transport.handle(envelope) {
            Inbound::Connected => self.notify(Notice::Connection(true)),
            Inbound::Disconnected => self.notify(Notice::Connection(false)),
            Inbound::Analysis(event) => {
                let effects = self.machine.on_analysis(event, Instant::now());
                self.execute(effects);
                self.progress();
            }
            Inbound::ResetConfirmed => {
                let effects = self.machine.on_counter_reset();
                self.execute(effects);
                self.progress();
            }
            Inbound::Ignored => {}
        }
    }

    fn on_countdown_tick(&mut self) {
        let effects = self.machine.on_tick(Instant::now());
        self.execute(effects);
        self.progress();
    }

    fn on_display_tick(&mut self, now: Instant) {
        if let (Some(source), Some(transport)) = (self.source.as_mut(), self.transport.as_mut()) {
            self.pacer.on_tick(now, source.as_mut(), transport);
        }
    }

    fn progress(&self) {
        if let Some(s) = self.machine.session().filter(|s| s.status == SessionStatus::Active) {
            self.notify(Notice::Progress {
                rep_count: s.rep_count,
                remaining_secs: s.remaining_secs,
                feedback: s.feedback.clone(),
            });
        }
    }

    fn begin_relaxation(&mut self) {
        if !self.relaxation_offered || self.machine.status() != SessionStatus::Completed {
            self.notify(Notice::Rejected("no relaxation break on offer".to_string()));
            return;
        }
        self.relaxation_offered = false;
        let (relax, opening) =
            RelaxationBreak::begin(self.settings.relaxation_secs, &self.settings.relaxation_cues);
        info!(secs = relax.remaining(), "relaxation break started");
        self.notify(Notice::Relaxation {
            remaining_secs: relax.remaining(),
        });
        self.relaxation = Some(relax);
        self.relax_clock = Some(interval_at(Instant::now() + SECOND, SECOND));
        self.dispatch(opening);
    }

    fn on_relaxation_tick(&mut self) {
        let Some(relax) = self.relaxation.as_mut() else {
            self.relax_clock = None;
            return;
        };
        match relax.tick() {
            RelaxationStep::Running { remaining, cue } => {
                if let Some(intent) = cue {
                    self.dispatch(intent);
                }
                self.notify(Notice::Relaxation {
                    remaining_secs: remaining,
                });
            }
            RelaxationStep::Finished(intent) => {
                self.dispatch(intent);
                self.end_relaxation(true);
            }
        }
    }

    fn end_relaxation(&mut self, completed: bool) {
        self.relaxation_offered = false;
        self.relax_clock = None;
        if self.relaxation.take().is_some() {
            if !completed {
                self.narration.stop();
                info!("relaxation break skipped");
            }
            self.notify(Notice::RelaxationFinished);
        }
    }

    fn voice_changed(&mut self) {
        let prefs = self.narration.preferences();
        if let Some(path) = &self.settings.preferences_path {
            if let Err(e) = prefs.save(path) {
                warn!(error = %e, "voice preferences not saved");
            }
        }
        self.notify(Notice::Voice(prefs));
    }

    fn shutdown(&mut self) {
        if self.machine.is_active() {
            if let Ok(effects) = self.machine.stop(Instant::now()) {
                self.execute(effects);
            }
        }
        self.end_relaxation(false);
        self.narration.stop();
    }

    fn notify(&self, notice: Notice) {
        let _ = self.notices.send(notice);
    }
}

/// Fail a backend call that outlives `limit`.
async fn bounded<T>(limit: Duration, what: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
    timeout(limit, call)
        .await
        .map_err(|_| anyhow!("{what} timed out after {limit:?}"))?
}

fn reaped(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        warn!(error = %e, "session end task failed");
    }
}

/// Tick an optional interval; pending forever when it is not running.
async fn next_tick(clock: &mut Option<Interval>) -> Instant {
    match clock {
        Some(clock) => clock.tick().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::time::sleep;

    use super::*;
    use crate::backend::ErrorTally;
    use crate::camera::EncodedFrame;
    use crate::narration::engine::testing::FakeSpeech;
    use crate::narration::phrases;
    use crate::protocol::ClientMessage;
    use crate::session::{SessionId, SessionOutcome};
    use crate::transport::client::testing::FakeConnector;
    use crate::transport::LinkEvent;

    struct StillCamera;

    impl FrameSource for StillCamera {
        fn grab(&mut self) -> Result<Option<EncodedFrame>> {
            Ok(Some(EncodedFrame::jpeg(64, 48, vec![0xFF, 0xD8])))
        }

        fn resolution(&self) -> (u32, u32) {
            (64, 48)
        }
    }

    #[derive(Default)]
    struct FakeBackend {
        params: Option<PersonalizedParams>,
        ended: Mutex<Vec<SessionId>>,
        /// Accept every request and never answer.
        silent: bool,
    }

    impl FakeBackend {
        async fn answer(&self) {
            if self.silent {
                std::future::pending::<()>().await;
            }
        }
    }

    #[async_trait]
    impl ExerciseCatalog for FakeBackend {
        async fn exercises(&self) -> Result<Vec<ExerciseInfo>> {
            self.answer().await;
            let mut list = builtin_exercises();
            list.push(ExerciseInfo {
                id: "short".into(),
                name: "Short".into(),
                description: String::new(),
                target_reps: 10,
                duration_seconds: 5,
            });
            Ok(list)
        }
    }

    #[async_trait]
    impl SessionStore for FakeBackend {
        async fn start_session(&self, _exercise: &str) -> Result<SessionId> {
            self.answer().await;
            Ok(SessionId(99))
        }

        async fn end_session(&self, id: SessionId) -> Result<SessionSummary> {
            self.answer().await;
            self.ended.lock().unwrap().push(id);
            Ok(SessionSummary {
                session_id: id,
                total_reps: 3,
                correct_reps: 2,
                accuracy: 66.67,
                duration_seconds: 3.0,
                common_errors: [(
                    "knee".to_string(),
                    ErrorTally {
                        count: 1,
                        severity: "medium".to_string(),
                    },
                )]
                .into_iter()
                .collect(),
            })
        }
    }

    #[async_trait]
    impl ProfileService for FakeBackend {
        async fn personalized_params(&self, _exercise: &str) -> Result<Option<PersonalizedParams>> {
            self.answer().await;
            Ok(self.params.clone())
        }
    }

    struct Harness {
        orch: Orchestrator,
        commands: mpsc::UnboundedSender<Command>,
        notices: mpsc::UnboundedReceiver<Notice>,
        connector: FakeConnector,
        speech: FakeSpeech,
        backend: Arc<FakeBackend>,
    }

    fn harness(params: Option<PersonalizedParams>, camera_ok: bool) -> Harness {
        harness_with(
            FakeBackend {
                params,
                ..FakeBackend::default()
            },
            camera_ok,
        )
    }

    fn harness_with(backend: FakeBackend, camera_ok: bool) -> Harness {
        let backend = Arc::new(backend);
        let connector = FakeConnector::default();
        let speech = FakeSpeech::default();
        let (_done_tx, done_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        let camera = move || -> Result<Box<dyn FrameSource>> {
            if camera_ok {
                Ok(Box::new(StillCamera))
            } else {
                Err(anyhow!("camera 0 is not available"))
            }
        };
        let parts = Collaborators {
            camera: Box::new(camera),
            connector: Box::new(connector.clone()),
            catalog: backend.clone(),
            store: backend.clone(),
            profiles: backend.clone(),
            speech: Some(Box::new(speech.clone())),
            speech_done: done_rx,
            surface: None,
        };
        let settings = OrchestratorSettings {
            preferences_path: None,
            backend_timeout: Duration::from_secs(2),
            ..OrchestratorSettings::default()
        };
        let orch = Orchestrator::new(settings, VoicePreferences::default(), parts, cmd_rx, notice_tx);
        Harness {
            orch,
            commands: cmd_tx,
            notices: notice_rx,
            connector,
            speech,
            backend,
        }
    }

    fn analysis(rep: u32) -> LinkEvent {
        LinkEvent::Text(format!(
            r#"{{"type":"analysis","pose_detected":true,"rep_count":{rep},"landmarks":[{{"x":0.5,"y":0.5,"visibility":0.9}}]}}"#
        ))
    }

    async fn wait_for(
        notices: &mut mpsc::UnboundedReceiver<Notice>,
        pred: impl Fn(&Notice) -> bool,
    ) -> Notice {
        timeout(Duration::from_secs(600), async {
            loop {
                let notice = notices.recv().await.expect("notice channel closed");
                if pred(&notice) {
                    return notice;
                }
            }
        })
        .await
        .expect("timed out waiting for notice")
    }

    #[tokio::test(start_paused = true)]
    async fn test_personalized_session_completes() {
        let params = PersonalizedParams {
            down_angle: Some(100.0),
            max_reps: Some(3),
            ..PersonalizedParams::default()
        };
        let Harness {
            mut orch,
            commands,
            mut notices,
            connector,
            speech,
            backend,
        } = harness(Some(params), true);

        let remote = connector.clone();
        let driver = async move {
            let connector = remote;
            commands
                .send(Command::Start {
                    exercise: "squat".into(),
                })
                .unwrap();
            let started = wait_for(&mut notices, |n| matches!(n, Notice::SessionStarted { .. })).await;
            assert!(matches!(started, Notice::SessionStarted { target_reps: 3, duration_secs: 180, .. }));

            sleep(Duration::from_millis(50)).await;
            let events = connector.last_events();
            events.send(LinkEvent::Opened);
            sleep(Duration::from_millis(200)).await;

            let sent = connector.sent();
            assert!(matches!(sent[0], ClientMessage::SetThresholds { .. }));
            assert!(sent[1..].iter().all(ClientMessage::is_frame));
            assert!(connector.frame_count() >= 4);

            for rep in 1..=3 {
                events.send(analysis(rep));
                sleep(Duration::from_millis(100)).await;
            }
            let finished = wait_for(&mut notices, |n| matches!(n, Notice::Finished { .. })).await;
            commands.send(Command::Quit).unwrap();
            finished
        };

        let (result, finished) = tokio::join!(orch.run(), driver);
        result.unwrap();

        let Notice::Finished { report, summary } = finished else {
            unreachable!()
        };
        assert_eq!(report.outcome, SessionOutcome::Completed);
        assert_eq!(report.rep_count, 3);
        assert_eq!(summary.unwrap().session_id, SessionId(99));
        assert_eq!(*backend.ended.lock().unwrap(), vec![SessionId(99)]);
        assert!(connector.log.lock().unwrap().closed);
        assert!(orch.renderer().redraws() >= 3);

        let spoken = speech.started();
        assert!(spoken.contains(&"3".to_string()));
        assert!(spoken.contains(&phrases::START.to_string()));
        assert_eq!(spoken.last().map(String::as_str), Some(phrases::COMPLETE));
    }

    #[tokio::test(start_paused = true)]
    async fn test_camera_unavailable_blocks_start() {
        let Harness {
            mut orch,
            commands,
            mut notices,
            connector,
            ..
        } = harness(None, false);

        let driver = async move {
            commands
                .send(Command::Start {
                    exercise: "squat".into(),
                })
                .unwrap();
            let notice = wait_for(&mut notices, |n| matches!(n, Notice::CameraUnavailable(_))).await;
            commands.send(Command::Quit).unwrap();
            notice
        };
        let (result, notice) = tokio::join!(orch.run(), driver);
        result.unwrap();
        assert_eq!(notice, Notice::CameraUnavailable("camera 0 is not available".into()));
        assert_eq!(orch.machine().status(), SessionStatus::Idle);
        assert!(connector.log.lock().unwrap().connects.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_drop_then_manual_stop() {
        let Harness {
            mut orch,
            commands,
            mut notices,
            connector,
            ..
        } = harness(None, true);

        let driver = async move {
            commands
                .send(Command::Start {
                    exercise: "squat".into(),
                })
                .unwrap();
            sleep(Duration::from_millis(50)).await;
            let events = connector.last_events();
            events.send(LinkEvent::Opened);
            for rep in 1..=3 {
                events.send(analysis(rep));
                sleep(Duration::from_millis(100)).await;
            }
            events.send(LinkEvent::Closed {
                reason: Some("reset by peer".into()),
            });
            wait_for(&mut notices, |n| *n == Notice::Connection(false)).await;
            let frames = connector.frame_count();
            sleep(Duration::from_secs(1)).await;
            assert_eq!(connector.frame_count(), frames);

            commands.send(Command::Stop).unwrap();
            let finished = wait_for(&mut notices, |n| matches!(n, Notice::Finished { .. })).await;
            commands.send(Command::Quit).unwrap();
            finished
        };
        let (result, finished) = tokio::join!(orch.run(), driver);
        result.unwrap();
        let Notice::Finished { report, .. } = finished else {
            unreachable!()
        };
        assert_eq!(report.outcome, SessionOutcome::Aborted);
        assert_eq!(report.rep_count, 3);
        assert_eq!(report.target_reps, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_without_time_cues() {
        let Harness {
            mut orch,
            commands,
            mut notices,
            speech,
            ..
        } = harness(None, true);

        let driver = async move {
            commands
                .send(Command::Start {
                    exercise: "short".into(),
                })
                .unwrap();
            let finished = wait_for(&mut notices, |n| matches!(n, Notice::Finished { .. })).await;
            commands.send(Command::Quit).unwrap();
            finished
        };
        let (result, finished) = tokio::join!(orch.run(), driver);
        result.unwrap();
        let Notice::Finished { report, .. } = finished else {
            unreachable!()
        };
        assert_eq!(report.outcome, SessionOutcome::TimedOut);
        assert_eq!(report.remaining_secs, 0);
        assert_eq!(report.elapsed, Duration::from_secs(5));
        let spoken = speech.started();
        assert!(!spoken.iter().any(|s| s.starts_with("Còn")));
        assert_eq!(spoken.last().map(String::as_str), Some(phrases::TIMEOUT));
    }

    #[tokio::test(start_paused = true)]
    async fn test_relaxation_offer_and_break() {
        let params = PersonalizedParams {
            max_reps: Some(1),
            ..PersonalizedParams::default()
        };
        let Harness {
            mut orch,
            commands,
            mut notices,
            connector,
            speech,
            ..
        } = harness(Some(params), true);

        let driver = async move {
            commands
                .send(Command::Start {
                    exercise: "squat".into(),
                })
                .unwrap();
            sleep(Duration::from_millis(50)).await;
            let events = connector.last_events();
            events.send(LinkEvent::Opened);
            events.send(analysis(1));
            wait_for(&mut notices, |n| *n == Notice::RelaxationOffered).await;
            commands.send(Command::AcceptRelaxation).unwrap();
            wait_for(&mut notices, |n| *n == Notice::RelaxationFinished).await;
            commands.send(Command::Quit).unwrap();
        };
        let (result, ()) = tokio::join!(orch.run(), driver);
        result.unwrap();

        let spoken = speech.started();
        let pos = |text: &str| spoken.iter().position(|s| s == text);
        let intro = pos(phrases::RELAXATION_INTRO).unwrap();
        let start = pos(phrases::RELAXATION_START).unwrap();
        assert!(pos(phrases::COMPLETE).unwrap() < intro);
        assert!(intro < start);
        assert_eq!(spoken.last().map(String::as_str), Some(phrases::RELAXATION_COMPLETE));
    }

    #[tokio::test(start_paused = true)]
    async fn test_voice_toggle_and_second_start_rejected() {
        let Harness {
            mut orch,
            commands,
            mut notices,
            ..
        } = harness(None, true);

        let driver = async move {
            commands.send(Command::ToggleVoice).unwrap();
            let voice = wait_for(&mut notices, |n| matches!(n, Notice::Voice(_))).await;
            commands.send(Command::AdjustRate(5.0)).unwrap();
            let rate = wait_for(&mut notices, |n| matches!(n, Notice::Voice(_))).await;

            for _ in 0..2 {
                commands
                    .send(Command::Start {
                        exercise: "squat".into(),
                    })
                    .unwrap();
            }
            let rejected = wait_for(&mut notices, |n| matches!(n, Notice::Rejected(_))).await;
            commands.send(Command::Quit).unwrap();
            (voice, rate, rejected)
        };
        let (result, (voice, rate, rejected)) = tokio::join!(orch.run(), driver);
        result.unwrap();
        assert!(matches!(voice, Notice::Voice(p) if !p.enabled));
        assert!(matches!(rate, Notice::Voice(p) if p.rate == 2.0));
        assert_eq!(rejected, Notice::Rejected("a session is already active".into()));
        // quitting mid-session stops it
        assert_eq!(orch.machine().status(), SessionStatus::Aborted);
    }
    #[tokio::test(start_paused = true)]
    async fn test_quit_mid_session_still_ends_it_on_server() {
        let Harness {
            mut orch,
            commands,
            mut notices,
            connector,
            backend,
            ..
        } = harness(None, true);

        let remote = connector.clone();
        let driver = async move {
            commands
                .send(Command::Start {
                    exercise: "squat".into(),
                })
                .unwrap();
            sleep(Duration::from_millis(50)).await;
            let events = remote.last_events();
            events.send(LinkEvent::Opened);
            for rep in 1..=2 {
                events.send(analysis(rep));
            }
            wait_for(&mut notices, |n| matches!(n, Notice::Progress { rep_count: 2, .. })).await;
            commands.send(Command::Quit).unwrap();
            notices
        };
        let (result, mut notices) = tokio::join!(orch.run(), driver);
        result.unwrap();

        assert_eq!(*backend.ended.lock().unwrap(), vec![SessionId(99)]);
        let mut finished = None;
        while let Ok(notice) = notices.try_recv() {
            if let Notice::Finished { report, summary } = notice {
                finished = Some((report, summary));
            }
        }
        let (report, summary) = finished.expect("finished notice after quit");
        assert_eq!(report.outcome, SessionOutcome::Aborted);
        assert_eq!(report.rep_count, 2);
        assert_eq!(summary.map(|s| s.session_id), Some(SessionId(99)));
        assert!(connector.log.lock().unwrap().closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_backend_does_not_hold_up_session() {
        let Harness {
            mut orch,
            commands,
            mut notices,
            connector,
            backend,
            ..
        } = harness_with(
            FakeBackend {
                params: Some(PersonalizedParams {
                    max_reps: Some(3),
                    ..PersonalizedParams::default()
                }),
                silent: true,
                ..FakeBackend::default()
            },
            true,
        );

        let remote = connector.clone();
        let driver = async move {
            let Notice::Exercises(list) = wait_for(&mut notices, |n| matches!(n, Notice::Exercises(_))).await
            else {
                unreachable!()
            };
            commands
                .send(Command::Start {
                    exercise: "squat".into(),
                })
                .unwrap();
            let started = wait_for(&mut notices, |n| matches!(n, Notice::SessionStarted { .. })).await;

            sleep(Duration::from_millis(50)).await;
            let events = remote.last_events();
            events.send(LinkEvent::Opened);
            events.send(analysis(1));
            wait_for(&mut notices, |n| matches!(n, Notice::Progress { rep_count: 1, .. })).await;

            commands.send(Command::Stop).unwrap();
            let finished = wait_for(&mut notices, |n| matches!(n, Notice::Finished { .. })).await;
            commands.send(Command::Quit).unwrap();
            (list, started, finished)
        };
        let (result, (list, started, finished)) = tokio::join!(orch.run(), driver);
        result.unwrap();

        assert_eq!(list, builtin_exercises());
        assert_eq!(
            started,
            Notice::SessionStarted {
                exercise: "squat".into(),
                target_reps: 10,
                duration_secs: 180,
                personalized: None,
            }
        );
        let Notice::Finished { report, summary } = finished else {
            unreachable!()
        };
        assert_eq!(report.id, None);
        assert_eq!(report.rep_count, 1);
        assert!(summary.is_none());
        assert!(backend.ended.lock().unwrap().is_empty());
        assert_eq!(connector.log.lock().unwrap().connects.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_volume_is_clamped_and_reported() {
        let Harness {
            mut orch,
            commands,
            mut notices,
            ..
        } = harness(None, true);

        let driver = async move {
            commands.send(Command::SetVolume(0.4)).unwrap();
            let quiet = wait_for(&mut notices, |n| matches!(n, Notice::Voice(_))).await;
            commands.send(Command::SetVolume(3.0)).unwrap();
            let loud = wait_for(&mut notices, |n| matches!(n, Notice::Voice(_))).await;
            commands.send(Command::Quit).unwrap();
            (quiet, loud)
        };
        let (result, (quiet, loud)) = tokio::join!(orch.run(), driver);
        result.unwrap();
        assert!(matches!(quiet, Notice::Voice(p) if p.volume == 0.4 && p.enabled));
        assert!(matches!(loud, Notice::Voice(p) if p.volume == 1.0));
    }
}
