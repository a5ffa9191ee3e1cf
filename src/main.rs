//! Console front-end for a live rehabilitation exercise session.
//!
//! Commands are read line by line from stdin:
//!   s <exercise>  start          x  stop            r  reset counter
//!   v             toggle voice   +/-  speech rate   y/n  accept/skip relaxation
//!   vol <0..1>    speech volume  d  dismiss         q  quit

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, warn};

use rehab_live::backend::HttpBackend;
use rehab_live::camera::{FrameSource, ReplaySource};
use rehab_live::config::{Config, SpeechBackend};
use rehab_live::logging;
use rehab_live::narration::{CommandSpeech, LogSpeech, SpeechDone, SpeechEngine, VoicePreferences};
use rehab_live::render::OverlaySurface;
use rehab_live::transport::WsConnector;
use rehab_live::{Collaborators, Command, Notice, Orchestrator, OrchestratorSettings};

const RATE_STEP: f32 = 0.1;

#[derive(Parser, Debug)]
#[command(name = "rehab-live", version = env!("GIT_VERSION"), about = "Live rehabilitation exercise session")]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "rehab.toml")]
    config: PathBuf,

    /// Start this exercise immediately
    #[arg(short, long)]
    exercise: Option<String>,

    /// Replay JPEG frames from a directory instead of a camera
    #[arg(long)]
    replay: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = Config::load_or_default(&args.config);
    if args.replay.is_some() {
        config.camera.replay_dir = args.replay.clone();
    }

    let log_path = logging::init(&config.log.dir, &config.log.filter)?;
    info!(version = env!("GIT_VERSION"), log = %log_path.display(), "rehab-live starting");

    let (done_tx, done_rx) = mpsc::unbounded_channel::<SpeechDone>();
    let speech: Option<Box<dyn SpeechEngine>> = match config.narration.engine {
        SpeechBackend::Espeak => Some(Box::new(CommandSpeech::new(
            config.narration.program.clone(),
            config.narration.voice.clone(),
            done_tx,
        ))),
        SpeechBackend::Log => Some(Box::new(LogSpeech::new(done_tx))),
        SpeechBackend::None => {
            info!("narration disabled by configuration");
            None
        }
    };
    let prefs = VoicePreferences::load_or_default(&config.narration.preferences_path);

    let backend = Arc::new(HttpBackend::new(
        config.server.base_url.clone(),
        config.server.token.clone(),
        config.server.request_timeout(),
    )?);
    let camera_config = config.camera.clone();
    let camera = move || -> Result<Box<dyn FrameSource>> {
        if let Some(dir) = &camera_config.replay_dir {
            let source = ReplaySource::open(dir, camera_config.width, camera_config.height)?;
            return Ok(Box::new(source));
        }
        open_device(&camera_config)
    };

    let parts = Collaborators {
        camera: Box::new(camera),
        connector: Box::new(WsConnector::new(config.server.ws_url.clone())),
        catalog: backend.clone(),
        store: backend.clone(),
        profiles: backend,
        speech,
        speech_done: done_rx,
        surface: open_surface(&config),
    };

    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (notice_tx, mut notice_rx) = mpsc::unbounded_channel();

    if let Some(exercise) = args.exercise {
        let _ = cmd_tx.send(Command::Start { exercise });
    }
    spawn_console(cmd_tx);
    tokio::spawn(async move {
        while let Some(notice) = notice_rx.recv().await {
            print_notice(&notice);
        }
    });

    let mut orchestrator = Orchestrator::new(
        OrchestratorSettings::from_config(&config),
        prefs,
        parts,
        cmd_rx,
        notice_tx,
    );
    orchestrator.run().await?;
    info!("bye");
    Ok(())
}

#[cfg(feature = "desktop")]
fn open_device(camera: &rehab_live::config::CameraConfig) -> Result<Box<dyn FrameSource>> {
    let device = rehab_live::camera::ThreadedCamera::start(
        camera.index,
        camera.width,
        camera.height,
        camera.jpeg_quality,
    )?;
    Ok(Box::new(device))
}

#[cfg(not(feature = "desktop"))]
fn open_device(camera: &rehab_live::config::CameraConfig) -> Result<Box<dyn FrameSource>> {
    Err(anyhow::anyhow!(
        "camera {} needs a desktop build; set camera.replay_dir or pass --replay",
        camera.index
    ))
}

#[cfg(feature = "desktop")]
fn open_surface(config: &Config) -> Option<Box<dyn OverlaySurface>> {
    if !config.overlay.window {
        return None;
    }
    match rehab_live::render::OverlayWindow::new(
        "rehab-live",
        config.camera.width as usize,
        config.camera.height as usize,
    ) {
        Ok(window) => Some(Box::new(window)),
        Err(e) => {
            warn!(error = %e, "preview window unavailable");
            None
        }
    }
}

#[cfg(not(feature = "desktop"))]
fn open_surface(config: &Config) -> Option<Box<dyn OverlaySurface>> {
    if config.overlay.window {
        warn!("preview window needs a desktop build");
    }
    None
}

fn parse_command(line: &str) -> Option<Command> {
    let mut parts = line.split_whitespace();
    let cmd = match parts.next()? {
        "s" | "start" => Command::Start {
            exercise: parts.next()?.to_string(),
        },
        "x" | "stop" => Command::Stop,
        "r" | "reset" => Command::ResetCounter,
        "v" => Command::ToggleVoice,
        "vol" | "volume" => Command::SetVolume(parts.next()?.parse().ok()?),
        "+" => Command::AdjustRate(RATE_STEP),
        "-" => Command::AdjustRate(-RATE_STEP),
        "y" => Command::AcceptRelaxation,
        "n" => Command::SkipRelaxation,
        "d" => Command::Dismiss,
        "q" | "quit" => Command::Quit,
        _ => return None,
    };
    Some(cmd)
}

/// Stdin is blocking; read it on its own thread.
fn spawn_console(commands: mpsc::UnboundedSender<Command>) {
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            match parse_command(&line) {
                Some(cmd) => {
                    if commands.send(cmd).is_err() {
                        return;
                    }
                }
                None if line.trim().is_empty() => {}
                None => eprintln!("unknown command: {}", line.trim()),
            }
        }
        let _ = commands.send(Command::Quit);
    });
}

fn print_notice(notice: &Notice) {
    match notice {
        Notice::Exercises(list) => {
            println!("Exercises:");
            for e in list {
                println!("  {:<18} {} ({} reps, {}s)", e.id, e.name, e.target_reps, e.duration_seconds);
            }
        }
        Notice::SessionStarted {
            exercise,
            target_reps,
            duration_secs,
            personalized,
        } => {
            println!("Started {exercise}: {target_reps} reps in {duration_secs}s");
            if let Some(p) = personalized {
                for w in &p.warnings {
                    println!("  ! {w}");
                }
                for r in &p.recommendations {
                    println!("  * {r}");
                }
            }
        }
        Notice::Rejected(reason) => println!("Rejected: {reason}"),
        Notice::CameraUnavailable(reason) => println!("Camera unavailable: {reason}"),
        Notice::Connection(up) => println!("Analysis service {}", if *up { "connected" } else { "disconnected" }),
        Notice::Progress {
            rep_count,
            remaining_secs,
            feedback,
        } => {
            let tip = feedback.last().map(String::as_str).unwrap_or("");
            println!("[{:02}:{:02}] reps {rep_count} {tip}", remaining_secs / 60, remaining_secs % 60);
        }
        Notice::Redrawn(_) => {}
        Notice::Finished { report, summary } => {
            println!(
                "Session {:?}: {}/{} reps in {:.0}s",
                report.outcome,
                report.rep_count,
                report.target_reps,
                report.elapsed.as_secs_f64()
            );
            if let Some(s) = summary {
                println!("  correct {}/{} ({:.1}%)", s.correct_reps, s.total_reps, s.accuracy);
                for (name, tally) in &s.common_errors {
                    println!("  {name}: {} ({})", tally.count, tally.severity);
                }
            }
        }
        Notice::RelaxationOffered => println!("Take a relaxation break? [y/n]"),
        Notice::Relaxation { remaining_secs } => println!("Relaxing... {remaining_secs}s"),
        Notice::RelaxationFinished => println!("Relaxation finished"),
        Notice::Voice(p) => println!(
            "Voice {} rate {:.2} volume {:.2}",
            if p.enabled { "on" } else { "off" },
            p.rate,
            p.volume
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            parse_command("s squat"),
            Some(Command::Start {
                exercise: "squat".into()
            })
        );
        assert_eq!(parse_command("s"), None);
        assert_eq!(parse_command(" + "), Some(Command::AdjustRate(RATE_STEP)));
        assert_eq!(parse_command("vol 0.5"), Some(Command::SetVolume(0.5)));
        assert_eq!(parse_command("volume 1"), Some(Command::SetVolume(1.0)));
        assert_eq!(parse_command("vol"), None);
        assert_eq!(parse_command("vol loud"), None);
        assert_eq!(parse_command("q"), Some(Command::Quit));
        assert_eq!(parse_command("zzz"), None);
    }
}
