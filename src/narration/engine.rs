//! Speech back-ends. An engine starts one utterance at a time and reports
//! completion by sending the utterance id on the `done` channel.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Utterance-finished notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeechDone {
    pub id: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub id: u64,
    pub text: String,
    /// 0.5..=2.0, 1.0 is the engine's normal pace
    pub rate: f32,
    /// 0.0..=1.0
    pub volume: f32,
}

pub trait SpeechEngine {
    /// Begin speaking. Must not block; completion arrives on the done channel.
    fn start(&mut self, utterance: &Utterance) -> Result<()>;

    /// Stop the in-flight utterance. No completion is reported for it.
    fn cancel(&mut self);
}

/// Logs utterances and completes them after an estimated speaking time.
pub struct LogSpeech {
    done: mpsc::UnboundedSender<SpeechDone>,
    current: Option<JoinHandle<()>>,
}

impl LogSpeech {
    pub fn new(done: mpsc::UnboundedSender<SpeechDone>) -> Self {
        Self { done, current: None }
    }
}

/// Rough speaking time: ~2.5 words per second at rate 1.0, never under 300 ms.
pub fn estimated_duration(text: &str, rate: f32) -> Duration {
    let words = text.split_whitespace().count().max(1) as f32;
    let secs = words / (2.5 * rate.max(0.1));
    Duration::from_secs_f32(secs).max(Duration::from_millis(300))
}

impl SpeechEngine for LogSpeech {
    fn start(&mut self, utterance: &Utterance) -> Result<()> {
        info!(id = utterance.id, text = %utterance.text, "speak");
        let done = self.done.clone();
        let id = utterance.id;
        let wait = estimated_duration(&utterance.text, utterance.rate);
        self.current = Some(tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            let _ = done.send(SpeechDone { id });
        }));
        Ok(())
    }

    fn cancel(&mut self) {
        if let Some(handle) = self.current.take() {
            handle.abort();
        }
    }
}

/// Speaks through an external `espeak-ng`-compatible program.
pub struct CommandSpeech {
    program: String,
    voice: String,
    done: mpsc::UnboundedSender<SpeechDone>,
    current: Option<JoinHandle<()>>,
}

impl CommandSpeech {
    pub fn new(program: impl Into<String>, voice: impl Into<String>, done: mpsc::UnboundedSender<SpeechDone>) -> Self {
        Self {
            program: program.into(),
            voice: voice.into(),
            done,
            current: None,
        }
    }

    fn words_per_minute(rate: f32) -> u32 {
        (175.0 * rate).round() as u32
    }

    fn amplitude(volume: f32) -> u32 {
        (100.0 * volume).round() as u32
    }
}

impl SpeechEngine for CommandSpeech {
    fn start(&mut self, utterance: &Utterance) -> Result<()> {
        let mut child = Command::new(&self.program)
            .arg("-v")
            .arg(&self.voice)
            .arg("-s")
            .arg(Self::words_per_minute(utterance.rate).to_string())
            .arg("-a")
            .arg(Self::amplitude(utterance.volume).to_string())
            .arg(&utterance.text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.program))?;

        let done = self.done.clone();
        let id = utterance.id;
        self.current = Some(tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => debug!(id, %status, "utterance finished"),
                Err(e) => debug!(id, error = %e, "utterance wait failed"),
            }
            let _ = done.send(SpeechDone { id });
        }));
        Ok(())
    }

    fn cancel(&mut self) {
        // Aborting the waiter drops the child, which kills it.
        if let Some(handle) = self.current.take() {
            handle.abort();
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimated_duration() {
        assert_eq!(estimated_duration("a b c d e", 1.0), Duration::from_secs(2));
        let single = estimated_duration("7", 1.0);
        assert!(single > Duration::from_millis(300) && single < Duration::from_millis(500));
        assert_eq!(estimated_duration("", 2.0), Duration::from_millis(300));
    }

    #[test]
    fn test_command_rate_mapping() {
        assert_eq!(CommandSpeech::words_per_minute(1.0), 175);
        assert_eq!(CommandSpeech::words_per_minute(0.85), 149);
        assert_eq!(CommandSpeech::amplitude(0.5), 50);
    }

    #[tokio::test(start_paused = true)]
    async fn test_log_speech_reports_completion() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut engine = LogSpeech::new(tx);
        let utterance = Utterance {
            id: 9,
            text: "Tốt lắm!".to_string(),
            rate: 1.0,
            volume: 1.0,
        };
        engine.start(&utterance).unwrap();
        assert_eq!(rx.recv().await, Some(SpeechDone { id: 9 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_log_speech_cancel_suppresses_completion() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut engine = LogSpeech::new(tx);
        engine
            .start(&Utterance {
                id: 1,
                text: "một hai ba".to_string(),
                rate: 1.0,
                volume: 1.0,
            })
            .unwrap();
        engine.cancel();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }
}
