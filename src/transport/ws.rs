//! WebSocket link to the analysis service (`{ws_url}/ws/exercise/{exercise}`).
//!
//! Frames travel through a `watch` slot so only the newest unsent frame survives;
//! control messages go through an unbounded queue that the writer drains first.

use anyhow::{anyhow, Result};
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use super::client::{Connector, EventSender, Link, LinkEvent};
use crate::protocol::{encode_client_message, ClientMessage};

pub struct WsConnector {
    base_url: String,
}

impl WsConnector {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    pub fn url_for(&self, exercise: &str) -> String {
        format!("{}/ws/exercise/{}", self.base_url.trim_end_matches('/'), exercise)
    }
}

impl Connector for WsConnector {
    fn connect(&mut self, exercise: &str, events: EventSender) -> Box<dyn Link> {
        let url = self.url_for(exercise);
        let (frame_tx, frame_rx) = watch::channel::<Option<String>>(None);
        let (control_tx, control_rx) = mpsc::unbounded_channel::<String>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(run_socket(url, events, frame_rx, control_rx, shutdown_rx));
        Box::new(WsLink {
            frame_tx,
            control_tx,
            shutdown: Some(shutdown_tx),
            handle,
        })
    }
}

struct WsLink {
    frame_tx: watch::Sender<Option<String>>,
    control_tx: mpsc::UnboundedSender<String>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl Link for WsLink {
    fn send(&mut self, msg: ClientMessage) -> Result<()> {
        if self.handle.is_finished() {
            return Err(anyhow!("socket task finished"));
        }
        let text = encode_client_message(&msg)?;
        if msg.is_frame() {
            // Replaces any frame the writer has not picked up yet.
            self.frame_tx.send_replace(Some(text));
        } else {
            self.control_tx
                .send(text)
                .map_err(|_| anyhow!("socket writer gone"))?;
        }
        Ok(())
    }

    fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

async fn run_socket(
    url: String,
    events: EventSender,
    mut frames: watch::Receiver<Option<String>>,
    mut control: mpsc::UnboundedReceiver<String>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let ws = tokio::select! {
        _ = &mut shutdown => {
            events.send(LinkEvent::Closed { reason: None });
            return;
        }
        connected = connect_async(url.as_str()) => match connected {
            Ok((ws, _)) => ws,
            Err(e) => {
                events.send(LinkEvent::Closed { reason: Some(format!("connect {url}: {e}")) });
                return;
            }
        }
    };
    events.send(LinkEvent::Opened);

    let (mut sink, mut stream) = ws.split();
    let reason = loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                let _ = sink.send(Message::Close(None)).await;
                break None;
            }
            Some(text) = control.recv() => {
                if let Err(e) = sink.send(Message::text(text)).await {
                    break Some(e.to_string());
                }
            }
            changed = frames.changed() => {
                if changed.is_err() {
                    let _ = sink.send(Message::Close(None)).await;
                    break None;
                }
                let next = frames.borrow_and_update().clone();
                if let Some(text) = next {
                    if let Err(e) = sink.send(Message::text(text)).await {
                        break Some(e.to_string());
                    }
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if !events.send(LinkEvent::Text(text.as_str().to_owned())) {
                        break None;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    break frame.map(|f| f.reason.as_str().to_owned()).filter(|r| !r.is_empty());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break Some(e.to_string()),
                None => break None,
            }
        }
    };

    match &reason {
        Some(reason) => warn!(%url, %reason, "socket closed with error"),
        None => debug!(%url, "socket closed"),
    }
    events.send(LinkEvent::Closed { reason });
}
