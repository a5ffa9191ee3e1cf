//! Connection lifecycle for one exercise session: `Idle → Connecting → Open → Closed`.
//!
//! A `TransportClient` is single-use. `Closed` is terminal; reactivating a session
//! builds a new client. Nothing is queued while the link is not open: frames and
//! control messages sent in any other state are dropped.

use anyhow::Result;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::camera::EncodedFrame;
use crate::protocol::{
    decode_server_message, AnalysisEvent, ClientMessage, ControlMessage, ServerMessage, Thresholds,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closed,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection instance already used (state {0:?})")]
    AlreadyUsed(ConnectionState),
}

/// Raw events produced by a link implementation.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Opened,
    Text(String),
    Closed { reason: Option<String> },
}

/// A link event stamped with the connection instance that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkEnvelope {
    pub connection: u64,
    pub event: LinkEvent,
}

/// Handle a link uses to report back into the session loop.
#[derive(Debug, Clone)]
pub struct EventSender {
    connection: u64,
    tx: mpsc::UnboundedSender<LinkEnvelope>,
}

impl EventSender {
    pub fn new(connection: u64, tx: mpsc::UnboundedSender<LinkEnvelope>) -> Self {
        Self { connection, tx }
    }

    /// Returns false once the session loop is gone.
    pub fn send(&self, event: LinkEvent) -> bool {
        self.tx
            .send(LinkEnvelope {
                connection: self.connection,
                event,
            })
            .is_ok()
    }
}

/// Outbound half of a connection. Sends must not block.
pub trait Link: Send {
    fn send(&mut self, msg: ClientMessage) -> Result<()>;
    fn close(&mut self);
}

/// Opens links. The returned link is usable once `LinkEvent::Opened` arrives.
pub trait Connector {
    fn connect(&mut self, exercise: &str, events: EventSender) -> Box<dyn Link>;
}

/// What the session loop should do with a handled link event.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Connected,
    Analysis(AnalysisEvent),
    ResetConfirmed,
    Disconnected,
    Ignored,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub malformed: u64,
}

pub struct TransportClient {
    connection: u64,
    exercise: String,
    thresholds: Option<Thresholds>,
    state: ConnectionState,
    link: Option<Box<dyn Link>>,
    stats: TransportStats,
}

impl TransportClient {
    pub fn new(connection: u64, exercise: impl Into<String>, thresholds: Option<Thresholds>) -> Self {
        Self {
            connection,
            exercise: exercise.into(),
            thresholds: thresholds.filter(|t| !t.is_empty()),
            state: ConnectionState::Idle,
            link: None,
            stats: TransportStats::default(),
        }
    }

    pub fn connection_id(&self) -> u64 {
        self.connection
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Open
    }

    pub fn stats(&self) -> TransportStats {
        self.stats
    }

    pub fn connect(
        &mut self,
        connector: &mut dyn Connector,
        events: mpsc::UnboundedSender<LinkEnvelope>,
    ) -> Result<(), TransportError> {
        if self.state != ConnectionState::Idle {
            return Err(TransportError::AlreadyUsed(self.state));
        }
        info!(connection = self.connection, exercise = %self.exercise, "connecting");
        let sender = EventSender::new(self.connection, events);
        self.link = Some(connector.connect(&self.exercise, sender));
        self.state = ConnectionState::Connecting;
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.close();
        }
        if self.state != ConnectionState::Closed {
            info!(connection = self.connection, "disconnected");
        }
        self.state = ConnectionState::Closed;
    }

    /// Fire-and-forget. Returns whether the frame was handed to the link.
    pub fn send_frame(&mut self, frame: &EncodedFrame) -> bool {
        if !self.is_connected() {
            self.stats.frames_dropped += 1;
            return false;
        }
        let msg = ClientMessage::Frame {
            data: frame.to_data_url(),
        };
        if self.send(msg) {
            self.stats.frames_sent += 1;
            true
        } else {
            self.stats.frames_dropped += 1;
            false
        }
    }

    pub fn send_control(&mut self, msg: ControlMessage) -> bool {
        if !self.is_connected() {
            debug!(connection = self.connection, ?msg, "control dropped, link not open");
            return false;
        }
        self.send(msg.into())
    }

    fn send(&mut self, msg: ClientMessage) -> bool {
        let Some(link) = self.link.as_mut() else {
            return false;
        };
        match link.send(msg) {
            Ok(()) => true,
            Err(e) => {
                debug!(connection = self.connection, error = %e, "link send failed");
                false
            }
        }
    }

    /// Apply a link event. Events from other connection instances are ignored.
    pub fn handle(&mut self, envelope: LinkEnvelope) -> Inbound {
        if envelope.connection != self.connection {
            debug!(
                connection = self.connection,
                stale = envelope.connection,
                "ignoring event from superseded connection"
            );
            return Inbound::Ignored;
        }

        match envelope.event {
            LinkEvent::Opened => {
                if self.state != ConnectionState::Connecting {
                    return Inbound::Ignored;
                }
                self.state = ConnectionState::Open;
                info!(connection = self.connection, "connected");
                // Thresholds must reach the service before the first frame.
                if let Some(thresholds) = self.thresholds {
                    if self.send_control(ControlMessage::SetThresholds(thresholds)) {
                        info!(connection = self.connection, ?thresholds, "sent custom thresholds");
                    }
                }
                Inbound::Connected
            }
            LinkEvent::Text(text) => {
                if self.state != ConnectionState::Open {
                    return Inbound::Ignored;
                }
                match decode_server_message(&text) {
                    Ok(ServerMessage::Analysis(event)) => Inbound::Analysis(event),
                    Ok(ServerMessage::ResetConfirmed) => Inbound::ResetConfirmed,
                    Ok(ServerMessage::Unknown) => {
                        debug!(connection = self.connection, "ignoring unknown message type");
                        Inbound::Ignored
                    }
                    Err(e) => {
                        self.stats.malformed += 1;
                        warn!(connection = self.connection, error = %e, "discarding malformed message");
                        Inbound::Ignored
                    }
                }
            }
            LinkEvent::Closed { reason } => {
                if self.state == ConnectionState::Closed {
                    return Inbound::Ignored;
                }
                match reason {
                    Some(reason) => warn!(connection = self.connection, %reason, "connection lost"),
                    None => info!(connection = self.connection, "connection closed by peer"),
                }
                self.link = None;
                self.state = ConnectionState::Closed;
                Inbound::Disconnected
            }
        }
    }
}

impl Drop for TransportClient {
    fn drop(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.close();
        }
    }
}
