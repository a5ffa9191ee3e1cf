pub mod client;
pub mod ws;

pub use client::{
    ConnectionState, Connector, EventSender, Inbound, Link, LinkEnvelope, LinkEvent, TransportClient,
    TransportError, TransportStats,
};
pub use ws::WsConnector;
