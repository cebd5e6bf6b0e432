mod bridge;
mod connection;
pub mod discovery;
mod message;

pub use bridge::{Bridge, DecodeError, Inbound};
pub use connection::{HomeAssistant, Initiator};
pub use message::{Incoming, Outgoing};
