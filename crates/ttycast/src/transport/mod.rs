//! Network transports for live viewers.

pub mod websocket;
