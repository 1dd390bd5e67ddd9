//! HTTP and WebSocket handlers, grouped by resource

pub mod health;
pub mod relays;
pub mod stream_socket;
pub mod streams;
pub mod thumbnails;
