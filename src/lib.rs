//! Shared RTSP relay.
//!
//! One FFmpeg process per camera source transcodes RTSP into MPEG-TS, and the
//! resulting byte stream is fanned out to every browser WebSocket watching
//! that source. Relays start on first attach and stop when the last viewer
//! leaves.

pub mod config;
pub mod errors;
pub mod models;
pub mod relay;
pub mod services;
pub mod utils;
pub mod web;
