//! Shared relay engine
//!
//! One [`Relay`] per source key runs one transcoder and fans its output out
//! to every attached [`VideoSink`]; [`ControlSink`]s drive it with JSON
//! commands and receive status events. The [`RelayRegistry`] deduplicates
//! relays per key and evicts them when their last connection leaves.

pub mod connection;
pub mod registry;
pub mod sink_queue;
pub mod stream_relay;

pub use connection::{ConnectionId, ControlSink, SinkKind, Subscriber, VideoSink};
pub use registry::{RelayRegistry, RelaySession};
pub use sink_queue::{PushOutcome, SinkReceiver, SinkSender};
pub use stream_relay::{Relay, RelaySettings};
