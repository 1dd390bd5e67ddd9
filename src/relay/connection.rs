//! Subscriber connections
//!
//! A socket joins a relay as exactly one of two kinds, fixed at creation:
//! a [`VideoSink`] that only receives binary chunks, or a [`ControlSink`]
//! that receives JSON events and may issue commands. Each sink is the
//! producer half of a bounded [`sink_queue`](super::sink_queue); the socket
//! writer task holds the receiving half.

use std::fmt;

use bytes::Bytes;
use serde::Serialize;
use uuid::Uuid;

use super::sink_queue::{self, PushOutcome, SinkReceiver, SinkSender};
use crate::models::RelayEvent;

/// Identity of one subscriber connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    Video,
    Control,
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkKind::Video => write!(f, "video"),
            SinkKind::Control => write!(f, "control"),
        }
    }
}

/// Binary-only subscriber
#[derive(Debug, Clone)]
pub struct VideoSink {
    id: ConnectionId,
    queue: SinkSender<Bytes>,
}

impl VideoSink {
    /// New sink plus the receiver its socket writer drains
    pub fn new(capacity: usize) -> (Self, SinkReceiver<Bytes>) {
        let (queue, frames) = sink_queue::channel(capacity);
        (
            Self {
                id: ConnectionId::new(),
                queue,
            },
            frames,
        )
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a chunk without blocking
    pub fn deliver(&self, chunk: Bytes) -> PushOutcome {
        self.queue.push(chunk)
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    pub fn close(&self) {
        self.queue.close();
    }

    pub fn dropped_chunks(&self) -> u64 {
        self.queue.dropped()
    }
}

/// JSON event subscriber that may issue commands
#[derive(Debug, Clone)]
pub struct ControlSink {
    id: ConnectionId,
    queue: SinkSender<RelayEvent>,
}

impl ControlSink {
    pub fn new(capacity: usize) -> (Self, SinkReceiver<RelayEvent>) {
        let (queue, events) = sink_queue::channel(capacity);
        (
            Self {
                id: ConnectionId::new(),
                queue,
            },
            events,
        )
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn notify(&self, event: RelayEvent) -> PushOutcome {
        self.queue.push(event)
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    pub fn close(&self) {
        self.queue.close();
    }
}

/// A connection attached to a relay
#[derive(Debug, Clone)]
pub enum Subscriber {
    Video(VideoSink),
    Control(ControlSink),
}

impl Subscriber {
    pub fn id(&self) -> ConnectionId {
        match self {
            Subscriber::Video(sink) => sink.id(),
            Subscriber::Control(sink) => sink.id(),
        }
    }

    pub fn kind(&self) -> SinkKind {
        match self {
            Subscriber::Video(_) => SinkKind::Video,
            Subscriber::Control(_) => SinkKind::Control,
        }
    }

    pub fn is_closed(&self) -> bool {
        match self {
            Subscriber::Video(sink) => sink.is_closed(),
            Subscriber::Control(sink) => sink.is_closed(),
        }
    }

    pub fn close(&self) {
        match self {
            Subscriber::Video(sink) => sink.close(),
            Subscriber::Control(sink) => sink.close(),
        }
    }
}

impl From<VideoSink> for Subscriber {
    fn from(sink: VideoSink) -> Self {
        Subscriber::Video(sink)
    }
}

impl From<ControlSink> for Subscriber {
    fn from(sink: ControlSink) -> Self {
        Subscriber::Control(sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StatusPhase;

    #[tokio::test]
    async fn test_video_sink_delivers_bytes() {
        let (sink, mut frames) = VideoSink::new(4);
        sink.deliver(Bytes::from_static(b"abc"));
        assert_eq!(frames.recv().await, Some(Bytes::from_static(b"abc")));
    }

    #[tokio::test]
    async fn test_control_sink_delivers_events() {
        let (sink, mut events) = ControlSink::new(4);
        sink.notify(RelayEvent::status(StatusPhase::Connected));
        assert_eq!(
            events.recv().await,
            Some(RelayEvent::status(StatusPhase::Connected))
        );
    }

    #[test]
    fn test_subscriber_identity_and_kind() {
        let (video, _frames) = VideoSink::new(1);
        let (control, _events) = ControlSink::new(1);
        let a = Subscriber::from(video.clone());
        let b = Subscriber::from(control);

        assert_eq!(a.id(), video.id());
        assert_ne!(a.id(), b.id());
        assert_eq!(a.kind(), SinkKind::Video);
        assert_eq!(b.kind(), SinkKind::Control);
    }

    #[test]
    fn test_dropped_receiver_marks_sink_closed() {
        let (video, frames) = VideoSink::new(1);
        assert!(!video.is_closed());
        drop(frames);
        assert!(video.is_closed());
        assert_eq!(video.deliver(Bytes::new()), PushOutcome::Closed);
    }
}
