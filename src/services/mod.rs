//! Services around the relay core: transcoder processes, command building,
//! diagnostic classification, stream records, source checks and snapshots.

pub mod error_classifier;
pub mod ffmpeg_command_builder;
pub mod ffmpeg_wrapper;
pub mod snapshot_service;
pub mod source_verifier;
pub mod stream_store;

pub use error_classifier::classify_diagnostics;
pub use ffmpeg_command_builder::FFmpegCommandBuilder;
pub use ffmpeg_wrapper::{
    ChunkRead, FFmpegProcess, FFmpegProcessFactory, ProcessSettings, Transcoder, TranscoderFactory,
};
pub use snapshot_service::{FFmpegFrameCapturer, FrameCapturer, Snapshot, SnapshotService};
pub use source_verifier::{CommandSourceVerifier, SourceVerifier};
pub use stream_store::{InMemoryStreamStore, StreamStore};
