//! IO for recorded sensor sessions
//!
//! Recordings let the binary replay transforms and point clouds offline.

mod recording;

pub use recording::{
    read_recording, RecordedMessage, RecordingError, RecordingReader, RecordingWriter, Result,
};
