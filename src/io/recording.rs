//! Recorded sensor sessions
//!
//! A recording is a JSON-lines file. Every line holds one [`RecordedMessage`]:
//!
//! ```text
//! {"type":"transform","frame":"sensor","stamp":0.0,"quaternion":[0,0,0,1],"translation":[0,0,0]}
//! {"type":"pointcloud","header":{"frame_id":"sensor","stamp":0.0},"points":[...]}
//! ```
//!
//! Blank lines and lines starting with `#` are skipped.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::{PointCloudMsg, Transformation};

/// Errors that can occur while reading or writing recordings
#[derive(Debug, thiserror::Error)]
pub enum RecordingError {
    #[error("failed to open recording {path}: {source}")]
    Open { path: PathBuf, source: io::Error },

    #[error("failed to read recording {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to write recording {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("invalid message on line {line}: {source}")]
    Parse { line: usize, source: serde_json::Error },

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RecordingError>;

/// One entry of a recording
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordedMessage {
    /// Pose of `frame` in the world frame at `stamp`
    Transform {
        frame: String,
        stamp: f64,
        /// x, y, z, w
        quaternion: [f32; 4],
        translation: [f32; 3],
    },
    Pointcloud(PointCloudMsg),
    FreespacePointcloud(PointCloudMsg),
}

impl RecordedMessage {
    pub fn transform(frame: impl Into<String>, stamp: f64, transform: &Transformation) -> Self {
        RecordedMessage::Transform {
            frame: frame.into(),
            stamp,
            quaternion: transform.rotation().to_array(),
            translation: transform.translation().to_array(),
        }
    }

    pub fn stamp(&self) -> f64 {
        match self {
            RecordedMessage::Transform { stamp, .. } => *stamp,
            RecordedMessage::Pointcloud(msg) | RecordedMessage::FreespacePointcloud(msg) => msg.header.stamp,
        }
    }
}

/// Streaming reader over a recording file.
pub struct RecordingReader {
    path: PathBuf,
    lines: io::Lines<BufReader<File>>,
    line: usize,
}

impl RecordingReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|source| RecordingError::Open {
            path: path.clone(),
            source,
        })?;
        Ok(Self {
            path,
            lines: BufReader::new(file).lines(),
            line: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Iterator for RecordingReader {
    type Item = Result<RecordedMessage>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(source) => {
                    return Some(Err(RecordingError::Read {
                        path: self.path.clone(),
                        source,
                    }))
                }
            };
            self.line += 1;

            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let line_no = self.line;
            return Some(
                serde_json::from_str(trimmed).map_err(|source| RecordingError::Parse { line: line_no, source }),
            );
        }
    }
}

/// Read a whole recording into memory.
pub fn read_recording(path: impl AsRef<Path>) -> Result<Vec<RecordedMessage>> {
    RecordingReader::open(path)?.collect()
}

/// Writes messages one per line.
pub struct RecordingWriter {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl RecordingWriter {
    /// Create (or truncate) `path`, creating parent directories.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let write_err = |source| RecordingError::Write {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let file = File::create(&path).map_err(write_err)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path,
        })
    }

    pub fn write(&mut self, message: &RecordedMessage) -> Result<()> {
        let encoded = serde_json::to_string(message)?;
        writeln!(self.writer, "{}", encoded).map_err(|source| RecordingError::Write {
            path: self.path.clone(),
            source,
        })
    }

    pub fn finish(mut self) -> Result<()> {
        self.writer.flush().map_err(|source| RecordingError::Write {
            path: self.path.clone(),
            source,
        })
    }
}
