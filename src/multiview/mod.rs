//! Multiview composition.
//!
//! Combines up to four independently resolved streams into one synthetic
//! HLS feed by driving an external ffmpeg process. [`invocation`] turns a
//! [`MultiviewSpec`] into an argument list as pure data; [`process`] owns
//! the encoder process lifecycle.

pub mod invocation;
pub mod process;

pub use invocation::{build_invocation, EncoderInvocation};
pub use process::{Composer, ComposerState};

use std::path::PathBuf;

use crate::error::{GatewayError, Result};

pub const MAX_STREAMS: usize = 4;

/// One multiview composition request.
#[derive(Debug, Clone, Default)]
pub struct MultiviewSpec {
    /// Stream URLs, laid out in a grid in order (1 to 4).
    pub streams: Vec<String>,
    /// Per-stream audio sync in seconds; positive delays, negative trims.
    pub sync: Vec<f64>,
    /// Keep every segment on disk instead of a bounded window.
    pub dvr: bool,
    /// Encode as fast as the inputs allow instead of realtime.
    pub faster: bool,
    /// Alternate audio source mapped as an extra track.
    pub audio_url: Option<String>,
    /// Seek applied to the alternate audio input, seconds.
    pub audio_url_seek: f64,
}

impl MultiviewSpec {
    pub fn validate(&self) -> Result<()> {
        if self.streams.is_empty() || self.streams.len() > MAX_STREAMS {
            return Err(GatewayError::Malformed(format!(
                "multiview takes 1 to {} streams, got {}",
                MAX_STREAMS,
                self.streams.len()
            )));
        }
        Ok(())
    }

    /// Sync value for stream `i`, defaulting to zero when not supplied.
    pub fn sync_for(&self, i: usize) -> f64 {
        self.sync.get(i).copied().unwrap_or(0.0)
    }
}

/// Fixed composer configuration, derived from the CLI flags.
#[derive(Debug, Clone)]
pub struct MultiviewConfig {
    pub ffmpeg_path: String,
    pub out_dir: PathBuf,
    pub playlist_name: String,
}
