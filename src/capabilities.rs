//! Optional external tools, probed once and handed to whatever needs them.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use log::{debug, warn};

use crate::{Result, SolarViewerError};

/// environment variable naming the ffmpeg executable to use
pub const FFMPEG_ENV: &str = "SOLARVIEWER_FFMPEG";

/// What the running system can do beyond reading FITS files.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// ffmpeg executable used for MP4 and AVI output
    pub ffmpeg: Option<PathBuf>,
    /// whether CASA image directories can be read
    pub casa: bool,
}

fn runs(program: &Path) -> bool {
    Command::new(program)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

impl Capabilities {
    /// nothing optional available
    pub fn none() -> Self {
        Self::default()
    }

    /// probe the system, warning when ffmpeg is missing
    pub fn detect() -> Self {
        let candidate = std::env::var_os(FFMPEG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("ffmpeg"));
        let ffmpeg = if runs(&candidate) {
            debug!("using {}", candidate.display());
            Some(candidate)
        } else {
            warn!("ffmpeg not found, MP4 and AVI output disabled (GIF still available)");
            None
        };
        // no CASA table reader is linked into this build
        debug!("CASA image directories are not supported, convert them to FITS first");
        Self { ffmpeg, casa: false }
    }

    pub fn with_ffmpeg<P: Into<PathBuf>>(mut self, program: P) -> Self {
        self.ffmpeg = Some(program.into());
        self
    }

    pub fn require_ffmpeg(&self) -> Result<&Path> {
        self.ffmpeg.as_deref().ok_or(SolarViewerError::MissingDependency(
            "ffmpeg is required to write MP4/AVI video".to_string(),
        ))
    }

    pub fn require_casa(&self) -> Result<()> {
        if self.casa {
            Ok(())
        } else {
            Err(SolarViewerError::MissingDependency(
                "reading CASA images requires casatools, which is not available".to_string(),
            ))
        }
    }
}
