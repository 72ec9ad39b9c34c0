// SPDX-License-Identifier: MPL-2.0

//! Output directory layout and recording file naming

use crate::constants::{layout, recording};
use chrono::{DateTime, Local};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Analysis output kinds, each with its own HLS subdirectory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnalysisKind {
    Motion,
    Face,
    Edge,
    Tracker,
}

impl AnalysisKind {
    pub const ALL: [AnalysisKind; 4] = [
        AnalysisKind::Motion,
        AnalysisKind::Face,
        AnalysisKind::Edge,
        AnalysisKind::Tracker,
    ];

    /// Subdirectory below `hls/`
    pub fn dir_name(&self) -> &'static str {
        match self {
            AnalysisKind::Motion => "motion",
            AnalysisKind::Face => "face",
            AnalysisKind::Edge => "edge",
            AnalysisKind::Tracker => "cvtracker",
        }
    }

    /// Segment file pattern inside the subdirectory
    pub fn segment_pattern(&self) -> &'static str {
        match self {
            AnalysisKind::Motion => "segment%05d.ts",
            AnalysisKind::Face => "face-%05d.ts",
            AnalysisKind::Edge => "edge-%05d.ts",
            AnalysisKind::Tracker => "cvtracker-%05d.ts",
        }
    }
}

/// Paths below the configured output root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn hls_dir(&self) -> PathBuf {
        self.root.join(layout::HLS_DIR)
    }

    pub fn hls_segment_location(&self) -> PathBuf {
        self.hls_dir().join(layout::HLS_SEGMENT)
    }

    pub fn hls_playlist(&self) -> PathBuf {
        self.hls_dir().join(layout::PLAYLIST)
    }

    pub fn analysis_dir(&self, kind: AnalysisKind) -> PathBuf {
        self.hls_dir().join(kind.dir_name())
    }

    pub fn analysis_segment_location(&self, kind: AnalysisKind) -> PathBuf {
        self.analysis_dir(kind).join(kind.segment_pattern())
    }

    pub fn analysis_playlist(&self, kind: AnalysisKind) -> PathBuf {
        self.analysis_dir(kind).join(layout::PLAYLIST)
    }

    /// Data file prefix handed to the motion detector
    pub fn motion_datafile(&self) -> PathBuf {
        self.analysis_dir(AnalysisKind::Motion)
            .join(layout::MOTION_DATAFILE)
    }

    /// File whose modification signals detected motion
    pub fn motion_marker(&self) -> PathBuf {
        self.analysis_dir(AnalysisKind::Motion)
            .join(layout::MOTION_MARKER)
    }

    pub fn mp4_dir(&self) -> PathBuf {
        self.root.join(layout::MP4_DIR)
    }

    pub fn mp4_segment_location(&self) -> PathBuf {
        self.mp4_dir().join(layout::MP4_SEGMENT)
    }

    pub fn dot_dir(&self) -> PathBuf {
        self.root.join(layout::DOT_DIR)
    }

    pub fn transfer_dir(&self) -> PathBuf {
        self.root.join(layout::TRANSFER_DIR)
    }

    /// `root/record/<YYYY-MM-DD>`
    pub fn record_dir(&self, now: &DateTime<Local>) -> PathBuf {
        self.root
            .join(layout::RECORD_DIR)
            .join(now.format(recording::DIR_DATE_FORMAT).to_string())
    }

    /// Create the dated directory and return a fresh path for a new recording
    ///
    /// When the derived name is already taken (two sessions of the same prefix
    /// in the same second) a numeric suffix is appended.
    pub fn prepare_recording_path(
        &self,
        prefix: &str,
        now: &DateTime<Local>,
    ) -> io::Result<PathBuf> {
        let dir = self.record_dir(now);
        ensure_dir(&dir)?;
        let stem = recording_stem(prefix, now);
        let mut path = dir.join(format!("{}.{}", stem, recording::CONTAINER_EXTENSION));
        let mut counter = 1;
        while path.exists() {
            path = dir.join(format!(
                "{}-{}.{}",
                stem,
                counter,
                recording::CONTAINER_EXTENSION
            ));
            counter += 1;
        }
        Ok(path)
    }
}

/// `<prefix>-<YYYY-MM-DD_HH-MM-SS>`
pub fn recording_stem(prefix: &str, now: &DateTime<Local>) -> String {
    format!("{}-{}", prefix, now.format(recording::FILE_TIME_FORMAT))
}

/// Recursively create a directory
pub fn ensure_dir(path: &Path) -> io::Result<()> {
    if !path.is_dir() {
        debug!(path = %path.display(), "Creating directory");
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}
