// SPDX-License-Identifier: MPL-2.0

//! Inbound file transfer over a data channel

use super::protocol::FileOffer;
use crate::errors::ProtocolError;
use crate::storage::ensure_dir;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    InProgress { written: u64, remaining: u64 },
    /// The declared size was reached; the file is closed
    Completed(PathBuf),
    /// The transfer had already completed
    Ignored,
}

#[derive(Debug)]
pub struct PendingFileTransfer {
    name: String,
    path: PathBuf,
    declared_size: u64,
    written: u64,
    file: Option<File>,
}

impl PendingFileTransfer {
    /// Create `<dir>/<name>` for an offer
    ///
    /// Only the final path component of the offered name is used.
    pub fn begin(dir: &Path, offer: &FileOffer) -> Result<Self, ProtocolError> {
        let name = sanitize_name(&offer.name)
            .ok_or_else(|| ProtocolError::InvalidFile(format!("unusable file name {:?}", offer.name)))?;
        let declared_size = u64::try_from(offer.size)
            .ok()
            .filter(|size| *size > 0)
            .ok_or_else(|| ProtocolError::InvalidFile(format!("invalid size {}", offer.size)))?;

        ensure_dir(dir)?;
        let path = dir.join(&name);
        let file = File::create(&path)?;
        info!(file = %path.display(), size = declared_size, "Receiving file");

        Ok(Self {
            name,
            path,
            declared_size,
            written: 0,
            file: Some(file),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn declared_size(&self) -> u64 {
        self.declared_size
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    pub fn is_complete(&self) -> bool {
        self.written == self.declared_size
    }

    /// Append a chunk; bytes beyond the declared size are dropped
    pub fn write(&mut self, data: &[u8]) -> io::Result<WriteOutcome> {
        let Some(file) = self.file.as_mut() else {
            return Ok(WriteOutcome::Ignored);
        };

        let remaining = self.declared_size - self.written;
        let take = usize::try_from(remaining).map_or(data.len(), |r| r.min(data.len()));
        if take < data.len() {
            warn!(
                file = %self.name,
                surplus = data.len() - take,
                "Chunk exceeds declared size, truncating"
            );
        }

        file.write_all(&data[..take])?;
        self.written += take as u64;

        if self.written == self.declared_size {
            file.flush()?;
            self.file = None;
            info!(file = %self.path.display(), bytes = self.written, "File received");
            return Ok(WriteOutcome::Completed(self.path.clone()));
        }

        Ok(WriteOutcome::InProgress {
            written: self.written,
            remaining: self.declared_size - self.written,
        })
    }

    /// Drop an incomplete transfer and delete what was written
    pub fn abandon(mut self) {
        if self.file.take().is_none() {
            return;
        }
        debug!(file = %self.path.display(), written = self.written, "Abandoning transfer");
        if let Err(err) = std::fs::remove_file(&self.path) {
            debug!(error = %err, "Failed to remove partial file");
        }
    }
}

fn sanitize_name(name: &str) -> Option<String> {
    let component = Path::new(name).file_name()?.to_str()?;
    (!component.is_empty() && component != "..").then(|| component.to_string())
}
