//! Downloaded attachment data structures

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// An attachment written into the served directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadedFile {
    /// Name on disk, which differs from `original_filename` after a collision
    pub filename: String,

    /// Filename declared by the message
    pub original_filename: String,

    /// Absolute local path
    pub path: PathBuf,

    /// Bytes written
    pub size: u64,

    /// MIME type declared by the message
    pub mime_type: String,

    /// Link served by the delivery server
    pub download_link: String,
}

impl DownloadedFile {
    /// Get human-readable size
    pub fn size_human(&self) -> String {
        const KB: u64 = 1024;
        const MB: u64 = KB * 1024;
        const GB: u64 = MB * 1024;

        if self.size >= GB {
            format!("{:.1} GB", self.size as f64 / GB as f64)
        } else if self.size >= MB {
            format!("{:.1} MB", self.size as f64 / MB as f64)
        } else if self.size >= KB {
            format!("{:.1} KB", self.size as f64 / KB as f64)
        } else {
            format!("{} bytes", self.size)
        }
    }
}

/// An attachment that could not be fetched or written
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchFailure {
    pub filename: String,
    pub error: String,
}

/// Outcome of downloading every attachment of one message
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchReport {
    pub email_id: String,
    pub downloaded: Vec<DownloadedFile>,
    pub failures: Vec<FetchFailure>,
}

impl FetchReport {
    pub fn total(&self) -> usize {
        self.downloaded.len() + self.failures.len()
    }

    /// True when some, but not all, attachments failed
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty() && !self.downloaded.is_empty()
    }
}
