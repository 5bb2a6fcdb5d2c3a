//! Per-file error taxonomy for the apply pipeline.
//!
//! Every variant is contained at the single-file boundary: the engine records
//! the failure in that file's outcome and continues with the rest of the
//! batch. Only the upstream LM call is allowed to abort a whole request, and
//! that propagates as a plain `anyhow` error before any file I/O starts.
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FileError {
    /// The filename is not a member of the allow-list (or contains path
    /// separators / parent-directory segments, which can never match a
    /// canonical registry entry).
    #[error("file '{filename}' is not in the allow-list")]
    AccessDenied { filename: String },

    /// Copying the live file into the backup area failed. The apply of this
    /// file is aborted before the live path is touched.
    #[error("backup of {path} failed: {source}")]
    Backup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The final write to the live path failed.
    #[error("write to {path} failed: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FileError {
    pub fn access_denied(filename: &str) -> Self {
        FileError::AccessDenied {
            filename: filename.to_string(),
        }
    }
}
