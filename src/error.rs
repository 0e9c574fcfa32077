use thiserror::Error;

use crate::manifest::ChipFamily;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Connection timed out after {0} seconds")]
    Timeout(u64),

    #[error("Wrong chip: board expects {expected}, detected {detected}")]
    ChipMismatch {
        expected: ChipFamily,
        detected: String,
    },

    #[error("Failed to download {label} from {url}: {reason}")]
    Download {
        label: String,
        url: String,
        reason: DownloadFailure,
    },

    #[error("{first} and {second} overlap in flash")]
    Overlap { first: String, second: String },

    #[error("Flash write failed: {0}")]
    Write(String),

    #[error("Aborted by user")]
    Cancelled,

    #[error("Unknown board: {0}")]
    BoardNotFound(String),

    #[error("Invalid manifest: {0}")]
    Manifest(String),

    #[error("Manifest parse error: {0}")]
    ManifestParse(#[from] ron::error::SpannedError),

    #[error("Serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Configuration(String),
}

/// Why a single firmware part could not be obtained.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DownloadFailure {
    #[error("server answered {code} {reason}")]
    Status { code: u16, reason: String },

    #[error("file not found")]
    NotFound,

    #[error("downloaded file is empty")]
    Empty,

    #[error("downloaded file is suspiciously small ({0} bytes), this might be an HTML error page instead of a binary")]
    TooSmall(usize),

    #[error("checksum mismatch (expected crc32 {expected:#010x}, got {actual:#010x})")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("{0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_error_names_part_and_url() {
        let err = Error::Download {
            label: "Partition Table".into(),
            url: "/firmware/x/partitions.bin".into(),
            reason: DownloadFailure::Status {
                code: 404,
                reason: "Not Found".into(),
            },
        };
        let msg = err.to_string();
        assert!(msg.contains("Partition Table"));
        assert!(msg.contains("/firmware/x/partitions.bin"));
        assert!(msg.contains("404"));
    }
}
