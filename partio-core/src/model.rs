use crate::error::{PartioError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Lifecycle state shared by uploads and parts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    InProgress,
    Done,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferStatus {
    type Err = PartioError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "in_progress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            other => Err(PartioError::Validation(format!(
                "unknown transfer status: {}",
                other
            ))),
        }
    }
}

/// A single logical file submission spanning N parts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Upload {
    pub id: Ulid,
    pub name: String,
    pub size: u64,
    pub status: TransferStatus,
    pub created_at: DateTime<Utc>,
}

/// One contiguous byte range of an upload, stored on exactly one backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    pub id: Ulid,
    pub upload_id: Ulid,
    pub backend: String,
    pub number: u32,
    pub size: u64,
    pub status: TransferStatus,
    pub created_at: DateTime<Utc>,
}

pub fn parse_upload_id(value: &str) -> Result<Ulid> {
    Ulid::from_string(value.trim())
        .map_err(|error| PartioError::Validation(format!("invalid upload id '{}': {}", value, error)))
}
