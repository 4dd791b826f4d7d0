use crate::error::{PartioError, Result};
use chrono::{DateTime, Utc};
use std::time::Duration;

pub const DEFAULT_PART_COUNT: usize = 6;
pub const DEFAULT_DANGLING_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Knobs for the upload workflows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadConfig {
    /// Number of parts every upload is split into
    pub part_count: usize,
    /// Age after which an in-progress part condemns its upload
    pub dangling_ttl: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            part_count: DEFAULT_PART_COUNT,
            dangling_ttl: DEFAULT_DANGLING_TTL,
        }
    }
}

impl UploadConfig {
    pub fn validate(&self) -> Result<()> {
        if self.part_count == 0 {
            return Err(PartioError::Config(
                "part_count must be at least 1".to_string(),
            ));
        }

        if u32::try_from(self.part_count).is_err() {
            return Err(PartioError::Config(format!(
                "part_count {} is too large",
                self.part_count
            )));
        }

        self.dangling_cutoff(Utc::now())?;
        Ok(())
    }

    /// Creation time before which an in-progress part counts as dangling.
    pub fn dangling_cutoff(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let ttl = chrono::Duration::from_std(self.dangling_ttl).map_err(|error| {
            PartioError::Config(format!("dangling_ttl out of range: {}", error))
        })?;

        now.checked_sub_signed(ttl).ok_or_else(|| {
            PartioError::Config(format!(
                "dangling_ttl of {}s reaches before the earliest representable time",
                self.dangling_ttl.as_secs()
            ))
        })
    }
}
