//! Submission targets.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::id::DirectoryId;

/// How listings reach a directory.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionMode {
    /// An automated integration can submit the listing.
    Api,
    /// A human has to submit the listing.
    #[default]
    Manual,
}

impl SubmissionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionMode::Api => "api",
            SubmissionMode::Manual => "manual",
        }
    }

    /// Parse a stored mode; anything unrecognised is treated as manual.
    pub fn from_stored(value: Option<&str>) -> Self {
        value.and_then(|v| v.parse().ok()).unwrap_or_default()
    }
}

impl fmt::Display for SubmissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubmissionMode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "api" => Ok(SubmissionMode::Api),
            "manual" => Ok(SubmissionMode::Manual),
            other => Err(DomainError::unknown_variant("submission mode", other)),
        }
    }
}

/// A business directory listings are submitted to. Read-only for the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directory {
    pub id: DirectoryId,
    /// Stable key used for rate-limit overrides and integration lookup.
    pub slug: String,
    pub name: String,
    pub public_url: Option<String>,
    pub submission_mode: SubmissionMode,
}

impl Directory {
    pub fn new(slug: impl Into<String>, name: impl Into<String>, mode: SubmissionMode) -> Self {
        Self {
            id: DirectoryId::new(),
            slug: slug.into(),
            name: name.into(),
            public_url: None,
            submission_mode: mode,
        }
    }

    pub fn with_public_url(mut self, url: impl Into<String>) -> Self {
        self.public_url = Some(url.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_modes_fall_back_to_manual() {
        assert_eq!(SubmissionMode::from_stored(Some("api")), SubmissionMode::Api);
        assert_eq!(SubmissionMode::from_stored(Some("fax")), SubmissionMode::Manual);
        assert_eq!(SubmissionMode::from_stored(None), SubmissionMode::Manual);
    }
}
