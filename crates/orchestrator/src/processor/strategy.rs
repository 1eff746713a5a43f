//! Per-directory submission strategies.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use dirsubmit_core::{ActionRequest, BusinessProfile, Directory, Submission, SubmissionMode};

/// Action type written for every job a human has to finish.
pub const MANUAL_SUBMISSION: &str = "manual_submission";

/// Error reported by a directory integration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntegrationError {
    /// The integration exists but cannot submit automatically (yet).
    #[error("automated submission not implemented")]
    NotImplemented,
    #[error("directory rejected submission: {0}")]
    Rejected(String),
    #[error("directory request failed: {0}")]
    Transport(String),
}

/// Result of a successful automated submission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrationReceipt {
    pub listing_url: Option<String>,
}

/// Automated submission to one directory.
#[async_trait]
pub trait DirectoryIntegration: Send + Sync {
    async fn submit(
        &self,
        submission: &Submission,
        directory: &Directory,
        profile: &BusinessProfile,
    ) -> Result<IntegrationReceipt, IntegrationError>;
}

/// Integrations keyed by directory slug.
#[derive(Clone, Default)]
pub struct IntegrationRegistry {
    integrations: HashMap<String, Arc<dyn DirectoryIntegration>>,
}

impl IntegrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        slug: impl Into<String>,
        integration: Arc<dyn DirectoryIntegration>,
    ) -> &mut Self {
        self.integrations.insert(slug.into(), integration);
        self
    }

    pub fn get(&self, slug: &str) -> Option<&Arc<dyn DirectoryIntegration>> {
        self.integrations.get(slug)
    }
}

impl core::fmt::Debug for IntegrationRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut slugs: Vec<&String> = self.integrations.keys().collect();
        slugs.sort();
        f.debug_struct("IntegrationRegistry")
            .field("slugs", &slugs)
            .finish()
    }
}

/// What an attempt asks the store to record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Submitted { listing_url: Option<String> },
    ActionNeeded(ActionRequest),
}

/// How a directory is submitted to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SubmissionStrategy {
    Api,
    Manual,
}

impl SubmissionStrategy {
    pub fn for_directory(directory: &Directory) -> Self {
        match directory.submission_mode {
            SubmissionMode::Api => SubmissionStrategy::Api,
            SubmissionMode::Manual => SubmissionStrategy::Manual,
        }
    }

    /// Run one attempt. Only integration errors other than
    /// [`IntegrationError::NotImplemented`] are returned as errors.
    pub async fn attempt(
        &self,
        registry: &IntegrationRegistry,
        submission: &Submission,
        directory: &Directory,
        profile: &BusinessProfile,
    ) -> Result<Outcome, IntegrationError> {
        match self {
            SubmissionStrategy::Manual => Ok(Outcome::ActionNeeded(manual_action(directory, profile))),
            SubmissionStrategy::Api => {
                let Some(integration) = registry.get(&directory.slug) else {
                    return Ok(Outcome::ActionNeeded(api_fallback_action(directory, profile)));
                };
                match integration.submit(submission, directory, profile).await {
                    Ok(receipt) => Ok(Outcome::Submitted {
                        listing_url: receipt.listing_url,
                    }),
                    Err(IntegrationError::NotImplemented) => {
                        Ok(Outcome::ActionNeeded(api_fallback_action(directory, profile)))
                    }
                    Err(err) => Err(err),
                }
            }
        }
    }
}

fn manual_action(directory: &Directory, profile: &BusinessProfile) -> ActionRequest {
    ActionRequest {
        action_type: MANUAL_SUBMISSION.to_string(),
        instructions: format!(
            "Submit {} to {} using the directory's listing form.",
            profile.business_name, directory.name
        ),
        url: directory.public_url.clone(),
    }
}

fn api_fallback_action(directory: &Directory, profile: &BusinessProfile) -> ActionRequest {
    ActionRequest {
        action_type: MANUAL_SUBMISSION.to_string(),
        instructions: format!(
            "Automated submission to {} is unavailable. Submit {} manually.",
            directory.name, profile.business_name
        ),
        url: directory.public_url.clone(),
    }
}
