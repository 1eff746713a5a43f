//! `dirsubmit-core`: domain model of the directory submission orchestrator.
//!
//! This crate contains **pure domain** types (no storage, transport or runtime
//! concerns): identifiers, the submission lifecycle, campaign counters and the
//! notification ledger.

pub mod campaign;
pub mod directory;
pub mod error;
pub mod id;
pub mod notification;
pub mod profile;
pub mod submission;

pub use campaign::{CampaignCounter, CampaignRun};
pub use directory::{Directory, SubmissionMode};
pub use error::DomainError;
pub use id::{CampaignRunId, DirectoryId, NotificationEventId, SubmissionId, UserId};
pub use notification::{
    DeliveryStatus, NotificationEvent, NotificationPreferences, NotificationType,
};
pub use profile::BusinessProfile;
pub use submission::{
    ActionRequest, MAX_RETRIES_EXCEEDED, NewSubmission, Submission, SubmissionStatus,
};
