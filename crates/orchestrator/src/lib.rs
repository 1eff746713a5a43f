//! Orchestration layer: job stores, the submission worker and the reminder pass.

pub mod campaign;
pub mod claim;
pub mod clock;
pub mod config;
pub mod notify;
pub mod processor;
pub mod rate_limit;
pub mod reminders;
pub mod retry;
pub mod store;
pub mod worker;

pub use claim::QueueClaimer;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, WorkerConfig};
pub use notify::{LogMailer, MailError, Mailer, OutboundEmail, RecordingMailer};
pub use processor::{
    DirectoryIntegration, IntegrationError, IntegrationRegistry, JobProcessor, ProcessError,
    ProcessOutcome, SubmissionStrategy,
};
pub use rate_limit::RateLimitPolicy;
pub use reminders::{QuietHoursFallback, ReminderReport, ReminderScheduler};
pub use retry::{RetryDecision, RetryPolicy};
pub use store::{InMemoryStore, JobStore, PostgresStore, ReminderStore, StoreError};
pub use worker::{BatchReport, SubmissionWorker, WorkerError, WorkerHandle, WorkerStats};
