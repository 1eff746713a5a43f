//! Postgres schema used by [`super::PostgresStore`].
//!
//! Statements are idempotent and run in order by `PostgresStore::ensure_schema`.

pub(crate) const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS directories (
        id UUID PRIMARY KEY,
        slug TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        public_url TEXT,
        submission_mode TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS business_profiles (
        user_id UUID PRIMARY KEY,
        business_name TEXT NOT NULL,
        website TEXT,
        email TEXT,
        phone TEXT,
        address TEXT,
        description TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS notification_preferences (
        user_id UUID PRIMARY KEY,
        email TEXT NOT NULL,
        display_name TEXT,
        reminders_enabled BOOLEAN NOT NULL DEFAULT TRUE,
        quiet_hours_start TEXT,
        quiet_hours_end TEXT,
        timezone TEXT NOT NULL DEFAULT 'UTC'
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS campaign_runs (
        id UUID PRIMARY KEY,
        user_id UUID NOT NULL,
        directories_total BIGINT NOT NULL DEFAULT 0,
        directories_queued BIGINT NOT NULL DEFAULT 0,
        directories_in_progress BIGINT NOT NULL DEFAULT 0,
        directories_action_needed BIGINT NOT NULL DEFAULT 0,
        directories_submitted BIGINT NOT NULL DEFAULT 0,
        directories_failed BIGINT NOT NULL DEFAULT 0,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS submissions (
        id UUID PRIMARY KEY,
        user_id UUID NOT NULL,
        directory_id UUID NOT NULL REFERENCES directories (id),
        campaign_run_id UUID REFERENCES campaign_runs (id),
        status TEXT NOT NULL,
        retry_count INTEGER NOT NULL DEFAULT 0 CHECK (retry_count >= 0),
        queue_position INTEGER NOT NULL DEFAULT 0,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL,
        started_at TIMESTAMPTZ,
        action_type TEXT,
        action_instructions TEXT,
        action_url TEXT,
        action_deadline TIMESTAMPTZ,
        action_required_at TIMESTAMPTZ,
        submitted_at TIMESTAMPTZ,
        listing_url TEXT,
        error_message TEXT,
        error_code TEXT,
        failed_at TIMESTAMPTZ,
        blocked_at TIMESTAMPTZ,
        blocked_reason TEXT
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS submissions_claim_idx
        ON submissions (queue_position, created_at)
        WHERE status = 'queued'
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS submissions_rate_idx
        ON submissions (directory_id, started_at)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS submissions_deadline_idx
        ON submissions (action_deadline)
        WHERE action_deadline IS NOT NULL
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS notification_events (
        id UUID PRIMARY KEY,
        user_id UUID NOT NULL,
        submission_id UUID NOT NULL,
        notification_type TEXT NOT NULL,
        channel TEXT NOT NULL,
        status TEXT NOT NULL,
        error_message TEXT,
        created_at TIMESTAMPTZ NOT NULL,
        UNIQUE (user_id, submission_id, notification_type)
    )
    "#,
];
