//! Forward-only database migrations.
//!
//! Migrations are embedded SQL steps applied in sequence at startup and
//! tracked in a `schema_migrations` ledger table. There is no down path:
//! recovery from a bad migration is a restore, not a rollback.

use sqlx::PgPool;
use tracing::info;

use crate::domain::achievement::{AchievementCategory, PerkType};

/// One migration step. `version` values must be unique and ascending.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_users_tasks",
        sql: r#"
CREATE TYPE user_tier AS ENUM ('free', 'pro');
CREATE TYPE task_priority AS ENUM ('low', 'medium', 'high');
CREATE TYPE completed_by AS ENUM ('manual', 'auto', 'force');
CREATE TYPE subtask_source AS ENUM ('user', 'ai');

CREATE TABLE users (
    id UUID PRIMARY KEY,
    google_sub TEXT NOT NULL UNIQUE,
    email TEXT NOT NULL UNIQUE,
    display_name TEXT NOT NULL,
    avatar_url TEXT,
    timezone TEXT NOT NULL DEFAULT 'UTC',
    tier user_tier NOT NULL DEFAULT 'free',
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE task_templates (
    id UUID PRIMARY KEY,
    user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    title TEXT NOT NULL,
    description TEXT,
    priority task_priority NOT NULL DEFAULT 'medium',
    recurrence TEXT NOT NULL,
    next_due TIMESTAMPTZ,
    active BOOLEAN NOT NULL DEFAULT TRUE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE task_instances (
    id UUID PRIMARY KEY,
    user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    title TEXT NOT NULL,
    description TEXT,
    priority task_priority NOT NULL DEFAULT 'medium',
    due_date TIMESTAMPTZ,
    estimated_minutes INTEGER,
    focus_seconds BIGINT NOT NULL DEFAULT 0,
    completed BOOLEAN NOT NULL DEFAULT FALSE,
    completed_at TIMESTAMPTZ,
    completed_by completed_by,
    hidden BOOLEAN NOT NULL DEFAULT FALSE,
    archived BOOLEAN NOT NULL DEFAULT FALSE,
    template_id UUID REFERENCES task_templates(id) ON DELETE SET NULL,
    version INTEGER NOT NULL DEFAULT 1,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE subtasks (
    id UUID PRIMARY KEY,
    task_id UUID NOT NULL REFERENCES task_instances(id) ON DELETE CASCADE,
    title TEXT NOT NULL,
    completed BOOLEAN NOT NULL DEFAULT FALSE,
    completed_at TIMESTAMPTZ,
    order_index INTEGER NOT NULL,
    source subtask_source NOT NULL DEFAULT 'user',
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
"#,
    },
    Migration {
        version: 2,
        name: "notes_reminders",
        sql: r#"
CREATE TYPE transcription_status AS ENUM ('pending', 'completed', 'failed');
CREATE TYPE reminder_type AS ENUM ('before', 'after', 'absolute');
CREATE TYPE reminder_method AS ENUM ('push', 'in_app');

CREATE TABLE notes (
    id UUID PRIMARY KEY,
    user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    content TEXT NOT NULL,
    voice_url TEXT,
    voice_duration_seconds INTEGER,
    transcription_status transcription_status,
    archived BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE reminders (
    id UUID PRIMARY KEY,
    task_id UUID NOT NULL REFERENCES task_instances(id) ON DELETE CASCADE,
    user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    reminder_type reminder_type NOT NULL,
    offset_minutes INTEGER,
    scheduled_at TIMESTAMPTZ NOT NULL,
    method reminder_method NOT NULL,
    fired BOOLEAN NOT NULL DEFAULT FALSE,
    fired_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
"#,
    },
    Migration {
        version: 3,
        name: "achievements",
        sql: r#"
CREATE TYPE achievement_category AS ENUM ('tasks', 'streaks', 'focus', 'notes');
CREATE TYPE perk_type AS ENUM ('max_tasks', 'max_notes', 'daily_credits');

CREATE TABLE achievement_definitions (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT NOT NULL,
    category achievement_category NOT NULL,
    threshold BIGINT NOT NULL,
    perk_type perk_type,
    perk_value BIGINT
);

CREATE TABLE user_achievement_states (
    id UUID PRIMARY KEY,
    user_id UUID NOT NULL UNIQUE REFERENCES users(id) ON DELETE CASCADE,
    lifetime_tasks_completed BIGINT NOT NULL DEFAULT 0,
    current_streak BIGINT NOT NULL DEFAULT 0,
    longest_streak BIGINT NOT NULL DEFAULT 0,
    last_completion_date DATE,
    focus_completions BIGINT NOT NULL DEFAULT 0,
    notes_converted BIGINT NOT NULL DEFAULT 0,
    unlocked_achievements JSONB NOT NULL DEFAULT '[]',
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
"#,
    },
    Migration {
        version: 4,
        name: "credits_subscriptions",
        sql: r#"
CREATE TYPE credit_type AS ENUM ('kickstart', 'daily', 'subscription', 'purchased');
CREATE TYPE credit_operation AS ENUM ('grant', 'consume', 'expire', 'carryover');
CREATE TYPE subscription_status AS ENUM ('active', 'past_due', 'grace', 'cancelled', 'expired');

CREATE TABLE ai_credit_ledger (
    id UUID PRIMARY KEY,
    user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    credit_type credit_type NOT NULL,
    operation credit_operation NOT NULL,
    amount BIGINT NOT NULL,
    balance_after BIGINT NOT NULL,
    consumed BIGINT NOT NULL DEFAULT 0,
    operation_ref TEXT,
    expires_at TIMESTAMPTZ,
    expired BOOLEAN NOT NULL DEFAULT FALSE,
    source_id UUID,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE subscriptions (
    id UUID PRIMARY KEY,
    user_id UUID NOT NULL UNIQUE REFERENCES users(id) ON DELETE CASCADE,
    checkout_subscription_id TEXT NOT NULL UNIQUE,
    status subscription_status NOT NULL,
    current_period_start TIMESTAMPTZ NOT NULL,
    current_period_end TIMESTAMPTZ NOT NULL,
    grace_period_end TIMESTAMPTZ,
    grace_warning_sent BOOLEAN NOT NULL DEFAULT FALSE,
    failed_payment_count INTEGER NOT NULL DEFAULT 0,
    last_payment_at TIMESTAMPTZ,
    cancelled_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE webhook_events (
    event_id TEXT PRIMARY KEY,
    event_type TEXT NOT NULL,
    processed_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
"#,
    },
    Migration {
        version: 5,
        name: "activity_tombstones",
        sql: r#"
CREATE TYPE activity_source AS ENUM ('user', 'ai', 'system');

CREATE TABLE activity_log (
    id UUID PRIMARY KEY,
    user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    entity_type TEXT NOT NULL,
    entity_id UUID,
    action TEXT NOT NULL,
    source activity_source NOT NULL,
    extra JSONB,
    request_id UUID,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE deletion_tombstones (
    id UUID PRIMARY KEY,
    user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    entity_type TEXT NOT NULL,
    entity_id UUID NOT NULL,
    payload JSONB NOT NULL,
    deleted_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
"#,
    },
    Migration {
        version: 6,
        name: "notifications_push",
        sql: r#"
CREATE TYPE notification_type AS ENUM ('reminder', 'subscription', 'achievement', 'system');

CREATE TABLE notifications (
    id UUID PRIMARY KEY,
    user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    notification_type notification_type NOT NULL,
    title TEXT NOT NULL,
    body TEXT NOT NULL,
    action_url TEXT,
    read BOOLEAN NOT NULL DEFAULT FALSE,
    read_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE push_subscriptions (
    id UUID PRIMARY KEY,
    user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    endpoint TEXT NOT NULL UNIQUE,
    p256dh_key TEXT NOT NULL,
    auth_key TEXT NOT NULL,
    active BOOLEAN NOT NULL DEFAULT TRUE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
"#,
    },
    Migration {
        version: 7,
        name: "job_queue",
        sql: r#"
CREATE TYPE job_status AS ENUM ('pending', 'processing', 'completed', 'failed', 'dead');
CREATE TYPE job_type AS ENUM (
    'reminder_fire', 'streak_calculate', 'credit_expire',
    'subscription_check', 'recurring_task_generate', 'activity_cleanup'
);

CREATE TABLE job_queue (
    id UUID PRIMARY KEY,
    job_type job_type NOT NULL,
    payload JSONB NOT NULL DEFAULT '{}',
    status job_status NOT NULL DEFAULT 'pending',
    scheduled_at TIMESTAMPTZ NOT NULL,
    started_at TIMESTAMPTZ,
    completed_at TIMESTAMPTZ,
    attempts INTEGER NOT NULL DEFAULT 0,
    max_attempts INTEGER NOT NULL DEFAULT 3,
    last_error TEXT,
    locked_at TIMESTAMPTZ,
    locked_by TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
"#,
    },
    Migration {
        version: 8,
        name: "auth_idempotency_focus",
        sql: r#"
CREATE TABLE refresh_tokens (
    id UUID PRIMARY KEY,
    user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    token_hash TEXT NOT NULL UNIQUE,
    expires_at TIMESTAMPTZ NOT NULL,
    revoked_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE idempotency_keys (
    id UUID PRIMARY KEY,
    key TEXT NOT NULL,
    user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    request_path TEXT NOT NULL,
    request_method TEXT NOT NULL,
    request_hash TEXT NOT NULL,
    response_status INTEGER NOT NULL,
    response_body JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    expires_at TIMESTAMPTZ NOT NULL,
    UNIQUE (key, user_id)
);

CREATE TABLE focus_sessions (
    id UUID PRIMARY KEY,
    user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    task_id UUID NOT NULL REFERENCES task_instances(id) ON DELETE CASCADE,
    started_at TIMESTAMPTZ NOT NULL,
    ended_at TIMESTAMPTZ,
    duration_seconds BIGINT
);
"#,
    },
    Migration {
        version: 9,
        name: "indexes",
        sql: r#"
CREATE INDEX idx_tasks_user_active
    ON task_instances (user_id, created_at DESC)
    WHERE hidden = FALSE AND archived = FALSE;
CREATE INDEX idx_tasks_template ON task_instances (template_id)
    WHERE template_id IS NOT NULL;
CREATE INDEX idx_subtasks_task ON subtasks (task_id, order_index);
CREATE INDEX idx_notes_user ON notes (user_id) WHERE archived = FALSE;
CREATE INDEX idx_reminders_pending ON reminders (scheduled_at)
    WHERE fired = FALSE;
CREATE INDEX idx_reminders_task ON reminders (task_id);
CREATE INDEX idx_credits_user_active
    ON ai_credit_ledger (user_id, created_at)
    WHERE operation = 'grant' AND expired = FALSE;
CREATE INDEX idx_activity_user_time ON activity_log (user_id, created_at DESC);
CREATE INDEX idx_activity_retention ON activity_log (created_at);
CREATE INDEX idx_tombstones_user ON deletion_tombstones (user_id, deleted_at);
CREATE INDEX idx_notifications_user_unread ON notifications (user_id, created_at DESC)
    WHERE read = FALSE;
CREATE INDEX idx_jobs_claimable ON job_queue (scheduled_at)
    WHERE status = 'pending';
CREATE INDEX idx_idempotency_expiry ON idempotency_keys (expires_at);
CREATE INDEX idx_focus_open ON focus_sessions (user_id, task_id)
    WHERE ended_at IS NULL;
"#,
    },
];

/// Apply all pending migrations, then seed static data.
///
/// Each step runs in its own transaction together with its ledger insert,
/// so a failed step leaves the ledger consistent with the schema.
pub async fn run(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
             version BIGINT PRIMARY KEY,
             name TEXT NOT NULL,
             applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
         )",
    )
    .execute(pool)
    .await?;

    let applied: Vec<(i64,)> = sqlx::query_as("SELECT version FROM schema_migrations")
        .fetch_all(pool)
        .await?;
    let applied: std::collections::HashSet<i64> = applied.into_iter().map(|(v,)| v).collect();

    for migration in MIGRATIONS {
        if applied.contains(&migration.version) {
            continue;
        }
        let mut tx = pool.begin().await?;
        // Raw multi-statement execution: each step is a batch of DDL.
        sqlx::raw_sql(migration.sql).execute(&mut *tx).await?;
        sqlx::query("INSERT INTO schema_migrations (version, name) VALUES ($1, $2)")
            .bind(migration.version)
            .bind(migration.name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        info!(
            version = migration.version,
            name = migration.name,
            "applied migration"
        );
    }

    seed_achievements(pool).await?;
    Ok(())
}

/// Seed row for an achievement definition.
struct AchievementSeed {
    id: &'static str,
    name: &'static str,
    description: &'static str,
    category: AchievementCategory,
    threshold: i64,
    perk_type: Option<PerkType>,
    perk_value: Option<i64>,
}

const ACHIEVEMENT_SEED: &[AchievementSeed] = &[
    AchievementSeed {
        id: "tasks_5",
        name: "Task Starter",
        description: "Complete 5 tasks",
        category: AchievementCategory::Tasks,
        threshold: 5,
        perk_type: Some(PerkType::MaxTasks),
        perk_value: Some(15),
    },
    AchievementSeed {
        id: "tasks_25",
        name: "Task Master",
        description: "Complete 25 tasks",
        category: AchievementCategory::Tasks,
        threshold: 25,
        perk_type: Some(PerkType::MaxTasks),
        perk_value: Some(25),
    },
    AchievementSeed {
        id: "tasks_100",
        name: "Centurion",
        description: "Complete 100 tasks",
        category: AchievementCategory::Tasks,
        threshold: 100,
        perk_type: Some(PerkType::MaxTasks),
        perk_value: Some(50),
    },
    AchievementSeed {
        id: "streak_7",
        name: "Week Warrior",
        description: "Maintain a 7-day streak",
        category: AchievementCategory::Streaks,
        threshold: 7,
        perk_type: Some(PerkType::DailyCredits),
        perk_value: Some(2),
    },
    AchievementSeed {
        id: "streak_30",
        name: "Monthly Master",
        description: "Maintain a 30-day streak",
        category: AchievementCategory::Streaks,
        threshold: 30,
        perk_type: Some(PerkType::DailyCredits),
        perk_value: Some(5),
    },
    AchievementSeed {
        id: "focus_10",
        name: "Focus Initiate",
        description: "Complete 10 focus sessions (50%+ of estimated time)",
        category: AchievementCategory::Focus,
        threshold: 10,
        perk_type: Some(PerkType::MaxNotes),
        perk_value: Some(5),
    },
    AchievementSeed {
        id: "notes_10",
        name: "Note Taker",
        description: "Convert 10 notes to tasks",
        category: AchievementCategory::Notes,
        threshold: 10,
        perk_type: Some(PerkType::MaxNotes),
        perk_value: Some(5),
    },
];

/// Upsert the static achievement definitions.
async fn seed_achievements(pool: &PgPool) -> Result<(), sqlx::Error> {
    for seed in ACHIEVEMENT_SEED {
        sqlx::query(
            "INSERT INTO achievement_definitions
                 (id, name, description, category, threshold, perk_type, perk_value)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (id) DO UPDATE SET
                 name = EXCLUDED.name,
                 description = EXCLUDED.description,
                 category = EXCLUDED.category,
                 threshold = EXCLUDED.threshold,
                 perk_type = EXCLUDED.perk_type,
                 perk_value = EXCLUDED.perk_value",
        )
        .bind(seed.id)
        .bind(seed.name)
        .bind(seed.description)
        .bind(seed.category)
        .bind(seed.threshold)
        .bind(seed.perk_type)
        .bind(seed.perk_value)
        .execute(pool)
        .await?;
    }
    info!(count = ACHIEVEMENT_SEED.len(), "achievement definitions seeded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versions_are_unique_and_ascending() {
        let mut prev = 0;
        for m in MIGRATIONS {
            assert!(m.version > prev, "migration {} out of order", m.name);
            prev = m.version;
        }
    }

    #[test]
    fn test_seed_covers_every_category() {
        use AchievementCategory::*;
        for category in [Tasks, Streaks, Focus, Notes] {
            assert!(
                ACHIEVEMENT_SEED.iter().any(|s| s.category == category),
                "no seed for {category:?}"
            );
        }
    }
}
