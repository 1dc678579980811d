//! Achievement and streak engine.
//!
//! Statistics live in one `user_achievement_states` row per user. Stat
//! mutations run through `apply_*` functions which update the row and
//! return any newly unlocked achievement definitions; unlocks are
//! permanent even when the triggering stat later regresses. Effective
//! entity caps are computed on demand as tier base plus unlocked perks.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgConnection;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::LimitConfig;
use crate::domain::{
    AchievementCategory, AchievementDefinition, PerkType, UserAchievementState, UserTier,
};
use crate::store::{tasks, StoreResult};

const STATE_COLUMNS: &str = "id, user_id, lifetime_tasks_completed, current_streak, \
     longest_streak, last_completion_date, focus_completions, notes_converted, \
     unlocked_achievements, created_at, updated_at";

const DEFINITION_COLUMNS: &str =
    "id, name, description, category, threshold, perk_type, perk_value";

// ── State access ────────────────────────────────────────────────

/// Fetch (or lazily create) the user's achievement state, locking the
/// row for the rest of the transaction.
pub async fn state_for_update(
    conn: &mut PgConnection,
    user_id: Uuid,
) -> StoreResult<UserAchievementState> {
    let existing = sqlx::query_as::<_, UserAchievementState>(&format!(
        "SELECT {STATE_COLUMNS} FROM user_achievement_states
         WHERE user_id = $1 FOR UPDATE"
    ))
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?;
    if let Some(state) = existing {
        return Ok(state);
    }
    let state = sqlx::query_as::<_, UserAchievementState>(&format!(
        "INSERT INTO user_achievement_states (id, user_id)
         VALUES ($1, $2)
         ON CONFLICT (user_id) DO UPDATE SET updated_at = now()
         RETURNING {STATE_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(user_id)
    .fetch_one(conn)
    .await?;
    Ok(state)
}

/// Read-only fetch of the user's achievement state.
pub async fn state(
    conn: &mut PgConnection,
    user_id: Uuid,
) -> StoreResult<Option<UserAchievementState>> {
    let row = sqlx::query_as::<_, UserAchievementState>(&format!(
        "SELECT {STATE_COLUMNS} FROM user_achievement_states WHERE user_id = $1"
    ))
    .bind(user_id)
    .fetch_optional(conn)
    .await?;
    Ok(row)
}

/// All achievement definitions.
pub async fn definitions(conn: &mut PgConnection) -> StoreResult<Vec<AchievementDefinition>> {
    let rows = sqlx::query_as::<_, AchievementDefinition>(&format!(
        "SELECT {DEFINITION_COLUMNS} FROM achievement_definitions ORDER BY category, threshold"
    ))
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

async fn definitions_in_category(
    conn: &mut PgConnection,
    category: AchievementCategory,
) -> StoreResult<Vec<AchievementDefinition>> {
    let rows = sqlx::query_as::<_, AchievementDefinition>(&format!(
        "SELECT {DEFINITION_COLUMNS} FROM achievement_definitions
         WHERE category = $1 ORDER BY threshold"
    ))
    .bind(category)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

// ── Streak arithmetic ───────────────────────────────────────────

/// Pure streak transition for a completion on UTC date `completed_on`.
///
/// Returns the new (current, longest) pair. Same-day repeats are
/// no-ops; a next-day completion extends; a gap restarts at 1.
pub fn advance_streak(
    last_completion: Option<NaiveDate>,
    current: i64,
    longest: i64,
    completed_on: NaiveDate,
) -> (i64, i64) {
    let new_current = match last_completion {
        None => 1,
        Some(last) => {
            let delta = (completed_on - last).num_days();
            if delta <= 0 {
                current
            } else if delta == 1 {
                current + 1
            } else {
                1
            }
        }
    };
    (new_current, longest.max(new_current))
}

// ── Stat mutations ──────────────────────────────────────────────

/// Apply a (non-recovery) task completion: lifetime count, streak, and
/// unlock checks for the tasks and streaks categories.
pub async fn apply_task_completion(
    conn: &mut PgConnection,
    user_id: Uuid,
    completed_on: NaiveDate,
) -> StoreResult<Vec<AchievementDefinition>> {
    let state = state_for_update(&mut *conn, user_id).await?;

    let (current, longest) = advance_streak(
        state.last_completion_date,
        state.current_streak,
        state.longest_streak,
        completed_on,
    );

    sqlx::query(
        "UPDATE user_achievement_states SET
             lifetime_tasks_completed = lifetime_tasks_completed + 1,
             current_streak = $1, longest_streak = $2, last_completion_date = $3,
             updated_at = now()
         WHERE user_id = $4",
    )
    .bind(current)
    .bind(longest)
    .bind(completed_on)
    .bind(user_id)
    .execute(&mut *conn)
    .await?;

    check_unlocks(
        conn,
        user_id,
        &[AchievementCategory::Tasks, AchievementCategory::Streaks],
    )
    .await
}

/// Apply a note-to-task conversion.
pub async fn apply_note_converted(
    conn: &mut PgConnection,
    user_id: Uuid,
) -> StoreResult<Vec<AchievementDefinition>> {
    state_for_update(&mut *conn, user_id).await?;
    sqlx::query(
        "UPDATE user_achievement_states SET
             notes_converted = notes_converted + 1, updated_at = now()
         WHERE user_id = $1",
    )
    .bind(user_id)
    .execute(&mut *conn)
    .await?;
    check_unlocks(conn, user_id, &[AchievementCategory::Notes]).await
}

/// Apply a counted focus completion (cumulative focus reached half of the
/// task's estimate).
pub async fn apply_focus_completion(
    conn: &mut PgConnection,
    user_id: Uuid,
) -> StoreResult<Vec<AchievementDefinition>> {
    state_for_update(&mut *conn, user_id).await?;
    sqlx::query(
        "UPDATE user_achievement_states SET
             focus_completions = focus_completions + 1, updated_at = now()
         WHERE user_id = $1",
    )
    .bind(user_id)
    .execute(&mut *conn)
    .await?;
    check_unlocks(conn, user_id, &[AchievementCategory::Focus]).await
}

/// Scan the affected categories for not-yet-unlocked achievements whose
/// threshold the current stats meet; add them to the unlocked set and
/// return their definitions.
async fn check_unlocks(
    conn: &mut PgConnection,
    user_id: Uuid,
    categories: &[AchievementCategory],
) -> StoreResult<Vec<AchievementDefinition>> {
    let state = sqlx::query_as::<_, UserAchievementState>(&format!(
        "SELECT {STATE_COLUMNS} FROM user_achievement_states WHERE user_id = $1"
    ))
    .bind(user_id)
    .fetch_one(&mut *conn)
    .await?;

    let mut newly_unlocked = Vec::new();
    for category in categories {
        let stat = state.stat_for(*category);
        for definition in definitions_in_category(&mut *conn, *category).await? {
            if stat >= definition.threshold && !state.has_achievement(&definition.id) {
                sqlx::query(
                    "UPDATE user_achievement_states SET
                         unlocked_achievements = unlocked_achievements || to_jsonb($1::text),
                         updated_at = now()
                     WHERE user_id = $2",
                )
                .bind(&definition.id)
                .bind(user_id)
                .execute(&mut *conn)
                .await?;
                info!(user_id = %user_id, achievement = %definition.id, "achievement unlocked");
                newly_unlocked.push(definition);
            }
        }
    }
    Ok(newly_unlocked)
}

// ── Effective limits ────────────────────────────────────────────

/// Tier base caps plus unlocked perks.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct EffectiveLimits {
    /// Active task cap.
    pub max_tasks: i64,
    /// Note cap.
    pub max_notes: i64,
    /// Subtasks-per-task cap (no perk applies).
    pub max_subtasks: i64,
    /// Description length cap.
    pub max_description: usize,
    /// Extra daily credits from streak perks.
    pub daily_credit_bonus: i64,
}

/// Compute effective limits for a user: `base[tier] + Σ perks` over the
/// unlocked achievement set.
pub async fn effective_limits(
    conn: &mut PgConnection,
    user_id: Uuid,
    tier: UserTier,
    config: &LimitConfig,
) -> StoreResult<EffectiveLimits> {
    let (base_tasks, base_notes, base_subtasks, max_description) = match tier {
        UserTier::Free => (
            config.free_max_tasks,
            config.free_max_notes,
            config.free_max_subtasks,
            config.free_max_description,
        ),
        UserTier::Pro => (
            config.pro_max_tasks,
            config.pro_max_notes,
            config.pro_max_subtasks,
            config.pro_max_description,
        ),
    };

    let mut limits = EffectiveLimits {
        max_tasks: base_tasks,
        max_notes: base_notes,
        max_subtasks: base_subtasks,
        max_description,
        daily_credit_bonus: 0,
    };

    let Some(state) = state(&mut *conn, user_id).await? else {
        return Ok(limits);
    };
    if state.unlocked_achievements.0.is_empty() {
        return Ok(limits);
    }

    for definition in definitions(&mut *conn).await? {
        if !state.has_achievement(&definition.id) {
            continue;
        }
        let (Some(perk_type), Some(value)) = (definition.perk_type, definition.perk_value) else {
            continue;
        };
        match perk_type {
            PerkType::MaxTasks => limits.max_tasks += value,
            PerkType::MaxNotes => limits.max_notes += value,
            PerkType::DailyCredits => limits.daily_credit_bonus += value,
        }
    }

    Ok(limits)
}

// ── Nightly sweep ───────────────────────────────────────────────

/// Outcome of the nightly streak job.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreakSweep {
    /// States examined.
    pub users_processed: u64,
    /// Streaks reset to zero.
    pub streaks_reset: u64,
}

/// Reset `current_streak` for every user who did not complete a task
/// yesterday (UTC). The nightly job is the authority for resets; the
/// per-completion path handles increments.
pub async fn nightly_streak_reset(
    conn: &mut PgConnection,
    now: DateTime<Utc>,
) -> StoreResult<StreakSweep> {
    let yesterday = now.date_naive() - chrono::Duration::days(1);

    let states = sqlx::query_as::<_, UserAchievementState>(&format!(
        "SELECT {STATE_COLUMNS} FROM user_achievement_states WHERE current_streak > 0"
    ))
    .fetch_all(&mut *conn)
    .await?;

    let mut sweep = StreakSweep::default();
    for state in states {
        sweep.users_processed += 1;

        // Completed yesterday or today: streak intact.
        if let Some(last) = state.last_completion_date {
            if last >= yesterday {
                continue;
            }
        }
        // Double-check the task table; the state row can lag behind.
        if tasks::completed_on_date(&mut *conn, state.user_id, yesterday).await? {
            continue;
        }

        sqlx::query(
            "UPDATE user_achievement_states SET current_streak = 0, updated_at = now()
             WHERE user_id = $1",
        )
        .bind(state.user_id)
        .execute(&mut *conn)
        .await?;
        sweep.streaks_reset += 1;
        debug!(user_id = %state.user_id, was = state.current_streak, "streak reset");
    }

    Ok(sweep)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("date")
    }

    #[test]
    fn test_first_completion_starts_streak() {
        assert_eq!(advance_streak(None, 0, 0, date(2026, 3, 4)), (1, 1));
    }

    #[test]
    fn test_same_day_completion_is_noop() {
        assert_eq!(
            advance_streak(Some(date(2026, 3, 4)), 1, 1, date(2026, 3, 4)),
            (1, 1)
        );
    }

    #[test]
    fn test_next_day_extends_streak() {
        assert_eq!(
            advance_streak(Some(date(2026, 3, 4)), 1, 1, date(2026, 3, 5)),
            (2, 2)
        );
    }

    #[test]
    fn test_gap_restarts_streak() {
        assert_eq!(
            advance_streak(Some(date(2026, 3, 4)), 5, 9, date(2026, 3, 7)),
            (1, 9)
        );
    }

    #[test]
    fn test_longest_streak_is_monotonic() {
        let (current, longest) = advance_streak(Some(date(2026, 3, 4)), 9, 9, date(2026, 3, 5));
        assert_eq!(current, 10);
        assert_eq!(longest, 10);
    }

    #[test]
    fn test_out_of_order_date_does_not_regress() {
        // A backfilled completion dated before the last one leaves the
        // streak alone.
        assert_eq!(
            advance_streak(Some(date(2026, 3, 4)), 3, 5, date(2026, 3, 2)),
            (3, 5)
        );
    }
}
