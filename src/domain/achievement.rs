//! Achievement definitions and per-user progress state.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Which statistic an achievement tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "achievement_category", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AchievementCategory {
    /// Lifetime task completions.
    Tasks,
    /// Current streak length.
    Streaks,
    /// Focus session completions.
    Focus,
    /// Notes converted to tasks.
    Notes,
}

/// Permanent perk granted by an unlocked achievement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "perk_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PerkType {
    /// Raises the effective task cap.
    MaxTasks,
    /// Raises the effective note cap.
    MaxNotes,
    /// Extra daily credits.
    DailyCredits,
}

/// Static achievement row, seeded at migration time.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AchievementDefinition {
    /// Achievement code, e.g. `tasks_5`.
    pub id: String,
    /// Display name.
    pub name: String,
    /// How to unlock, shown to the user.
    pub description: String,
    /// Tracked statistic.
    pub category: AchievementCategory,
    /// Stat value required to unlock.
    pub threshold: i64,
    /// Perk kind granted on unlock, if any.
    pub perk_type: Option<PerkType>,
    /// Perk amount.
    pub perk_value: Option<i64>,
}

/// Per-user achievement progress. One row per user.
///
/// `unlocked_achievements` only ever grows: perks are permanent even if the
/// underlying stat later regresses.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UserAchievementState {
    /// Primary key.
    pub id: Uuid,
    /// Owning user (unique).
    pub user_id: Uuid,
    /// Total tasks ever completed.
    pub lifetime_tasks_completed: i64,
    /// Current consecutive-day completion streak.
    pub current_streak: i64,
    /// Best streak achieved.
    pub longest_streak: i64,
    /// UTC calendar date of the last counted completion.
    pub last_completion_date: Option<NaiveDate>,
    /// Focus sessions reaching 50% of the task's estimate.
    pub focus_completions: i64,
    /// Notes converted to tasks.
    pub notes_converted: i64,
    /// Unlocked achievement ids, stored as a JSON array.
    pub unlocked_achievements: sqlx::types::Json<Vec<String>>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl UserAchievementState {
    /// Whether the user has unlocked the given achievement.
    pub fn has_achievement(&self, achievement_id: &str) -> bool {
        self.unlocked_achievements
            .0
            .iter()
            .any(|id| id == achievement_id)
    }

    /// The stat value for a category, as currently recorded.
    pub fn stat_for(&self, category: AchievementCategory) -> i64 {
        match category {
            AchievementCategory::Tasks => self.lifetime_tasks_completed,
            AchievementCategory::Streaks => self.current_streak,
            AchievementCategory::Focus => self.focus_completions,
            AchievementCategory::Notes => self.notes_converted,
        }
    }
}
