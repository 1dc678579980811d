//! Standard event handlers wired at startup.
//!
//! Registration order matters: the activity writer runs first so the
//! audit trail records the event even when a later handler fails.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::achievements;
use crate::domain::{JobType, NotificationType};
use crate::jobs;
use crate::store::{activity, notifications, subtasks, tasks};

use super::{DomainEvent, EventBus, EventContext, EventHandler, EventKind, EventMeta};

/// Register the standard handler set on a fresh bus.
pub fn register_standard_handlers(bus: &mut EventBus) {
    bus.register_many(EventKind::ALL, Arc::new(ActivityWriter));
    bus.register(EventKind::SubtaskCompleted, Arc::new(SubtaskAutoComplete));
    let driver: Arc<dyn EventHandler> = Arc::new(AchievementDriver);
    bus.register(EventKind::TaskCompleted, Arc::clone(&driver));
    bus.register(EventKind::NoteConverted, Arc::clone(&driver));
    bus.register(EventKind::FocusCompleted, driver);
    bus.register(EventKind::TaskCompleted, Arc::new(RecurringEnqueuer));
    bus.register(EventKind::AchievementUnlocked, Arc::new(AchievementNotifier));
}

// ── Activity writer ─────────────────────────────────────────────

/// Appends an audit row for every dispatched event.
pub struct ActivityWriter;

#[async_trait]
impl EventHandler for ActivityWriter {
    fn name(&self) -> &'static str {
        "activity_writer"
    }

    async fn handle(
        &self,
        event: &DomainEvent,
        ctx: &mut EventContext<'_>,
    ) -> anyhow::Result<()> {
        let meta = event.meta();
        let (entity_type, entity_id) = event.entity();
        let extra = match event {
            DomainEvent::TaskCompleted { completed_by, .. } => {
                Some(json!({ "completed_by": completed_by }))
            }
            DomainEvent::AchievementUnlocked { achievement_id, .. } => {
                Some(json!({ "achievement_id": achievement_id }))
            }
            DomainEvent::AiSubtasksGenerated { count, .. } => {
                Some(json!({ "suggestions": count }))
            }
            _ => None,
        };
        activity::record(
            ctx.conn,
            meta.user_id,
            entity_type,
            entity_id,
            event.action(),
            meta.source,
            extra,
            meta.request_id,
        )
        .await?;
        Ok(())
    }
}

// ── Subtask auto-complete ───────────────────────────────────────

/// Completes the parent task once its last incomplete subtask finishes.
///
/// The completion is emitted as a follow-up TaskCompleted with
/// `completed_by = auto`, so the achievement and recurring handlers run
/// for it in the same transaction.
pub struct SubtaskAutoComplete;

#[async_trait]
impl EventHandler for SubtaskAutoComplete {
    fn name(&self) -> &'static str {
        "subtask_auto_complete"
    }

    async fn handle(
        &self,
        event: &DomainEvent,
        ctx: &mut EventContext<'_>,
    ) -> anyhow::Result<()> {
        let DomainEvent::SubtaskCompleted { meta, task_id, .. } = event else {
            return Ok(());
        };

        let task = tasks::get(ctx.conn, meta.user_id, *task_id).await?;
        if task.completed || task.archived {
            return Ok(());
        }
        if !subtasks::all_completed(ctx.conn, *task_id).await? {
            return Ok(());
        }

        let completed = tasks::mark_completed(
            ctx.conn,
            meta.user_id,
            *task_id,
            crate::domain::CompletedBy::Auto,
        )
        .await?;
        debug!(task_id = %task_id, "task auto-completed by last subtask");

        ctx.emit(DomainEvent::TaskCompleted {
            meta: meta.clone(),
            task_id: *task_id,
            template_id: completed.template_id,
            completed_by: crate::domain::CompletedBy::Auto,
            recovered: false,
        });
        Ok(())
    }
}

// ── Achievement driver ──────────────────────────────────────────

/// Feeds stat mutations into the achievement engine and emits
/// AchievementUnlocked follow-ups for fresh unlocks.
///
/// Recovery-flagged completions are ignored so a tombstone restore never
/// changes streaks or milestone credit.
pub struct AchievementDriver;

#[async_trait]
impl EventHandler for AchievementDriver {
    fn name(&self) -> &'static str {
        "achievement_driver"
    }

    async fn handle(
        &self,
        event: &DomainEvent,
        ctx: &mut EventContext<'_>,
    ) -> anyhow::Result<()> {
        let (meta, unlocked) = match event {
            DomainEvent::TaskCompleted {
                meta, recovered, ..
            } => {
                if *recovered {
                    return Ok(());
                }
                let unlocked = achievements::apply_task_completion(
                    ctx.conn,
                    meta.user_id,
                    meta.occurred_at.date_naive(),
                )
                .await?;
                (meta, unlocked)
            }
            DomainEvent::NoteConverted { meta, .. } => {
                let unlocked =
                    achievements::apply_note_converted(ctx.conn, meta.user_id).await?;
                (meta, unlocked)
            }
            DomainEvent::FocusCompleted { meta, .. } => {
                let unlocked =
                    achievements::apply_focus_completion(ctx.conn, meta.user_id).await?;
                (meta, unlocked)
            }
            _ => return Ok(()),
        };

        for definition in unlocked {
            ctx.emit(DomainEvent::AchievementUnlocked {
                meta: EventMeta::system(meta.user_id),
                achievement_id: definition.id,
                achievement_name: definition.name,
            });
        }
        Ok(())
    }
}

// ── Recurring enqueuer ──────────────────────────────────────────

/// Enqueues next-instance generation when a recurring instance completes.
pub struct RecurringEnqueuer;

#[async_trait]
impl EventHandler for RecurringEnqueuer {
    fn name(&self) -> &'static str {
        "recurring_enqueuer"
    }

    async fn handle(
        &self,
        event: &DomainEvent,
        ctx: &mut EventContext<'_>,
    ) -> anyhow::Result<()> {
        let DomainEvent::TaskCompleted {
            template_id: Some(template_id),
            recovered: false,
            ..
        } = event
        else {
            return Ok(());
        };

        jobs::enqueue(
            ctx.conn,
            JobType::RecurringTaskGenerate,
            json!({ "template_id": template_id }),
            None,
        )
        .await?;
        debug!(template_id = %template_id, "recurring generation enqueued");
        Ok(())
    }
}

// ── Achievement notifier ────────────────────────────────────────

/// Writes the in-app notification for an unlocked achievement.
pub struct AchievementNotifier;

#[async_trait]
impl EventHandler for AchievementNotifier {
    fn name(&self) -> &'static str {
        "achievement_notifier"
    }

    async fn handle(
        &self,
        event: &DomainEvent,
        ctx: &mut EventContext<'_>,
    ) -> anyhow::Result<()> {
        let DomainEvent::AchievementUnlocked {
            meta,
            achievement_name,
            ..
        } = event
        else {
            return Ok(());
        };
        notifications::create(
            ctx.conn,
            meta.user_id,
            NotificationType::Achievement,
            "Achievement unlocked",
            &format!("You earned \"{achievement_name}\"!"),
            Some("/achievements"),
        )
        .await?;
        Ok(())
    }
}
