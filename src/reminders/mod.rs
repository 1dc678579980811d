//! Reminder firing.
//!
//! Scheduling and recalculation live in the store layer; this module
//! drains due reminders: it writes the notification, marks the reminder
//! fired, and dispatches the ReminderFired event in one transaction per
//! batch, then fans out push deliveries after commit.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::info;

use crate::config::TaskwellConfig;
use crate::domain::{Notification, NotificationType, PushSubscription, ReminderMethod};
use crate::events::{DomainEvent, EventBus, EventMeta};
use crate::notify;
use crate::notify::push::PushClient;
use crate::store::{reminders as reminder_store, tasks, StoreError};

/// Reminders drained per batch.
const FIRE_BATCH_SIZE: i64 = 100;

/// Drain pending reminders whose `scheduled_at` has arrived.
///
/// Returns the number fired. Push fan-out happens after the database
/// transaction commits so a vendor stall cannot hold row locks.
pub async fn drain_due(
    pool: &PgPool,
    config: &TaskwellConfig,
    bus: &EventBus,
    push_client: &PushClient,
    now: DateTime<Utc>,
) -> Result<u64, StoreError> {
    let mut fired = 0u64;
    let mut deliveries: Vec<(Notification, Vec<PushSubscription>)> = Vec::new();

    let mut tx = pool.begin().await?;
    let due = reminder_store::due_for_firing(&mut *tx, now, FIRE_BATCH_SIZE).await?;

    for reminder in due {
        // The task may have been hidden since scheduling; fire anyway if
        // it still exists, skip silently if not.
        let task_title = match tasks::get(&mut *tx, reminder.user_id, reminder.task_id).await {
            Ok(task) => task.title,
            Err(StoreError::NotFound) => {
                reminder_store::mark_fired(&mut *tx, reminder.id).await?;
                continue;
            }
            Err(e) => return Err(e),
        };

        let wants_push = reminder.method == ReminderMethod::Push;
        let (notification, targets) = notify::create_with_targets(
            &mut *tx,
            reminder.user_id,
            NotificationType::Reminder,
            "Task reminder",
            &format!("Reminder: \"{task_title}\""),
            Some(&format!("/tasks/{}", reminder.task_id)),
            wants_push,
        )
        .await?;

        reminder_store::mark_fired(&mut *tx, reminder.id).await?;

        bus.dispatch(
            DomainEvent::ReminderFired {
                meta: EventMeta::system(reminder.user_id),
                reminder_id: reminder.id,
                task_id: reminder.task_id,
            },
            &mut *tx,
            config,
        )
        .await;

        if !targets.is_empty() {
            deliveries.push((notification, targets));
        }
        fired += 1;
    }

    tx.commit().await?;

    for (notification, targets) in deliveries {
        push_client.fan_out(pool, &targets, &notification).await;
    }

    if fired > 0 {
        info!(fired, "reminders fired");
    }
    Ok(fired)
}
