//! `recurring_task_generate`: create the next instance of a template.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::achievements;
use crate::domain::JobType;
use crate::events::{DomainEvent, EventMeta};
use crate::jobs::worker::{HandlerOutcome, JobContext, JobHandler};
use crate::rrule::RecurrenceRule;
use crate::store::{tasks, templates, users, StoreError};

#[derive(Debug, Deserialize)]
struct Payload {
    template_id: Uuid,
}

/// Generates the next TaskInstance for a recurring template, advances
/// its cached `next_due`, and re-enqueues itself for the new occurrence.
///
/// The template row is locked for the duration, and a job that arrives
/// before the cached `next_due` skips, so overlapping enqueues (creation
/// chain, completion-driven, nightly sweep) cannot double-generate.
pub struct RecurringTaskHandler;

#[async_trait]
impl JobHandler for RecurringTaskHandler {
    fn job_type(&self) -> JobType {
        JobType::RecurringTaskGenerate
    }

    async fn run(
        &self,
        payload: &serde_json::Value,
        ctx: &JobContext,
    ) -> anyhow::Result<HandlerOutcome> {
        let payload: Payload = serde_json::from_value(payload.clone())?;
        let mut tx = ctx.pool.begin().await?;

        let template = match templates::get_by_id_for_update(&mut *tx, payload.template_id).await
        {
            Ok(template) => template,
            Err(StoreError::NotFound) => {
                return Ok(HandlerOutcome::Skipped("template deleted".to_owned()));
            }
            Err(e) => return Err(e.into()),
        };
        if !template.active {
            return Ok(HandlerOutcome::Skipped("template inactive".to_owned()));
        }

        let now = Utc::now();
        let rule = RecurrenceRule::parse(&template.recurrence)
            .map_err(|e| anyhow::anyhow!("stored recurrence unparseable: {e}"))?;
        let due = template.next_due.unwrap_or(now);
        if due > now {
            // Another job already generated this occurrence.
            return Ok(HandlerOutcome::Skipped("not yet due".to_owned()));
        }

        let user = users::get(&mut *tx, template.user_id).await?;
        let limits = achievements::effective_limits(
            &mut *tx,
            user.id,
            user.tier,
            &ctx.config.limits,
        )
        .await?;

        let created = tasks::create(
            &mut *tx,
            user.id,
            tasks::NewTask {
                title: template.title.clone(),
                description: template.description.clone(),
                priority: template.priority,
                due_date: Some(due),
                estimated_minutes: None,
                template_id: Some(template.id),
            },
            limits.max_tasks,
            limits.max_description,
        )
        .await;

        let task = match created {
            Ok(task) => task,
            Err(StoreError::LimitExceeded { .. }) => {
                // The user is at their cap; try again on the next cycle
                // rather than dead-lettering.
                return Ok(HandlerOutcome::Skipped("task cap reached".to_owned()));
            }
            Err(e) => return Err(e.into()),
        };

        let next_due = rule.next_occurrence(due.max(now));
        templates::set_next_due(&mut *tx, template.id, next_due).await?;

        // Keep the chain alive: the next occurrence gets its own job.
        if let Some(next_due) = next_due {
            crate::jobs::enqueue(
                &mut *tx,
                JobType::RecurringTaskGenerate,
                json!({ "template_id": template.id }),
                Some(next_due),
            )
            .await?;
        }

        let meta = EventMeta::system(user.id);
        ctx.bus
            .dispatch(
                DomainEvent::RecurringInstanceGenerated {
                    meta: meta.clone(),
                    template_id: template.id,
                    task_id: task.id,
                },
                &mut *tx,
                &ctx.config,
            )
            .await;
        ctx.bus
            .dispatch(
                DomainEvent::TaskCreated {
                    meta,
                    task_id: task.id,
                    recovered: false,
                },
                &mut *tx,
                &ctx.config,
            )
            .await;

        tx.commit().await?;

        Ok(HandlerOutcome::Success(Some(json!({
            "task_id": task.id,
            "next_due": next_due,
        }))))
    }
}
