//! AI orchestration: chat, subtask generation, note conversion, and
//! voice transcription, all credit-metered.
//!
//! Credit consumption and the vendor call share one transaction. A
//! vendor failure appends a compensating grant next to the consume row
//! and the pair commits together, so the ledger shows charge-and-refund
//! while the caller sees service-unavailable and is not billed. A
//! cancelled request rolls the whole transaction back.

pub mod client;
pub mod transcribe;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::achievements;
use crate::config::TaskwellConfig;
use crate::credits::{self, CreditError};
use crate::domain::{
    CompletedBy, Note, SubtaskSource, TaskInstance, TranscriptionStatus, User, UserTier,
};
use crate::events::{DomainEvent, EventBus, EventMeta};
use crate::store::{activity, notes, subtasks, tasks, StoreError};

use client::{ActionKind, ActionSuggestion, AgentClient, AgentError, ChatReply, TaskContext};
use transcribe::{credit_cost, TranscribeClient, TranscribeError};

/// Maximum chat input length.
const MAX_CHAT_CHARS: usize = 2000;

/// Tasks included as chat context.
const CHAT_CONTEXT_TASKS: i64 = 20;

// ── Errors ──────────────────────────────────────────────────────

/// Errors from AI operations.
#[derive(Debug, Error)]
pub enum AiError {
    /// Credit ledger rejected the charge.
    #[error(transparent)]
    Credit(#[from] CreditError),

    /// The per-task AI request cap was reached.
    #[error("AI request limit reached for this task")]
    TaskRequestCapExceeded,

    /// Feature requires pro tier.
    #[error("this feature requires the pro tier")]
    TierRequired,

    /// Vendor failure; the charge was refunded.
    #[error("AI service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Input failed validation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Underlying database failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<AgentError> for AiError {
    fn from(e: AgentError) -> Self {
        AiError::ServiceUnavailable(e.to_string())
    }
}

impl From<TranscribeError> for AiError {
    fn from(e: TranscribeError) -> Self {
        AiError::ServiceUnavailable(e.to_string())
    }
}

// ── Per-task request counter ────────────────────────────────────

/// Process-local count of AI operations per (user, task).
///
/// Approximate across replicas; the hard cap additionally consults the
/// activity log before rejecting.
#[derive(Debug, Default)]
pub struct PerTaskCounter {
    counts: Mutex<HashMap<(Uuid, Uuid), u32>>,
}

impl PerTaskCounter {
    /// Current count without incrementing.
    pub fn peek(&self, user_id: Uuid, task_id: Uuid) -> u32 {
        self.counts
            .lock()
            .map(|counts| counts.get(&(user_id, task_id)).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Increment and return the new count.
    pub fn bump(&self, user_id: Uuid, task_id: Uuid) -> u32 {
        self.counts
            .lock()
            .map(|mut counts| {
                let entry = counts.entry((user_id, task_id)).or_insert(0);
                *entry += 1;
                *entry
            })
            .unwrap_or(1)
    }
}

// ── Outcomes ────────────────────────────────────────────────────

/// Chat result.
#[derive(Debug, Serialize)]
pub struct ChatOutcome {
    /// The agent's message.
    pub message: String,
    /// Suggested actions awaiting explicit confirmation.
    pub suggestions: Vec<ActionSuggestion>,
    /// Total credits left after the charge.
    pub credits_remaining: i64,
}

/// Subtask generation result.
#[derive(Debug, Serialize)]
pub struct SubtasksOutcome {
    /// The agent's summary of the task.
    pub understanding: String,
    /// Suggested subtask titles.
    pub suggestions: Vec<String>,
    /// Soft warning once the per-task counter crosses the threshold.
    pub warning: Option<String>,
    /// Total credits left after the charge.
    pub credits_remaining: i64,
}

/// Note conversion result.
#[derive(Debug, Serialize)]
pub struct ConvertOutcome {
    /// The created task.
    pub task: TaskInstance,
    /// The suggestion the task was built from.
    pub suggestion: client::TaskSuggestion,
    /// Total credits left after the charge.
    pub credits_remaining: i64,
}

/// A confirmed action to execute.
#[derive(Debug, Deserialize)]
pub struct ConfirmActionRequest {
    /// What to do.
    pub kind: ActionKind,
    /// Target entity for mutations.
    pub target_id: Option<Uuid>,
    /// Action parameters.
    #[serde(default)]
    pub parameters: serde_json::Value,
}

/// Confirm-action result.
#[derive(Debug, Serialize)]
pub struct ConfirmOutcome {
    /// The task affected or created.
    pub task: TaskInstance,
    /// Soft warning once the per-task counter crosses the threshold.
    pub warning: Option<String>,
}

/// Transcription result.
#[derive(Debug, Serialize)]
pub struct TranscribeOutcome {
    /// The updated note.
    pub note: Note,
    /// Whether the server-side cutoff truncated the transcript.
    pub max_duration_exceeded: bool,
    /// Credits charged.
    pub credits_charged: i64,
    /// Total credits left after the charge.
    pub credits_remaining: i64,
}

// ── Service ─────────────────────────────────────────────────────

/// The AI orchestration service.
pub struct AiService {
    pool: PgPool,
    config: Arc<TaskwellConfig>,
    bus: Arc<EventBus>,
    agent: AgentClient,
    transcriber: TranscribeClient,
    counter: PerTaskCounter,
}

impl AiService {
    /// Build the service and its vendor clients from config.
    pub fn new(pool: PgPool, config: Arc<TaskwellConfig>, bus: Arc<EventBus>) -> Self {
        let agent = AgentClient::new(&config.ai);
        let transcriber = TranscribeClient::new(&config.transcription);
        Self {
            pool,
            config,
            bus,
            agent,
            transcriber,
            counter: PerTaskCounter::default(),
        }
    }

    /// The per-task request counter (exposed for tests).
    pub fn counter(&self) -> &PerTaskCounter {
        &self.counter
    }

    /// Admit a task-targeted AI operation against the per-task cap.
    ///
    /// Returns the warning string once the soft threshold is crossed.
    /// The hard cap consults the activity log so it holds across
    /// replicas despite the counter being process-local.
    async fn admit_task_op(
        &self,
        conn: &mut PgConnection,
        user_id: Uuid,
        task_id: Uuid,
    ) -> Result<Option<String>, AiError> {
        let cap = self.config.ai.per_task_max;
        let local = self.counter.peek(user_id, task_id);
        if local + 1 > cap {
            return Err(AiError::TaskRequestCapExceeded);
        }
        if local + 1 > self.config.ai.per_task_warn_threshold {
            // Near the cap: verify against the durable count too.
            let logged = activity::count_ai_actions(conn, user_id, task_id).await?;
            if logged + 1 > i64::from(cap) {
                return Err(AiError::TaskRequestCapExceeded);
            }
        }
        let count = self.counter.bump(user_id, task_id);
        if count >= self.config.ai.per_task_warn_threshold {
            Ok(Some(format!(
                "{count} of {cap} AI requests used for this task"
            )))
        } else {
            Ok(None)
        }
    }

    // ── Chat ────────────────────────────────────────────────────

    /// Chat with the agent. Costs 1 credit. Suggestions are returned,
    /// never executed; the client must confirm each one.
    pub async fn chat(
        &self,
        user: &User,
        message: &str,
        include_tasks: bool,
        request_id: Option<Uuid>,
    ) -> Result<ChatOutcome, AiError> {
        let length = message.chars().count();
        if length == 0 || length > MAX_CHAT_CHARS {
            return Err(AiError::Validation(format!(
                "message must be 1-{MAX_CHAT_CHARS} characters"
            )));
        }

        let mut tx = self.pool.begin().await?;
        let receipt = credits::consume(&mut *tx, user.id, 1, "ai.chat").await?;

        let context = if include_tasks {
            let page = tasks::list(&mut *tx, user.id, false, 0, CHAT_CONTEXT_TASKS).await?;
            Some(
                page.items
                    .into_iter()
                    .map(|task| TaskContext {
                        id: task.id,
                        title: task.title,
                        completed: task.completed,
                        due_date: task.due_date,
                    })
                    .collect::<Vec<_>>(),
            )
        } else {
            None
        };

        let reply: ChatReply = match self.agent.chat(message, context.as_deref()).await {
            Ok(reply) => reply,
            Err(e) => {
                return self
                    .refund_and_fail(tx, user.id, &receipt, "ai.chat.refund", e.into())
                    .await;
            }
        };

        self.bus
            .dispatch(
                DomainEvent::AiChat {
                    meta: EventMeta::ai(user.id, request_id),
                    task_id: None,
                },
                &mut *tx,
                &self.config,
            )
            .await;
        tx.commit().await?;

        Ok(ChatOutcome {
            message: reply.message,
            suggestions: reply.suggestions,
            credits_remaining: receipt.balance_after,
        })
    }

    // ── Subtask generation ──────────────────────────────────────

    /// Generate subtask suggestions for a task. Costs a flat 1 credit.
    pub async fn generate_subtasks(
        &self,
        user: &User,
        tier: UserTier,
        task_id: Uuid,
        request_id: Option<Uuid>,
    ) -> Result<SubtasksOutcome, AiError> {
        let mut tx = self.pool.begin().await?;

        let task = tasks::get(&mut *tx, user.id, task_id).await?;
        let warning = self.admit_task_op(&mut *tx, user.id, task_id).await?;

        let limits =
            achievements::effective_limits(&mut *tx, user.id, tier, &self.config.limits).await?;
        let existing: Vec<String> = subtasks::list_unchecked(&mut *tx, task_id)
            .await?
            .into_iter()
            .map(|s| s.title)
            .collect();
        let room = usize::try_from(limits.max_subtasks).unwrap_or(0)
            .saturating_sub(existing.len());
        if room == 0 {
            return Err(AiError::Validation(
                "task already has the maximum number of subtasks".to_owned(),
            ));
        }

        let receipt = credits::consume(&mut *tx, user.id, 1, "ai.subtasks").await?;

        let reply = match self
            .agent
            .suggest_subtasks(&task.title, task.description.as_deref(), &existing, room)
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                return self
                    .refund_and_fail(tx, user.id, &receipt, "ai.subtasks.refund", e.into())
                    .await;
            }
        };

        self.bus
            .dispatch(
                DomainEvent::AiSubtasksGenerated {
                    meta: EventMeta::ai(user.id, request_id),
                    task_id,
                    count: reply.suggestions.len(),
                },
                &mut *tx,
                &self.config,
            )
            .await;
        tx.commit().await?;

        Ok(SubtasksOutcome {
            understanding: reply.understanding,
            suggestions: reply.suggestions,
            warning,
            credits_remaining: receipt.balance_after,
        })
    }

    // ── Note conversion ─────────────────────────────────────────

    /// Convert a note to a task. Costs a flat 1 credit. The note is
    /// archived, not deleted.
    pub async fn convert_note(
        &self,
        user: &User,
        tier: UserTier,
        note_id: Uuid,
        request_id: Option<Uuid>,
    ) -> Result<ConvertOutcome, AiError> {
        let mut tx = self.pool.begin().await?;

        let note = notes::get(&mut *tx, user.id, note_id).await?;
        if note.archived {
            return Err(AiError::Validation("note is already archived".to_owned()));
        }

        let receipt = credits::consume(&mut *tx, user.id, 1, "ai.convert").await?;

        let suggestion = match self.agent.convert_note(&note.content).await {
            Ok(suggestion) => suggestion,
            Err(e) => {
                return self
                    .refund_and_fail(tx, user.id, &receipt, "ai.convert.refund", e.into())
                    .await;
            }
        };

        let limits =
            achievements::effective_limits(&mut *tx, user.id, tier, &self.config.limits).await?;
        let task = tasks::create(
            &mut *tx,
            user.id,
            tasks::NewTask {
                title: suggestion.title.clone(),
                description: suggestion.description.clone(),
                priority: suggestion.priority,
                due_date: suggestion.due_date,
                estimated_minutes: suggestion.estimated_minutes,
                template_id: None,
            },
            limits.max_tasks,
            limits.max_description,
        )
        .await?;

        let subtask_room = usize::try_from(limits.max_subtasks).unwrap_or(0);
        for title in suggestion.subtasks.iter().take(subtask_room) {
            subtasks::create(
                &mut *tx,
                user.id,
                task.id,
                title,
                SubtaskSource::Ai,
                limits.max_subtasks,
            )
            .await?;
        }

        notes::archive(&mut *tx, user.id, note_id).await?;

        let meta = EventMeta::ai(user.id, request_id);
        self.bus
            .dispatch(
                DomainEvent::NoteConverted {
                    meta: meta.clone(),
                    note_id,
                    task_id: task.id,
                },
                &mut *tx,
                &self.config,
            )
            .await;
        self.bus
            .dispatch(
                DomainEvent::TaskCreated {
                    meta,
                    task_id: task.id,
                    recovered: false,
                },
                &mut *tx,
                &self.config,
            )
            .await;
        tx.commit().await?;

        info!(note_id = %note_id, task_id = %task.id, "note converted to task");
        Ok(ConvertOutcome {
            task,
            suggestion,
            credits_remaining: receipt.balance_after,
        })
    }

    // ── Confirm action ──────────────────────────────────────────

    /// Execute a previously suggested action after client confirmation.
    ///
    /// Validates ownership and achievability; no credit charge (the
    /// originating chat already paid).
    pub async fn confirm_action(
        &self,
        user: &User,
        tier: UserTier,
        request: ConfirmActionRequest,
        request_id: Option<Uuid>,
    ) -> Result<ConfirmOutcome, AiError> {
        let mut tx = self.pool.begin().await?;
        let meta = EventMeta::ai(user.id, request_id);
        let limits =
            achievements::effective_limits(&mut *tx, user.id, tier, &self.config.limits).await?;

        let (task, warning) = match request.kind {
            ActionKind::CreateTask => {
                #[derive(Deserialize)]
                struct Params {
                    title: String,
                    description: Option<String>,
                    #[serde(default)]
                    priority: crate::domain::TaskPriority,
                    due_date: Option<chrono::DateTime<chrono::Utc>>,
                    estimated_minutes: Option<i32>,
                }
                let params: Params = serde_json::from_value(request.parameters)
                    .map_err(|e| AiError::Validation(format!("bad parameters: {e}")))?;
                let task = tasks::create(
                    &mut *tx,
                    user.id,
                    tasks::NewTask {
                        title: params.title,
                        description: params.description,
                        priority: params.priority,
                        due_date: params.due_date,
                        estimated_minutes: params.estimated_minutes,
                        template_id: None,
                    },
                    limits.max_tasks,
                    limits.max_description,
                )
                .await?;
                self.bus
                    .dispatch(
                        DomainEvent::TaskCreated {
                            meta: meta.clone(),
                            task_id: task.id,
                            recovered: false,
                        },
                        &mut *tx,
                        &self.config,
                    )
                    .await;
                (task, None)
            }
            ActionKind::CompleteTask => {
                let task_id = request
                    .target_id
                    .ok_or_else(|| AiError::Validation("target_id required".to_owned()))?;
                let warning = self.admit_task_op(&mut *tx, user.id, task_id).await?;
                let task =
                    tasks::mark_completed(&mut *tx, user.id, task_id, CompletedBy::Manual).await?;
                self.bus
                    .dispatch(
                        DomainEvent::TaskCompleted {
                            meta: meta.clone(),
                            task_id,
                            template_id: task.template_id,
                            completed_by: CompletedBy::Manual,
                            recovered: false,
                        },
                        &mut *tx,
                        &self.config,
                    )
                    .await;
                (task, warning)
            }
            ActionKind::UpdateTask => {
                let task_id = request
                    .target_id
                    .ok_or_else(|| AiError::Validation("target_id required".to_owned()))?;
                let warning = self.admit_task_op(&mut *tx, user.id, task_id).await?;
                #[derive(Deserialize)]
                struct Params {
                    title: Option<String>,
                    description: Option<String>,
                    priority: Option<crate::domain::TaskPriority>,
                    due_date: Option<chrono::DateTime<chrono::Utc>>,
                }
                let params: Params = serde_json::from_value(request.parameters)
                    .map_err(|e| AiError::Validation(format!("bad parameters: {e}")))?;
                let current = tasks::get(&mut *tx, user.id, task_id).await?;
                let patch = tasks::TaskPatch {
                    title: params.title,
                    description: params.description.map(Some),
                    priority: params.priority,
                    due_date: params.due_date.map(Some),
                    ..Default::default()
                };
                let task = tasks::update(
                    &mut *tx,
                    user.id,
                    task_id,
                    current.version,
                    patch,
                    limits.max_description,
                )
                .await?;
                self.bus
                    .dispatch(
                        DomainEvent::TaskUpdated {
                            meta: meta.clone(),
                            task_id,
                        },
                        &mut *tx,
                        &self.config,
                    )
                    .await;
                (task, warning)
            }
            ActionKind::CreateSubtask => {
                let task_id = request
                    .target_id
                    .ok_or_else(|| AiError::Validation("target_id required".to_owned()))?;
                let warning = self.admit_task_op(&mut *tx, user.id, task_id).await?;
                #[derive(Deserialize)]
                struct Params {
                    title: String,
                }
                let params: Params = serde_json::from_value(request.parameters)
                    .map_err(|e| AiError::Validation(format!("bad parameters: {e}")))?;
                let subtask = subtasks::create(
                    &mut *tx,
                    user.id,
                    task_id,
                    &params.title,
                    SubtaskSource::Ai,
                    limits.max_subtasks,
                )
                .await?;
                self.bus
                    .dispatch(
                        DomainEvent::SubtaskCreated {
                            meta: meta.clone(),
                            task_id,
                            subtask_id: subtask.id,
                        },
                        &mut *tx,
                        &self.config,
                    )
                    .await;
                let task = tasks::get(&mut *tx, user.id, task_id).await?;
                (task, warning)
            }
        };

        tx.commit().await?;
        Ok(ConfirmOutcome { task, warning })
    }

    // ── Transcription ───────────────────────────────────────────

    /// Transcribe a voice note (pro only). Costs `credits_per_minute`
    /// per started minute; enforces the 300-second server-side cutoff.
    pub async fn transcribe_note(
        &self,
        user: &User,
        tier: UserTier,
        note_id: Uuid,
    ) -> Result<TranscribeOutcome, AiError> {
        if tier != UserTier::Pro {
            return Err(AiError::TierRequired);
        }

        let mut tx = self.pool.begin().await?;
        let note = notes::get(&mut *tx, user.id, note_id).await?;
        let (Some(voice_url), Some(duration)) =
            (note.voice_url.clone(), note.voice_duration_seconds)
        else {
            return Err(AiError::Validation(
                "note has no voice attachment".to_owned(),
            ));
        };
        let duration = u32::try_from(duration)
            .map_err(|_| AiError::Validation("invalid voice duration".to_owned()))?;
        if duration > self.config.transcription.max_duration_seconds {
            return Err(AiError::Validation(
                "voice attachment exceeds the maximum duration".to_owned(),
            ));
        }

        let cost = credit_cost(duration, self.config.transcription.credits_per_minute);
        let receipt = credits::consume(&mut *tx, user.id, cost, "ai.transcribe").await?;

        let transcript = match self.transcriber.transcribe(&voice_url, duration).await {
            Ok(transcript) => transcript,
            Err(e) => {
                notes::set_transcription(&mut *tx, note_id, TranscriptionStatus::Failed, None)
                    .await?;
                warn!(note_id = %note_id, error = %e, "transcription failed");
                return self
                    .refund_and_fail(tx, user.id, &receipt, "ai.transcribe.refund", e.into())
                    .await;
            }
        };

        notes::set_transcription(
            &mut *tx,
            note_id,
            TranscriptionStatus::Completed,
            Some(&transcript.text),
        )
        .await?;
        let note = notes::get(&mut *tx, user.id, note_id).await?;
        tx.commit().await?;

        Ok(TranscribeOutcome {
            note,
            max_duration_exceeded: transcript.truncated,
            credits_charged: cost,
            credits_remaining: receipt.balance_after,
        })
    }

    // ── Shared refund path ──────────────────────────────────────

    /// Append the compensating grant next to the consume row, commit the
    /// pair, and surface the vendor failure.
    async fn refund_and_fail<T>(
        &self,
        mut tx: sqlx::Transaction<'_, sqlx::Postgres>,
        user_id: Uuid,
        receipt: &credits::ConsumeReceipt,
        operation_ref: &str,
        error: AiError,
    ) -> Result<T, AiError> {
        credits::refund(&mut *tx, user_id, receipt, operation_ref).await?;
        tx.commit().await?;
        warn!(user_id = %user_id, error = %error, "vendor failure, charge refunded");
        Err(error)
    }
}
