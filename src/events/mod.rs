//! In-process synchronous domain event bus.
//!
//! A process-local registry mapping event kind to an ordered list of
//! handlers. Dispatch runs handlers in registration order on the same
//! database connection the emitting operation used, so handler effects
//! commit or roll back atomically with the domain change. Handler errors
//! are collected, never propagated to the dispatching caller, so one
//! failing handler cannot mask another.

pub mod handlers;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::TaskwellConfig;
use crate::domain::{ActivitySource, CompletedBy};

// ── Events ──────────────────────────────────────────────────────

/// Fields carried by every event.
#[derive(Debug, Clone)]
pub struct EventMeta {
    /// Acting user.
    pub user_id: Uuid,
    /// When the event occurred.
    pub occurred_at: DateTime<Utc>,
    /// Actor category.
    pub source: ActivitySource,
    /// Correlating HTTP request, when dispatched from one.
    pub request_id: Option<Uuid>,
}

impl EventMeta {
    /// Meta for a user-initiated event happening now.
    pub fn user(user_id: Uuid, request_id: Option<Uuid>) -> Self {
        Self {
            user_id,
            occurred_at: Utc::now(),
            source: ActivitySource::User,
            request_id,
        }
    }

    /// Meta for a system-initiated event happening now.
    pub fn system(user_id: Uuid) -> Self {
        Self {
            user_id,
            occurred_at: Utc::now(),
            source: ActivitySource::System,
            request_id: None,
        }
    }

    /// Meta for an AI-initiated event happening now.
    pub fn ai(user_id: Uuid, request_id: Option<Uuid>) -> Self {
        Self {
            user_id,
            occurred_at: Utc::now(),
            source: ActivitySource::Ai,
            request_id,
        }
    }
}

/// The domain event taxonomy.
#[derive(Debug, Clone)]
pub enum DomainEvent {
    /// A task was created. `recovered` marks tombstone restores, which
    /// the achievement engine ignores.
    TaskCreated {
        /// Event meta.
        meta: EventMeta,
        /// The task.
        task_id: Uuid,
        /// Whether this creation is a tombstone recovery.
        recovered: bool,
    },
    /// A task's fields changed.
    TaskUpdated {
        /// Event meta.
        meta: EventMeta,
        /// The task.
        task_id: Uuid,
    },
    /// A task reached the completed state.
    TaskCompleted {
        /// Event meta.
        meta: EventMeta,
        /// The task.
        task_id: Uuid,
        /// Generating template, for recurring re-enqueue.
        template_id: Option<Uuid>,
        /// How it completed.
        completed_by: CompletedBy,
        /// Whether the completion came back with a tombstone recovery.
        recovered: bool,
    },
    /// A task was hard-deleted.
    TaskDeleted {
        /// Event meta.
        meta: EventMeta,
        /// The task.
        task_id: Uuid,
    },
    /// A subtask was created.
    SubtaskCreated {
        /// Event meta.
        meta: EventMeta,
        /// Parent task.
        task_id: Uuid,
        /// The subtask.
        subtask_id: Uuid,
    },
    /// A subtask transitioned to completed.
    SubtaskCompleted {
        /// Event meta.
        meta: EventMeta,
        /// Parent task.
        task_id: Uuid,
        /// The subtask.
        subtask_id: Uuid,
    },
    /// A subtask was deleted.
    SubtaskDeleted {
        /// Event meta.
        meta: EventMeta,
        /// Parent task.
        task_id: Uuid,
        /// The subtask.
        subtask_id: Uuid,
    },
    /// A note was created.
    NoteCreated {
        /// Event meta.
        meta: EventMeta,
        /// The note.
        note_id: Uuid,
    },
    /// A note was converted to a task (and archived).
    NoteConverted {
        /// Event meta.
        meta: EventMeta,
        /// The note.
        note_id: Uuid,
        /// The created task.
        task_id: Uuid,
    },
    /// A note was deleted.
    NoteDeleted {
        /// Event meta.
        meta: EventMeta,
        /// The note.
        note_id: Uuid,
    },
    /// A reminder fired and its notification was written.
    ReminderFired {
        /// Event meta.
        meta: EventMeta,
        /// The reminder.
        reminder_id: Uuid,
        /// Its task.
        task_id: Uuid,
    },
    /// An achievement was unlocked.
    AchievementUnlocked {
        /// Event meta.
        meta: EventMeta,
        /// Achievement code.
        achievement_id: String,
        /// Display name for the notification.
        achievement_name: String,
    },
    /// A subscription was created (first capture).
    SubscriptionCreated {
        /// Event meta.
        meta: EventMeta,
        /// The subscription.
        subscription_id: Uuid,
    },
    /// A subscription was cancelled.
    SubscriptionCancelled {
        /// Event meta.
        meta: EventMeta,
        /// The subscription.
        subscription_id: Uuid,
    },
    /// An AI chat call completed.
    AiChat {
        /// Event meta.
        meta: EventMeta,
        /// Task the chat targeted, if any.
        task_id: Option<Uuid>,
    },
    /// AI subtask suggestions were generated for a task.
    AiSubtasksGenerated {
        /// Event meta.
        meta: EventMeta,
        /// Target task.
        task_id: Uuid,
        /// Number of suggestions returned.
        count: usize,
    },
    /// A recurring template generated its next instance.
    RecurringInstanceGenerated {
        /// Event meta.
        meta: EventMeta,
        /// The template.
        template_id: Uuid,
        /// The generated task.
        task_id: Uuid,
    },
    /// A focus session ended with cumulative focus ≥ 50% of the estimate.
    FocusCompleted {
        /// Event meta.
        meta: EventMeta,
        /// The task.
        task_id: Uuid,
    },
}

/// Registration key: one per event variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// `task.created`
    TaskCreated,
    /// `task.updated`
    TaskUpdated,
    /// `task.completed`
    TaskCompleted,
    /// `task.deleted`
    TaskDeleted,
    /// `subtask.created`
    SubtaskCreated,
    /// `subtask.completed`
    SubtaskCompleted,
    /// `subtask.deleted`
    SubtaskDeleted,
    /// `note.created`
    NoteCreated,
    /// `note.converted`
    NoteConverted,
    /// `note.deleted`
    NoteDeleted,
    /// `reminder.fired`
    ReminderFired,
    /// `achievement.unlocked`
    AchievementUnlocked,
    /// `subscription.created`
    SubscriptionCreated,
    /// `subscription.cancelled`
    SubscriptionCancelled,
    /// `ai.chat`
    AiChat,
    /// `ai.subtasks_generated`
    AiSubtasksGenerated,
    /// `recurring.instance_generated`
    RecurringInstanceGenerated,
    /// `focus.completed`
    FocusCompleted,
}

impl EventKind {
    /// Every kind, for handlers that subscribe to the whole stream.
    pub const ALL: &'static [EventKind] = &[
        EventKind::TaskCreated,
        EventKind::TaskUpdated,
        EventKind::TaskCompleted,
        EventKind::TaskDeleted,
        EventKind::SubtaskCreated,
        EventKind::SubtaskCompleted,
        EventKind::SubtaskDeleted,
        EventKind::NoteCreated,
        EventKind::NoteConverted,
        EventKind::NoteDeleted,
        EventKind::ReminderFired,
        EventKind::AchievementUnlocked,
        EventKind::SubscriptionCreated,
        EventKind::SubscriptionCancelled,
        EventKind::AiChat,
        EventKind::AiSubtasksGenerated,
        EventKind::RecurringInstanceGenerated,
        EventKind::FocusCompleted,
    ];
}

impl DomainEvent {
    /// The registration key for this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::TaskCreated { .. } => EventKind::TaskCreated,
            Self::TaskUpdated { .. } => EventKind::TaskUpdated,
            Self::TaskCompleted { .. } => EventKind::TaskCompleted,
            Self::TaskDeleted { .. } => EventKind::TaskDeleted,
            Self::SubtaskCreated { .. } => EventKind::SubtaskCreated,
            Self::SubtaskCompleted { .. } => EventKind::SubtaskCompleted,
            Self::SubtaskDeleted { .. } => EventKind::SubtaskDeleted,
            Self::NoteCreated { .. } => EventKind::NoteCreated,
            Self::NoteConverted { .. } => EventKind::NoteConverted,
            Self::NoteDeleted { .. } => EventKind::NoteDeleted,
            Self::ReminderFired { .. } => EventKind::ReminderFired,
            Self::AchievementUnlocked { .. } => EventKind::AchievementUnlocked,
            Self::SubscriptionCreated { .. } => EventKind::SubscriptionCreated,
            Self::SubscriptionCancelled { .. } => EventKind::SubscriptionCancelled,
            Self::AiChat { .. } => EventKind::AiChat,
            Self::AiSubtasksGenerated { .. } => EventKind::AiSubtasksGenerated,
            Self::RecurringInstanceGenerated { .. } => EventKind::RecurringInstanceGenerated,
            Self::FocusCompleted { .. } => EventKind::FocusCompleted,
        }
    }

    /// Dotted action string used in the activity log.
    pub fn action(&self) -> &'static str {
        match self {
            Self::TaskCreated { .. } => "task.created",
            Self::TaskUpdated { .. } => "task.updated",
            Self::TaskCompleted { .. } => "task.completed",
            Self::TaskDeleted { .. } => "task.deleted",
            Self::SubtaskCreated { .. } => "subtask.created",
            Self::SubtaskCompleted { .. } => "subtask.completed",
            Self::SubtaskDeleted { .. } => "subtask.deleted",
            Self::NoteCreated { .. } => "note.created",
            Self::NoteConverted { .. } => "note.converted",
            Self::NoteDeleted { .. } => "note.deleted",
            Self::ReminderFired { .. } => "reminder.fired",
            Self::AchievementUnlocked { .. } => "achievement.unlocked",
            Self::SubscriptionCreated { .. } => "subscription.created",
            Self::SubscriptionCancelled { .. } => "subscription.cancelled",
            Self::AiChat { .. } => "ai.chat",
            Self::AiSubtasksGenerated { .. } => "ai.subtasks_generated",
            Self::RecurringInstanceGenerated { .. } => "recurring.instance_generated",
            Self::FocusCompleted { .. } => "focus.completed",
        }
    }

    /// The shared meta fields.
    pub fn meta(&self) -> &EventMeta {
        match self {
            Self::TaskCreated { meta, .. }
            | Self::TaskUpdated { meta, .. }
            | Self::TaskCompleted { meta, .. }
            | Self::TaskDeleted { meta, .. }
            | Self::SubtaskCreated { meta, .. }
            | Self::SubtaskCompleted { meta, .. }
            | Self::SubtaskDeleted { meta, .. }
            | Self::NoteCreated { meta, .. }
            | Self::NoteConverted { meta, .. }
            | Self::NoteDeleted { meta, .. }
            | Self::ReminderFired { meta, .. }
            | Self::AchievementUnlocked { meta, .. }
            | Self::SubscriptionCreated { meta, .. }
            | Self::SubscriptionCancelled { meta, .. }
            | Self::AiChat { meta, .. }
            | Self::AiSubtasksGenerated { meta, .. }
            | Self::RecurringInstanceGenerated { meta, .. }
            | Self::FocusCompleted { meta, .. } => meta,
        }
    }

    /// The primary entity this event is about: (entity type, id).
    pub fn entity(&self) -> (&'static str, Option<Uuid>) {
        match self {
            Self::TaskCreated { task_id, .. }
            | Self::TaskUpdated { task_id, .. }
            | Self::TaskCompleted { task_id, .. }
            | Self::TaskDeleted { task_id, .. }
            | Self::FocusCompleted { task_id, .. } => ("task", Some(*task_id)),
            Self::SubtaskCreated { subtask_id, .. }
            | Self::SubtaskCompleted { subtask_id, .. }
            | Self::SubtaskDeleted { subtask_id, .. } => ("subtask", Some(*subtask_id)),
            Self::NoteCreated { note_id, .. }
            | Self::NoteConverted { note_id, .. }
            | Self::NoteDeleted { note_id, .. } => ("note", Some(*note_id)),
            Self::ReminderFired { reminder_id, .. } => ("reminder", Some(*reminder_id)),
            Self::AchievementUnlocked { .. } => ("achievement", None),
            Self::SubscriptionCreated {
                subscription_id, ..
            }
            | Self::SubscriptionCancelled {
                subscription_id, ..
            } => ("subscription", Some(*subscription_id)),
            Self::AiChat { task_id, .. } => ("task", *task_id),
            Self::AiSubtasksGenerated { task_id, .. } => ("task", Some(*task_id)),
            Self::RecurringInstanceGenerated { task_id, .. } => ("task", Some(*task_id)),
        }
    }
}

// ── Handler contract ────────────────────────────────────────────

/// Context handed to every handler: the emitting operation's database
/// connection, the config, and a queue for follow-up events.
pub struct EventContext<'a> {
    /// The transaction's connection; handler writes commit with it.
    pub conn: &'a mut PgConnection,
    /// Application configuration.
    pub config: &'a TaskwellConfig,
    follow_ups: Vec<DomainEvent>,
}

impl<'a> EventContext<'a> {
    /// Queue a follow-up event dispatched after the current one's
    /// handlers finish.
    pub fn emit(&mut self, event: DomainEvent) {
        self.follow_ups.push(event);
    }
}

/// A bus subscriber.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Stable handler name for error reports and logs.
    fn name(&self) -> &'static str;

    /// Handle one event. Errors are collected by the bus, not raised.
    async fn handle(
        &self,
        event: &DomainEvent,
        ctx: &mut EventContext<'_>,
    ) -> anyhow::Result<()>;
}

/// One collected handler failure.
#[derive(Debug)]
pub struct DispatchError {
    /// Failing handler.
    pub handler: &'static str,
    /// Event action it failed on.
    pub action: &'static str,
    /// The failure.
    pub error: anyhow::Error,
}

// ── Bus ─────────────────────────────────────────────────────────

/// Cap on follow-up chains; deeper loops indicate a handler cycle.
const MAX_DISPATCH_DEPTH: usize = 8;

/// The process-local event bus.
#[derive(Default)]
pub struct EventBus {
    handlers: HashMap<EventKind, Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    /// An empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event kind. Handlers run in
    /// registration order.
    pub fn register(&mut self, kind: EventKind, handler: Arc<dyn EventHandler>) {
        debug!(kind = ?kind, handler = handler.name(), "registered event handler");
        self.handlers.entry(kind).or_default().push(handler);
    }

    /// Register a handler for several kinds at once.
    pub fn register_many(&mut self, kinds: &[EventKind], handler: Arc<dyn EventHandler>) {
        for kind in kinds {
            self.register(*kind, Arc::clone(&handler));
        }
    }

    /// Handlers registered for a kind (for tests and introspection).
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }

    /// Dispatch an event (and any follow-ups its handlers emit) on the
    /// given connection. Returns every handler failure collected along
    /// the way; the caller decides whether they abort the transaction.
    pub async fn dispatch(
        &self,
        event: DomainEvent,
        conn: &mut PgConnection,
        config: &TaskwellConfig,
    ) -> Vec<DispatchError> {
        let mut errors = Vec::new();
        let mut queue = vec![event];
        let mut depth = 0;

        while !queue.is_empty() {
            if depth >= MAX_DISPATCH_DEPTH {
                warn!(
                    depth,
                    pending = queue.len(),
                    "event dispatch depth cap reached; dropping follow-ups"
                );
                break;
            }
            depth += 1;

            let mut next_round = Vec::new();
            for event in queue {
                let Some(handlers) = self.handlers.get(&event.kind()) else {
                    debug!(action = event.action(), "no handlers registered");
                    continue;
                };
                debug!(
                    action = event.action(),
                    handlers = handlers.len(),
                    "dispatching event"
                );
                for handler in handlers {
                    let mut ctx = EventContext {
                        conn: &mut *conn,
                        config,
                        follow_ups: Vec::new(),
                    };
                    match handler.handle(&event, &mut ctx).await {
                        Ok(()) => next_round.append(&mut ctx.follow_ups),
                        Err(err) => {
                            error!(
                                handler = handler.name(),
                                action = event.action(),
                                error = %err,
                                "event handler failed"
                            );
                            errors.push(DispatchError {
                                handler: handler.name(),
                                action: event.action(),
                                error: err,
                            });
                        }
                    }
                }
            }
            queue = next_round;
        }

        if !errors.is_empty() {
            warn!(count = errors.len(), "handler(s) failed during dispatch");
        }
        errors
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("kinds", &self.handlers.len())
            .finish_non_exhaustive()
    }
}
