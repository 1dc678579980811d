//! AI vendor agent client.
//!
//! The vendor returns structured content; responses failing structural
//! validation are treated like any other vendor failure (the caller maps
//! them to 503 and refunds the charge).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::AiConfig;
use crate::domain::TaskPriority;

// ── Errors ──────────────────────────────────────────────────────

/// Vendor call failures. Every variant surfaces as service-unavailable
/// to the API caller.
#[derive(Debug, Error)]
pub enum AgentError {
    /// No API key configured; the AI surface is disabled.
    #[error("AI vendor is not configured")]
    Disabled,

    /// The call exceeded its timeout.
    #[error("AI vendor call timed out")]
    Timeout,

    /// Transport-level failure.
    #[error("AI vendor request failed: {0}")]
    Http(String),

    /// Non-success HTTP status.
    #[error("AI vendor returned status {status}")]
    HttpStatus {
        /// Response status code.
        status: u16,
        /// Truncated response body for logs.
        body: String,
    },

    /// Response failed structured-output validation.
    #[error("AI vendor response failed validation: {0}")]
    Schema(String),
}

impl From<reqwest::Error> for AgentError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AgentError::Timeout
        } else {
            AgentError::Http(e.to_string())
        }
    }
}

// ── Structured content ──────────────────────────────────────────

/// Action kinds the agent may suggest. Suggestions are never executed by
/// the chat endpoint; the client must confirm each one explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Create a new task from parameters.
    CreateTask,
    /// Complete the target task.
    CompleteTask,
    /// Patch fields of the target task.
    UpdateTask,
    /// Add a subtask to the target task.
    CreateSubtask,
}

/// One action suggestion from the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSuggestion {
    /// What the action would do.
    pub kind: ActionKind,
    /// Target entity for complete/update/subtask actions.
    pub target_id: Option<Uuid>,
    /// Human-readable description shown for confirmation.
    pub description: String,
    /// Action parameters (title, priority, …).
    #[serde(default)]
    pub parameters: serde_json::Value,
    /// Agent confidence in [0, 1].
    pub confidence: f64,
}

/// Chat reply: a message plus zero or more suggestions.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatReply {
    /// The conversational response.
    pub message: String,
    /// Suggested actions awaiting confirmation.
    #[serde(default)]
    pub suggestions: Vec<ActionSuggestion>,
}

/// Subtask generation result.
#[derive(Debug, Clone, Deserialize)]
pub struct SubtaskSuggestions {
    /// The agent's summary of how it understood the task.
    pub understanding: String,
    /// Suggested subtask titles.
    #[serde(default)]
    pub suggestions: Vec<String>,
}

/// Note-to-task conversion result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSuggestion {
    /// Suggested title.
    pub title: String,
    /// Suggested description.
    pub description: Option<String>,
    /// Suggested priority.
    pub priority: TaskPriority,
    /// Suggested due date.
    pub due_date: Option<chrono::DateTime<chrono::Utc>>,
    /// Suggested estimate in minutes.
    pub estimated_minutes: Option<i32>,
    /// Suggested subtask titles.
    #[serde(default)]
    pub subtasks: Vec<String>,
    /// Agent confidence in [0, 1].
    pub confidence: f64,
}

/// Minimal task view sent as chat context.
#[derive(Debug, Clone, Serialize)]
pub struct TaskContext {
    /// Task id.
    pub id: Uuid,
    /// Title.
    pub title: String,
    /// Completion flag.
    pub completed: bool,
    /// Due date.
    pub due_date: Option<chrono::DateTime<chrono::Utc>>,
}

// ── Client ──────────────────────────────────────────────────────

/// HTTP client for the vendor agent.
#[derive(Debug, Clone)]
pub struct AgentClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl AgentClient {
    /// Build the client from config.
    pub fn new(config: &AiConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            api_key: config.api_key.clone(),
        }
    }

    fn key(&self) -> Result<&str, AgentError> {
        self.api_key.as_deref().ok_or(AgentError::Disabled)
    }

    async fn post_json<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        request: &Req,
    ) -> Result<Resp, AgentError> {
        let key = self.key()?;
        let response = self
            .http
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(AgentError::HttpStatus {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }
        serde_json::from_str(&body).map_err(|e| AgentError::Schema(e.to_string()))
    }

    /// Chat with optional task context.
    pub async fn chat(
        &self,
        message: &str,
        context: Option<&[TaskContext]>,
    ) -> Result<ChatReply, AgentError> {
        #[derive(Serialize)]
        struct Request<'a> {
            message: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            tasks: Option<&'a [TaskContext]>,
        }
        let reply: ChatReply = self
            .post_json("/v1/chat", &Request { message, tasks: context })
            .await?;
        validate_suggestions(&reply.suggestions)?;
        Ok(reply)
    }

    /// Suggest up to `max_suggestions` subtasks for a task.
    pub async fn suggest_subtasks(
        &self,
        title: &str,
        description: Option<&str>,
        existing: &[String],
        max_suggestions: usize,
    ) -> Result<SubtaskSuggestions, AgentError> {
        #[derive(Serialize)]
        struct Request<'a> {
            title: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            description: Option<&'a str>,
            existing: &'a [String],
            max_suggestions: usize,
        }
        let mut reply: SubtaskSuggestions = self
            .post_json(
                "/v1/subtasks",
                &Request {
                    title,
                    description,
                    existing,
                    max_suggestions,
                },
            )
            .await?;
        reply.suggestions.truncate(max_suggestions);
        Ok(reply)
    }

    /// Turn note content into a task suggestion.
    pub async fn convert_note(&self, content: &str) -> Result<TaskSuggestion, AgentError> {
        #[derive(Serialize)]
        struct Request<'a> {
            content: &'a str,
        }
        let suggestion: TaskSuggestion =
            self.post_json("/v1/note-to-task", &Request { content }).await?;
        if suggestion.title.is_empty() || suggestion.title.chars().count() > 200 {
            return Err(AgentError::Schema(
                "suggested title outside 1-200 characters".to_owned(),
            ));
        }
        if !(0.0..=1.0).contains(&suggestion.confidence) {
            return Err(AgentError::Schema("confidence outside [0, 1]".to_owned()));
        }
        Ok(suggestion)
    }
}

fn validate_suggestions(suggestions: &[ActionSuggestion]) -> Result<(), AgentError> {
    for suggestion in suggestions {
        if !(0.0..=1.0).contains(&suggestion.confidence) {
            return Err(AgentError::Schema("confidence outside [0, 1]".to_owned()));
        }
        let needs_target = matches!(
            suggestion.kind,
            ActionKind::CompleteTask | ActionKind::UpdateTask | ActionKind::CreateSubtask
        );
        if needs_target && suggestion.target_id.is_none() {
            return Err(AgentError::Schema(format!(
                "suggestion {:?} missing target_id",
                suggestion.kind
            )));
        }
    }
    Ok(())
}

const MAX_ERROR_BODY_CHARS: usize = 256;

fn truncate_body(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() > MAX_ERROR_BODY_CHARS {
        let mut shortened: String = collapsed.chars().take(MAX_ERROR_BODY_CHARS).collect();
        shortened.push('…');
        shortened
    } else {
        collapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suggestion_requires_target_for_mutations() {
        let missing = ActionSuggestion {
            kind: ActionKind::CompleteTask,
            target_id: None,
            description: "complete it".to_owned(),
            parameters: serde_json::json!({}),
            confidence: 0.9,
        };
        assert!(validate_suggestions(&[missing]).is_err());

        let create = ActionSuggestion {
            kind: ActionKind::CreateTask,
            target_id: None,
            description: "new task".to_owned(),
            parameters: serde_json::json!({"title": "x"}),
            confidence: 0.9,
        };
        assert!(validate_suggestions(&[create]).is_ok());
    }

    #[test]
    fn test_confidence_bounds_checked() {
        let bad = ActionSuggestion {
            kind: ActionKind::CreateTask,
            target_id: None,
            description: "n".to_owned(),
            parameters: serde_json::json!({}),
            confidence: 1.5,
        };
        assert!(validate_suggestions(&[bad]).is_err());
    }

    #[test]
    fn test_truncate_body_caps_length() {
        let long = "x".repeat(1000);
        assert!(truncate_body(&long).chars().count() <= MAX_ERROR_BODY_CHARS + 1);
    }

    #[test]
    fn test_chat_reply_parses_without_suggestions() {
        let reply: ChatReply =
            serde_json::from_str(r#"{"message": "hello"}"#).expect("parse");
        assert!(reply.suggestions.is_empty());
    }
}
