//! Taskwell — backend for a personal task-management service.
//!
//! Task CRUD with optimistic locking, recurring tasks, subtasks, reminders,
//! notes with voice transcription, a metered AI credit ledger, gamified
//! achievements, a Postgres-backed job queue, and a webhook-driven Pro
//! subscription lifecycle.

pub mod achievements;
pub mod ai;
pub mod auth;
pub mod billing;
pub mod config;
pub mod credits;
pub mod domain;
pub mod events;
pub mod http;
pub mod jobs;
pub mod logging;
pub mod metrics;
pub mod migrations;
pub mod notify;
pub mod ratelimit;
pub mod recovery;
pub mod reminders;
pub mod rrule;
pub mod store;
