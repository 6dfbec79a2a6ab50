//! # WorkPlan Agent
//!
//! Turns an uploaded work plan spreadsheet into next week's tasks, grouped by
//! assignee, with a draft notification per person.
//!
//! This library provides:
//! - Spreadsheet ingestion for CSV, XLSX and XLS files
//! - Task extraction through a Gemini structured-output call
//! - A single-session state machine tracking review and dispatch
//! - An HTTP API with snapshots, intents and a server-sent event stream
//!
//! ## Architecture
//!
//! ```text
//!   upload ──▶ ┌──────────────┐  rows  ┌──────────────────┐  prompt  ┌─────────┐
//!              │   Ingestor   │───────▶│ ExtractionClient │─────────▶│   LLM   │
//!              └──────────────┘        └────────┬─────────┘          └─────────┘
//!                     ▲                         │ ExtractionResult
//!                     │                         ▼
//!              ┌──────┴───────────────────────────────────┐
//!              │                 Session                  │◀── mark sent / reset
//!              │  Idle → Parsing → Analyzing → Reviewing  │
//!              └──────────────────────┬───────────────────┘
//!                                     ▼
//!                       snapshots, drafts, SSE events
//! ```
//!
//! ## Modules
//! - `ingest`: file to row records
//! - `llm`: LLM client trait and Gemini implementation
//! - `extraction`: prompt, response schema and validation
//! - `plan`: tasks, drafts and statistics
//! - `session`: the orchestrating state machine
//! - `api`: axum routes

pub mod api;
pub mod config;
pub mod extraction;
pub mod ingest;
pub mod llm;
pub mod plan;
pub mod session;

pub use config::Config;
pub use session::{Session, SessionConfig, SessionSnapshot};
