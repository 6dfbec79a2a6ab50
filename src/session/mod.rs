//! Session state machine.
//!
//! ```text
//!   Idle ──select_file──▶ ParsingInput ──rows──▶ AnalyzingRemote ──result──▶ Reviewing
//!    ▲                        │                        │                       │
//!    └────── error ───────────┴──────── error ─────────┘      mark_sent ◀──────┤
//!    └────────────────────────────────── reset ────────────────────────────────┘
//! ```
//!
//! `Session` owns the canonical state and is the only caller of the ingestor
//! and the extraction client. Each transition happens under a single write
//! lock; the lock is released before either collaborator is awaited.

mod error;
mod state;

pub use error::{ErrorInfo, ErrorKind, SessionError};
pub use state::{Phase, SessionEvent, SessionSnapshot, UploadInfo};

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::extraction::{ExtractionClient, ExtractionRequest, DEFAULT_MAX_ROWS};
use crate::ingest::{Ingestor, UploadedFile};
use crate::plan::NotificationDraft;
use state::SessionState;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Session tuning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Rows forwarded to the extraction call
    pub max_rows: usize,
    /// Fixed reference date; `None` uses today's UTC date
    pub reference_date: Option<NaiveDate>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_rows: DEFAULT_MAX_ROWS,
            reference_date: None,
        }
    }
}

/// The single work-plan session of this process.
pub struct Session {
    state: RwLock<SessionState>,
    ingestor: Arc<dyn Ingestor>,
    extractor: Arc<dyn ExtractionClient>,
    config: SessionConfig,
    events: broadcast::Sender<SessionEvent>,
}

impl Session {
    pub fn new(
        ingestor: Arc<dyn Ingestor>,
        extractor: Arc<dyn ExtractionClient>,
        config: SessionConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: RwLock::new(SessionState::default()),
            ingestor,
            extractor,
            config,
            events,
        }
    }

    /// Receive every subsequent state change.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.state.read().await.snapshot()
    }

    pub async fn drafts(&self) -> Vec<NotificationDraft> {
        self.state.read().await.drafts()
    }

    fn reference_date(&self) -> NaiveDate {
        self.config
            .reference_date
            .unwrap_or_else(|| Utc::now().date_naive())
    }

    /// Run a full upload cycle: validate, parse, analyze.
    ///
    /// Only accepted from `Idle`. Returns the snapshot after the result has
    /// been stored; on any failure the session is back in `Idle` with the
    /// error surfaced. Parsing and analysis run on their own task, so a
    /// caller that goes away mid-cycle does not stop the cycle.
    pub async fn select_file(
        self: &Arc<Self>,
        file: UploadedFile,
    ) -> Result<SessionSnapshot, SessionError> {
        let cycle_id = self.begin_cycle(&file).await?;

        let session = Arc::clone(self);
        let cycle = tokio::spawn(async move { session.run_cycle(cycle_id, file).await });

        match cycle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("Upload cycle {} task ended abnormally: {}", cycle_id, e);
                Err(self
                    .fail_cycle(cycle_id, SessionError::Interrupted(e.to_string()))
                    .await)
            }
        }
    }

    /// ParsingInput -> AnalyzingRemote -> Reviewing for an accepted file.
    async fn run_cycle(
        &self,
        cycle_id: Uuid,
        file: UploadedFile,
    ) -> Result<SessionSnapshot, SessionError> {
        let rows = match self.ingestor.parse(&file).await {
            Ok(rows) => rows,
            Err(e) => return Err(self.fail_cycle(cycle_id, e.into()).await),
        };

        let request = ExtractionRequest::new(rows, self.reference_date(), self.config.max_rows);
        {
            let mut state = self.state.write().await;
            if !state.is_cycle(cycle_id, Phase::ParsingInput) {
                return Err(SessionError::Superseded);
            }
            state.phase = Phase::AnalyzingRemote;
            if let Some(upload) = state.upload.as_mut() {
                upload.parsed_rows = Some(request.total_rows);
                upload.analyzed_rows = Some(request.rows.len());
                upload.reference_date = Some(request.reference_date);
            }
        }
        tracing::info!(
            "Analyzing {} of {} rows from {}",
            request.rows.len(),
            request.total_rows,
            file.name
        );
        self.emit(SessionEvent::PhaseChanged {
            phase: Phase::AnalyzingRemote,
        });

        let extraction = match self.extractor.extract(&request).await {
            Ok(extraction) => extraction,
            Err(e) => return Err(self.fail_cycle(cycle_id, e.into()).await),
        };

        let snapshot = {
            let mut state = self.state.write().await;
            if !state.is_cycle(cycle_id, Phase::AnalyzingRemote) {
                return Err(SessionError::Superseded);
            }
            state.phase = Phase::Reviewing;
            state.result = Some(extraction.result);
            state.warnings = extraction.warnings;
            state.sent.clear();
            state.snapshot()
        };
        tracing::info!(
            "Reviewing {} tasks for {} assignees",
            snapshot.stats.as_ref().map_or(0, |s| s.total_tasks),
            snapshot.stats.as_ref().map_or(0, |s| s.assignee_count)
        );
        self.emit(SessionEvent::PhaseChanged {
            phase: Phase::Reviewing,
        });

        Ok(snapshot)
    }

    /// Idle -> ParsingInput, or a refusal that leaves the phase as it was.
    async fn begin_cycle(&self, file: &UploadedFile) -> Result<Uuid, SessionError> {
        let mut state = self.state.write().await;

        if state.phase != Phase::Idle {
            tracing::debug!("Ignoring file {} while {}", file.name, state.phase);
            return Err(SessionError::Busy(state.phase));
        }

        if file.format().is_none() {
            let err = SessionError::Validation(file.name.clone());
            state.error = err.info();
            if let Some(info) = state.error.clone() {
                self.emit(SessionEvent::Failed { error: info });
            }
            tracing::warn!("Rejected upload {}: unsupported file type", file.name);
            return Err(err);
        }

        let cycle_id = Uuid::new_v4();
        state.phase = Phase::ParsingInput;
        state.error = None;
        state.result = None;
        state.warnings.clear();
        state.sent.clear();
        state.upload = Some(UploadInfo {
            cycle_id,
            file_name: file.name.clone(),
            parsed_rows: None,
            analyzed_rows: None,
            reference_date: None,
        });
        drop(state);

        tracing::info!("Upload cycle {} started for {}", cycle_id, file.name);
        self.emit(SessionEvent::PhaseChanged {
            phase: Phase::ParsingInput,
        });
        Ok(cycle_id)
    }

    /// Return to Idle with the error surfaced, unless a reset got there first.
    async fn fail_cycle(&self, cycle_id: Uuid, err: SessionError) -> SessionError {
        let mut state = self.state.write().await;
        if !state.phase.is_in_flight() || !state.is_current(cycle_id) {
            return SessionError::Superseded;
        }
        let phase = state.phase;

        tracing::warn!("Upload cycle {} failed while {}: {}", cycle_id, phase, err);
        state.phase = Phase::Idle;
        state.result = None;
        state.warnings.clear();
        state.error = err.info();
        let info = state.error.clone();
        drop(state);

        if let Some(error) = info {
            self.emit(SessionEvent::Failed { error });
        }
        self.emit(SessionEvent::PhaseChanged { phase: Phase::Idle });
        err
    }

    /// Record that an assignee's notification was sent.
    ///
    /// Returns `true` if the name was newly recorded. Outside `Reviewing`, or
    /// for a name not in the result, nothing happens.
    pub async fn mark_sent(&self, name: &str) -> bool {
        let mut state = self.state.write().await;
        if state.phase != Phase::Reviewing {
            return false;
        }
        let known = state
            .result
            .as_ref()
            .map_or(false, |r| r.has_assignee(name));
        if !known || !state.sent.insert(name.to_string()) {
            return false;
        }
        let fully_dispatched = state.fully_dispatched();
        drop(state);

        tracing::info!("Marked {} as sent", name);
        if fully_dispatched {
            tracing::info!("All assignees have been notified");
        }
        self.emit(SessionEvent::Sent {
            assignee: name.to_string(),
            fully_dispatched,
        });
        true
    }

    /// Clear everything and return to `Idle`. Always allowed.
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        let previous = state.phase;
        *state = SessionState::default();
        drop(state);

        tracing::info!("Session reset (was {})", previous);
        self.emit(SessionEvent::Reset);
    }

    /// Clear the surfaced error; the phase is unchanged.
    pub async fn dismiss_error(&self) {
        let had_error = self.state.write().await.error.take().is_some();
        if had_error {
            self.emit(SessionEvent::ErrorDismissed);
        }
    }
}
