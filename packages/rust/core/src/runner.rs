//! Per-tool run lifecycle.
//!
//! ```text
//! Idle --begin--> Running --(ok)--> Success
//!                         --(err)-> Error
//! Success | Error --begin--> Running
//! any --reset--> Idle
//! ```
//!
//! A run is split into [`ToolRunner::begin`], which hands out a
//! [`RunTicket`] holding the request, and [`ToolRunner::complete`], which
//! applies the outcome only if the ticket is still the runner's latest.

use tracing::{debug, info, warn};

use diagram_backend::{AnalysisBackend, AnalyzeRequest};
use diagram_shared::{DiagramError, Document, Result, SessionId, ToolResult};

use crate::catalog::ToolSpec;
use crate::context::build_context;

/// Coarse status of a runner, without payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Idle,
    Running,
    Success,
    Error,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Success => "success",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Ephemeral state of one tool. The payload lives in the variant, so a
/// failed run cannot carry a result and a successful one cannot carry an
/// error message.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Success(ToolResult),
    Error(String),
}

impl RunState {
    pub fn status(&self) -> RunStatus {
        match self {
            Self::Idle => RunStatus::Idle,
            Self::Running => RunStatus::Running,
            Self::Success(_) => RunStatus::Success,
            Self::Error(_) => RunStatus::Error,
        }
    }

    pub fn last_result(&self) -> Option<&ToolResult> {
        match self {
            Self::Success(result) => Some(result),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Error(message) => Some(message),
            _ => None,
        }
    }
}

/// An in-flight run: the request to send and the identity to check on
/// completion.
#[derive(Debug, Clone, PartialEq)]
pub struct RunTicket {
    pub tool_id: String,
    pub session: SessionId,
    attempt: u64,
    pub request: AnalyzeRequest,
}

impl RunTicket {
    /// Send the request to the backend.
    pub async fn execute(&self, backend: &dyn AnalysisBackend) -> Result<ToolResult> {
        backend.analyze_tool(&self.tool_id, &self.request).await
    }
}

/// Drives a single tool's lifecycle.
#[derive(Debug, Clone)]
pub struct ToolRunner {
    spec: ToolSpec,
    state: RunState,
    attempt: u64,
}

impl ToolRunner {
    pub fn new(spec: ToolSpec) -> Self {
        Self {
            spec,
            state: RunState::Idle,
            attempt: 0,
        }
    }

    pub fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn status(&self) -> RunStatus {
        self.state.status()
    }

    /// Start a run against `source_url`, pulling context from `document`.
    ///
    /// Fails with [`DiagramError::NoImage`] and leaves the state untouched
    /// when there is no source URL.
    pub fn begin(
        &mut self,
        session: SessionId,
        source_url: Option<&str>,
        document: &Document,
    ) -> Result<RunTicket> {
        let image_url = source_url.ok_or(DiagramError::NoImage)?;

        let context_data = build_context(document, &self.spec);
        if self.spec.uses_context() && context_data.is_none() {
            debug!(tool = %self.spec.id, "no upstream captures yet, sending without context");
        }

        self.attempt += 1;
        self.state = RunState::Running;
        info!(tool = %self.spec.id, attempt = self.attempt, "run started");

        Ok(RunTicket {
            tool_id: self.spec.id.clone(),
            session,
            attempt: self.attempt,
            request: AnalyzeRequest {
                image_url: image_url.to_string(),
                context_data,
            },
        })
    }

    /// Apply the outcome of `ticket`. Returns `false` when the ticket was
    /// superseded by a newer run or a reset and the outcome was dropped.
    pub fn complete(&mut self, ticket: &RunTicket, outcome: Result<ToolResult>) -> bool {
        if ticket.attempt != self.attempt || self.state != RunState::Running {
            warn!(
                tool = %self.spec.id,
                ticket_attempt = ticket.attempt,
                current_attempt = self.attempt,
                "discarding stale run result"
            );
            return false;
        }

        self.state = match outcome {
            Ok(result) => {
                info!(tool = %self.spec.id, "run succeeded");
                RunState::Success(result)
            }
            Err(e) => {
                let message = failure_message(&self.spec, &e);
                warn!(tool = %self.spec.id, error = %message, "run failed");
                RunState::Error(message)
            }
        };
        true
    }

    /// Hard reset to Idle; any in-flight ticket becomes stale.
    pub fn reset(&mut self) {
        self.attempt += 1;
        self.state = RunState::Idle;
    }

    /// The result a capture would promote.
    pub fn capturable(&self) -> Result<&ToolResult> {
        self.state
            .last_result()
            .ok_or_else(|| DiagramError::NothingToCapture {
                tool: self.spec.id.clone(),
            })
    }
}

fn failure_message(spec: &ToolSpec, err: &DiagramError) -> String {
    let message = err.user_message();
    if message.trim().is_empty() {
        format!("Failed to run {} analysis.", spec.id)
    } else {
        message
    }
}
