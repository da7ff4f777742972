//! One image session: source file, upload, tool runners, consolidated
//! document and the (at most one) open edit session.
//!
//! Operations are synchronous except those that talk to the network. Runs
//! are exposed both as a single `run` and as `begin_run` / `complete_run`
//! so several tools can be in flight at once; completions are checked
//! against the current session and discarded when stale.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use diagram_backend::{AnalysisBackend, DescribeRequest, ObjectStorage};
use diagram_shared::{DiagramError, Document, FileMeta, Result, SessionId, ToolResult};

use crate::catalog::ToolCatalog;
use crate::clock::{Clock, SystemClock};
use crate::edit::EditSession;
use crate::runner::{RunStatus, RunTicket, ToolRunner};
use crate::store::ConsolidationStore;
use crate::upload::{SourceFile, UploadPipeline, UploadedImage};

/// Default indentation of the edit buffer.
const DEFAULT_INDENT: usize = 2;

pub struct Workbench {
    backend: Arc<dyn AnalysisBackend>,
    storage: Arc<dyn ObjectStorage>,
    clock: Arc<dyn Clock>,
    catalog: ToolCatalog,
    runners: Vec<ToolRunner>,
    store: ConsolidationStore,
    session: SessionId,
    source_file: Option<FileMeta>,
    source_url: Option<String>,
    upload_error: Option<String>,
    edit: Option<EditSession>,
    indent: usize,
}

impl Workbench {
    pub fn new(
        catalog: ToolCatalog,
        backend: Arc<dyn AnalysisBackend>,
        storage: Arc<dyn ObjectStorage>,
    ) -> Self {
        Self::with_clock(catalog, backend, storage, Arc::new(SystemClock))
    }

    pub fn with_clock(
        catalog: ToolCatalog,
        backend: Arc<dyn AnalysisBackend>,
        storage: Arc<dyn ObjectStorage>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let runners = catalog.iter().cloned().map(ToolRunner::new).collect();
        let store = ConsolidationStore::new(clock.now());
        Self {
            backend,
            storage,
            clock,
            catalog,
            runners,
            store,
            session: SessionId::new(),
            source_file: None,
            source_url: None,
            upload_error: None,
            edit: None,
            indent: DEFAULT_INDENT,
        }
    }

    /// Indentation used when formatting edit buffers.
    pub fn with_indent(mut self, indent: usize) -> Self {
        self.indent = indent;
        self
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn source_file(&self) -> Option<&FileMeta> {
        self.source_file.as_ref()
    }

    pub fn source_url(&self) -> Option<&str> {
        self.source_url.as_deref()
    }

    /// Message of the last failed upload for the current file.
    pub fn upload_error(&self) -> Option<&str> {
        self.upload_error.as_deref()
    }

    pub fn document(&self) -> &Document {
        self.store.document()
    }

    pub fn runners(&self) -> impl Iterator<Item = &ToolRunner> {
        self.runners.iter()
    }

    pub fn runner(&self, tool_id: &str) -> Result<&ToolRunner> {
        let idx = self.runner_index(tool_id)?;
        Ok(&self.runners[idx])
    }

    pub fn edit_session(&self) -> Option<&EditSession> {
        self.edit.as_ref()
    }

    /// Shared handle to the analysis backend, for running tickets off the
    /// workbench borrow.
    pub fn backend(&self) -> Arc<dyn AnalysisBackend> {
        Arc::clone(&self.backend)
    }

    fn runner_index(&self, tool_id: &str) -> Result<usize> {
        let key = self.catalog.get(tool_id)?.key();
        self.catalog
            .position(&key)
            .ok_or_else(|| DiagramError::UnknownTool(tool_id.to_string()))
    }

    // -----------------------------------------------------------------------
    // Source selection & upload
    // -----------------------------------------------------------------------

    /// Make `file` the active source. Clears the source URL, resets every
    /// runner, replaces the document and drops any open edit session.
    pub fn select_file(&mut self, file: FileMeta) -> SessionId {
        self.session = SessionId::new();
        self.source_url = None;
        self.upload_error = None;
        if self.edit.take().is_some() {
            warn!("new source file selected, discarding open edit session");
        }
        for runner in &mut self.runners {
            runner.reset();
        }
        self.store.reset(&file, self.clock.now());
        info!(session = %self.session, file = %file.name, "source file selected");
        self.source_file = Some(file);
        self.session
    }

    /// Resume from an exported document: new session, runners reset, and the
    /// document's recorded image URL (if any) becomes the source URL.
    pub fn restore(&mut self, document: Document) -> SessionId {
        self.session = SessionId::new();
        self.upload_error = None;
        self.edit = None;
        for runner in &mut self.runners {
            runner.reset();
        }
        self.source_url = document.metadata.source_image_url.clone();
        self.source_file = None;
        info!(
            session = %self.session,
            entries = document.entry_count(),
            has_image = self.source_url.is_some(),
            "restored document"
        );
        self.store = ConsolidationStore::from_document(document);
        self.session
    }

    /// An upload pipeline that can run without borrowing the workbench.
    pub fn upload_pipeline(&self) -> UploadPipeline {
        UploadPipeline::new(Arc::clone(&self.backend), Arc::clone(&self.storage))
    }

    /// Apply an upload outcome started under `session`.
    ///
    /// Returns `Ok(None)` when the session has moved on and the outcome was
    /// dropped. Failures are recorded in [`Workbench::upload_error`] and
    /// returned.
    pub fn apply_upload(
        &mut self,
        session: SessionId,
        outcome: Result<UploadedImage>,
    ) -> Result<Option<&str>> {
        if session != self.session {
            warn!(%session, current = %self.session, "discarding stale upload result");
            return Ok(None);
        }

        match outcome {
            Ok(uploaded) => {
                self.store.stamp_upload(&uploaded.source_url, self.clock.now());
                self.upload_error = None;
                self.source_url = Some(uploaded.source_url);
                Ok(self.source_url.as_deref())
            }
            Err(e) => {
                warn!(error = %e, "upload failed");
                self.upload_error = Some(e.user_message());
                Err(e)
            }
        }
    }

    /// Select `file` and upload it, returning the new source URL.
    #[instrument(skip_all, fields(file = %file.meta.name))]
    pub async fn upload(&mut self, file: &SourceFile) -> Result<String> {
        let session = self.select_file(file.meta.clone());
        let outcome = self.upload_pipeline().upload(file).await;
        let url = self.apply_upload(session, outcome)?;
        url.map(str::to_string)
            .ok_or_else(|| DiagramError::validation("upload superseded by a newer file"))
    }

    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    /// Start a run for `tool_id`.
    ///
    /// Refused with [`DiagramError::EditInProgress`] while an edit session is
    /// open and with [`DiagramError::NoImage`] before an upload; neither
    /// changes any state.
    pub fn begin_run(&mut self, tool_id: &str) -> Result<RunTicket> {
        let idx = self.runner_index(tool_id)?;
        if self.edit.is_some() {
            return Err(DiagramError::EditInProgress);
        }
        let document = self.store.document();
        self.runners[idx].begin(self.session, self.source_url.as_deref(), document)
    }

    /// Apply the backend outcome for `ticket`. Returns whether it was applied.
    pub fn complete_run(&mut self, ticket: &RunTicket, outcome: Result<ToolResult>) -> bool {
        if ticket.session != self.session {
            warn!(
                tool = %ticket.tool_id,
                ticket_session = %ticket.session,
                current = %self.session,
                "discarding run result from a previous image"
            );
            return false;
        }
        match self.runner_index(&ticket.tool_id) {
            Ok(idx) => self.runners[idx].complete(ticket, outcome),
            Err(_) => false,
        }
    }

    /// Run `tool_id` to completion and return its resulting status.
    #[instrument(skip_all, fields(tool = tool_id))]
    pub async fn run(&mut self, tool_id: &str) -> Result<RunStatus> {
        let ticket = self.begin_run(tool_id)?;
        let outcome = ticket.execute(self.backend.as_ref()).await;
        self.complete_run(&ticket, outcome);
        Ok(self.runner(tool_id)?.status())
    }

    /// Whole-diagram description. Not recorded in the document.
    pub async fn describe(&self) -> Result<String> {
        let image_url = self.source_url.clone().ok_or(DiagramError::NoImage)?;
        self.backend.describe(&DescribeRequest { image_url }).await
    }

    // -----------------------------------------------------------------------
    // Capture
    // -----------------------------------------------------------------------

    /// Promote the tool's latest successful result into the document.
    /// The runner keeps showing it afterwards.
    pub fn capture(&mut self, tool_id: &str) -> Result<()> {
        let idx = self.runner_index(tool_id)?;
        let runner = &self.runners[idx];
        let result = runner.capturable()?.clone();
        let key = runner.spec().key();
        if self.edit.as_ref().is_some_and(|edit| edit.overwrites(&key)) {
            warn!(tool = %key, "capturing while an edit session is open; committing the edit will replace this entry");
        }
        self.store.capture(&key, result, self.clock.now());
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Editing
    // -----------------------------------------------------------------------

    /// Open an edit session on the whole document.
    pub fn open_edit(&mut self) -> Result<&EditSession> {
        if self.edit.is_some() {
            return Err(DiagramError::EditInProgress);
        }
        let session = EditSession::open(self.store.document(), self.indent)?;
        let session: &EditSession = self.edit.insert(session);
        Ok(session)
    }

    /// Open an edit session on one tool's captured entry.
    pub fn open_tool_edit(&mut self, tool_id: &str) -> Result<&EditSession> {
        let key = self.catalog.get(tool_id)?.key();
        if self.edit.is_some() {
            return Err(DiagramError::EditInProgress);
        }
        let session = EditSession::open_tool(self.store.document(), &key, self.indent)?;
        let session: &EditSession = self.edit.insert(session);
        Ok(session)
    }

    /// Feed new text into the open session. Returns whether it parses.
    pub fn edit_text_change(&mut self, text: impl Into<String>) -> Result<bool> {
        let session = self.edit.as_mut().ok_or(DiagramError::NoEditSession)?;
        Ok(session.on_text_change(text))
    }

    /// Commit the open session and close it. On error it stays open.
    pub fn commit_edit(&mut self) -> Result<()> {
        let session = self.edit.as_ref().ok_or(DiagramError::NoEditSession)?;
        session.commit(&mut self.store, self.clock.now())?;
        self.edit = None;
        Ok(())
    }

    /// Discard the open session; the document is untouched.
    pub fn cancel_edit(&mut self) -> Result<()> {
        self.edit.take().ok_or(DiagramError::NoEditSession)?;
        info!("edit session cancelled");
        Ok(())
    }
}
