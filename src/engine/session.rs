//! Debug session state machine
//!
//! Drives one adapter session at a time from initialization through
//! termination, reconciling the breakpoint and thread registries with what
//! the adapter reports.
//!
//! The engine has a single owner. The host alternates between awaiting
//! [`Engine::next_event`] and running user commands, handing each event to
//! [`Engine::handle_event`]. Because every mutation goes through `&mut self`
//! nothing interleaves inside an operation, but state may change between
//! operations, so each one re-checks its guards.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use futures_util::future::try_join_all;
use tokio::task::JoinHandle;

use crate::common::{Error, Result};
use crate::console::Console;
use crate::dap::{
    self, AdapterConnector, AdapterExecutable, AttachArguments, Capabilities, ContinueArguments,
    DebugChannel, DisconnectArguments, EvaluateArguments, EvaluateResponseBody, Event,
    EventSubscription, InitializeArguments, LaunchArguments, PauseArguments, ScopesArguments,
    SetBreakpointsArguments, SetExceptionBreakpointsArguments, Source, SourceArguments,
    SourceBreakpoint, StackFrame, StackTraceArguments, StepArguments, StoppedEventBody,
    ThreadEventBody, Variable, VariablesArguments,
};

use super::breakpoints::{Breakpoint, BreakpointRegistry};
use super::source_cache::SourceCache;
use super::threads::{Thread, ThreadRegistry};

const PENDING_MESSAGE: &str = "Breakpoint pending until program starts.";
const UNVERIFIED_MESSAGE: &str =
    "Could not set this breakpoint. The module may not have been loaded yet.";

/// Debug session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the adapter's initialized event
    Initializing,
    /// Waiting for the user to issue 'run' after setting breakpoints
    Configuring,
    /// Program is running
    Running,
    /// Program has stopped (breakpoint, step, pause)
    Stopped,
    /// Program is gone
    Terminated,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initializing => write!(f, "initializing"),
            Self::Configuring => write!(f, "configuring"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// What to do with the target once the adapter is up
#[derive(Debug, Clone)]
pub enum AdapterAction {
    Launch(LaunchArguments),
    Attach(AttachArguments),
}

/// Everything needed to (re)start a session
#[derive(Debug, Clone)]
pub struct AdapterDescription {
    pub executable: AdapterExecutable,
    /// Sent as `adapterID` in the initialize request
    pub adapter_id: String,
    pub action: AdapterAction,
}

impl AdapterDescription {
    pub fn is_launch(&self) -> bool {
        matches!(self.action, AdapterAction::Launch(_))
    }
}

/// Result of setting a breakpoint
#[derive(Debug, Clone, PartialEq)]
pub struct BreakpointSetResult {
    pub index: u32,
    pub message: Option<String>,
}

/// Variables of one scope of the selected frame
#[derive(Debug, Clone)]
pub struct VariablesInScope {
    pub expensive: bool,
    pub scope_name: String,
    /// `None` when the scope was not fetched
    pub variables: Option<Vec<Variable>>,
}

/// Top-of-stack location printed on a first stop
#[derive(Debug, Clone)]
struct TopOfStack {
    name: String,
    line: u32,
    text: String,
}

/// Something that happened on the adapter side
#[derive(Debug)]
pub enum EngineEvent {
    /// An adapter event, tagged with the session that produced it
    Adapter { generation: u64, event: Event },
    /// The session's event stream ended (adapter exited or crashed)
    ChannelClosed { generation: u64 },
    /// The adapter answered the launch or attach request
    StartCompleted { generation: u64, result: Result<()> },
}

struct ActiveSession {
    channel: Arc<dyn DebugChannel>,
    events: EventSubscription,
    events_ended: bool,
    /// Outstanding launch or attach request
    start_response: Option<JoinHandle<Result<()>>>,
}

/// The debug session engine
pub struct Engine {
    connector: Arc<dyn AdapterConnector>,
    console: Arc<dyn Console>,
    adapter: Option<AdapterDescription>,
    session: Option<ActiveSession>,
    /// Incremented for every new session; events from older ones are stale
    generation: u64,
    state: SessionState,
    capabilities: Capabilities,
    breakpoints: BreakpointRegistry,
    threads: ThreadRegistry,
    sources: SourceCache,
    suppressed_output: Vec<String>,
    shutdown_requested: bool,
}

impl Engine {
    pub fn new(connector: Arc<dyn AdapterConnector>, console: Arc<dyn Console>) -> Self {
        Self {
            connector,
            console,
            adapter: None,
            session: None,
            generation: 0,
            state: SessionState::Initializing,
            capabilities: Capabilities::default(),
            breakpoints: BreakpointRegistry::new(),
            threads: ThreadRegistry::new(),
            sources: SourceCache::new(),
            suppressed_output: vec!["stderr".to_string(), "telemetry".to_string()],
            shutdown_requested: false,
        }
    }

    /// Output event categories that are dropped instead of printed
    pub fn with_suppressed_output(mut self, categories: Vec<String>) -> Self {
        self.suppressed_output = categories;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn adapter(&self) -> Option<&AdapterDescription> {
        self.adapter.as_ref()
    }

    pub fn console(&self) -> Arc<dyn Console> {
        Arc::clone(&self.console)
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// Set when an attached target has gone away; the host should exit
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested
    }

    // === Guards ===

    /// Channel of the active session, after checking the state allows use
    fn ensure_session(&self, allow_before_launch: bool) -> Result<Arc<dyn DebugChannel>> {
        let session = self.session.as_ref().ok_or(Error::SessionNotActive)?;

        if !allow_before_launch
            && matches!(
                self.state,
                SessionState::Initializing | SessionState::Configuring
            )
        {
            return Err(Error::NotYetRunning);
        }

        Ok(Arc::clone(&session.channel))
    }

    // === Lifecycle ===

    /// Start debugging from scratch with a fresh breakpoint list
    #[tracing::instrument(skip_all, fields(adapter = %adapter.adapter_id, launch = adapter.is_launch()))]
    pub async fn launch(&mut self, adapter: AdapterDescription) -> Result<()> {
        self.adapter = Some(adapter);
        self.breakpoints = BreakpointRegistry::new();
        self.relaunch().await
    }

    /// Tear down the current session and start a new one for the same
    /// target, keeping breakpoints
    ///
    /// Returns once the launch or attach request is sent. Some adapters only
    /// answer it after configuration is done, so the response arrives later
    /// as [`EngineEvent::StartCompleted`].
    pub async fn relaunch(&mut self) -> Result<()> {
        let adapter = self.adapter.clone().ok_or(Error::NothingToRelaunch)?;

        self.set_state(SessionState::Initializing);
        self.close_session().await?;
        self.create_session(&adapter).await?;

        let channel = self.ensure_session(true)?;
        let action = adapter.action.clone();
        let request = tokio::spawn(async move {
            match &action {
                AdapterAction::Attach(args) => channel.attach(args).await,
                AdapterAction::Launch(args) => channel.launch(args).await,
            }
        });
        if let Some(session) = self.session.as_mut() {
            session.start_response = Some(request);
        }

        tracing::info!(generation = self.generation, "Session started");
        Ok(())
    }

    async fn create_session(&mut self, adapter: &AdapterDescription) -> Result<()> {
        self.console.stop_input();
        self.threads = ThreadRegistry::new();

        let connection = self.connector.connect(&adapter.executable).await?;
        self.generation += 1;
        self.session = Some(ActiveSession {
            channel: Arc::clone(&connection.channel),
            events: connection.events,
            events_ended: false,
            start_response: None,
        });

        let args = InitializeArguments {
            adapter_id: adapter.adapter_id.clone(),
            ..Default::default()
        };
        self.capabilities = connection.channel.initialize(&args).await?;
        tracing::debug!(capabilities = ?self.capabilities, "Adapter initialized");
        Ok(())
    }

    /// Disconnect and forget the active session, if any
    ///
    /// The event subscription is closed first so nothing from the old
    /// session can reach the registries afterwards.
    pub async fn close_session(&mut self) -> Result<()> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };
        session.events.close();
        if let Some(request) = session.start_response.take() {
            request.abort();
        }

        let args = DisconnectArguments {
            restart: false,
            terminate_debuggee: Some(self.adapter.as_ref().is_some_and(|a| a.is_launch())),
        };
        // The adapter may exit before answering
        if let Err(e) = session.channel.disconnect(&args).await {
            tracing::warn!(error = %e, "Disconnect failed");
        }

        self.threads = ThreadRegistry::new();
        self.sources.flush();
        tracing::info!(generation = self.generation, "Session closed");
        Ok(())
    }

    /// Leave the configuring state and let the program run
    pub async fn run(&mut self) -> Result<()> {
        let launching = self.adapter.as_ref().is_some_and(|a| a.is_launch());
        if self.state != SessionState::Configuring || !launching {
            return Err(Error::NothingToRun);
        }
        self.configuration_done().await
    }

    async fn configuration_done(&mut self) -> Result<()> {
        let channel = self.ensure_session(true)?;
        self.set_state(SessionState::Running);

        self.reset_all_breakpoints(&channel).await?;

        // Sent after breakpoints; some adapters misbehave otherwise
        channel
            .set_exception_breakpoints(&SetExceptionBreakpointsArguments::default())
            .await?;

        if self.capabilities.supports_configuration_done_request {
            channel.configuration_done().await?;
        }

        if let Err(e) = self.cache_threads().await {
            tracing::warn!(error = %e, "Failed to fetch thread list");
        }
        self.console.stop_input();
        Ok(())
    }

    /// Pause the focus thread, or the first known thread
    pub async fn break_into(&mut self) -> Result<()> {
        let channel = self.ensure_session(false)?;
        let thread = self
            .threads
            .focus_thread()
            .or_else(|| self.threads.all_threads().first());
        let Some(thread) = thread else {
            return Ok(());
        };

        channel
            .pause(&PauseArguments {
                thread_id: thread.id(),
            })
            .await
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            tracing::debug!(from = %self.state, to = %state, "State transition");
            self.state = state;
        }
    }

    fn request_host_shutdown(&mut self) {
        tracing::info!("Attached target is gone; requesting host shutdown");
        self.shutdown_requested = true;
    }

    // === Threads and execution control ===

    pub fn threads(&self) -> Result<&ThreadRegistry> {
        self.ensure_session(false)?;
        Ok(&self.threads)
    }

    /// The focus thread
    pub fn active_thread(&self) -> Result<&Thread> {
        self.ensure_session(false)?;
        self.threads.focus_thread().ok_or(Error::NoFocusThread)
    }

    /// Make another known thread the focus thread
    pub fn set_focus_thread(&mut self, thread_id: i64) -> Result<()> {
        self.ensure_session(false)?;
        self.threads.set_focus_thread(thread_id)
    }

    async fn cache_threads(&mut self) -> Result<()> {
        let channel = self.ensure_session(true)?;
        let threads = channel.threads().await?;
        self.threads.update_threads(
            threads
                .into_iter()
                .map(|t| Thread::new(t.id, t.name))
                .collect(),
        );
        Ok(())
    }

    pub async fn continue_execution(&mut self) -> Result<()> {
        let channel = self.ensure_session(false)?;
        let thread_id = self.active_thread()?.id();
        let body = channel
            .continue_execution(&ContinueArguments { thread_id })
            .await?;
        // Adapters need not send a continued event for this request
        self.on_continued(thread_id, body.all_threads_continued);
        Ok(())
    }

    pub async fn step_in(&mut self) -> Result<()> {
        let channel = self.ensure_session(false)?;
        let thread_id = self.active_thread()?.id();
        channel.step_in(&StepArguments { thread_id }).await
    }

    pub async fn step_over(&mut self) -> Result<()> {
        let channel = self.ensure_session(false)?;
        let thread_id = self.active_thread()?.id();
        channel.next(&StepArguments { thread_id }).await
    }

    // === Stack and variables ===

    pub async fn get_stack_trace(&self, thread_id: i64, levels: i64) -> Result<Vec<StackFrame>> {
        let channel = self.ensure_session(false)?;
        channel
            .stack_trace(&StackTraceArguments {
                thread_id,
                start_frame: None,
                levels: Some(levels),
            })
            .await
    }

    pub async fn set_selected_stack_frame(&mut self, thread_id: i64, index: usize) -> Result<()> {
        let frames = self.get_stack_trace(thread_id, index as i64 + 1).await?;
        if frames.get(index).is_none() {
            return Err(Error::FrameNotFound {
                index,
                available: frames.len(),
            });
        }
        self.threads
            .get_thread_by_id_mut(thread_id)?
            .set_selected_stack_frame(index);
        Ok(())
    }

    /// Selected frame of the focus thread (top of stack if none selected)
    pub async fn get_current_stack_frame(&self) -> Result<Option<StackFrame>> {
        let thread = self.active_thread()?;
        let selected = thread.selected_stack_frame().unwrap_or(0);
        let frames = self.get_stack_trace(thread.id(), selected as i64 + 1).await?;
        Ok(frames.into_iter().nth(selected))
    }

    /// Variables of the selected frame, grouped by scope in adapter order
    ///
    /// With a scope name only that scope is fetched; otherwise every scope
    /// that is not marked expensive.
    pub async fn get_variables(&self, selected_scope: Option<&str>) -> Result<Vec<VariablesInScope>> {
        let channel = self.ensure_session(false)?;
        let Some(frame) = self.get_current_stack_frame().await? else {
            return Ok(Vec::new());
        };

        let scopes = channel.scopes(&ScopesArguments { frame_id: frame.id }).await?;

        let queries: Vec<_> = match selected_scope {
            Some(name) => {
                let matching: Vec<_> = scopes.iter().filter(|s| s.name == name).collect();
                if matching.is_empty() {
                    return Err(Error::ScopeNotFound(name.to_string()));
                }
                matching
            }
            None => scopes.iter().filter(|s| !s.expensive).collect(),
        };

        let fetches = queries.iter().map(|scope| {
            let channel = &channel;
            async move {
                let variables = channel
                    .variables(&VariablesArguments {
                        variables_reference: scope.variables_reference,
                    })
                    .await?;
                Ok::<_, Error>((scope.variables_reference, variables))
            }
        });
        let mut fetched: HashMap<i64, Vec<Variable>> =
            try_join_all(fetches).await?.into_iter().collect();

        Ok(scopes
            .into_iter()
            .map(|scope| VariablesInScope {
                expensive: scope.expensive,
                variables: fetched.remove(&scope.variables_reference),
                scope_name: scope.name,
            })
            .collect())
    }

    pub async fn evaluate_expression(&self, expression: &str) -> Result<EvaluateResponseBody> {
        let channel = self.ensure_session(false)?;
        let frame = self.get_current_stack_frame().await?;
        channel
            .evaluate(&EvaluateArguments {
                expression: expression.to_string(),
                frame_id: frame.map(|f| f.id),
                context: Some("repl".to_string()),
            })
            .await
    }

    // === Source ===

    /// Lines `start..start + length` (1-based, inclusive start) of a source
    ///
    /// Adapter-held sources (non-zero reference) win over local paths.
    pub async fn get_source_lines(
        &mut self,
        source: &Source,
        start: usize,
        length: usize,
    ) -> Result<Vec<String>> {
        let lines = match (source.source_reference, source.path.as_deref()) {
            (Some(reference), _) if reference != 0 => {
                let channel = self.ensure_session(false)?;
                self.sources
                    .get_by_reference(reference, move |source_reference| async move {
                        channel.source(&SourceArguments { source_reference }).await
                    })
                    .await?
            }
            (_, Some(path)) => self.sources.get_by_path(path).await?,
            _ => return Ok(Vec::new()),
        };

        let start = start.max(1);
        if start > lines.len() {
            return Ok(Vec::new());
        }
        let end = (start - 1).saturating_add(length).min(lines.len());
        Ok(lines[start - 1..end].to_vec())
    }

    // === Breakpoints ===

    pub fn breakpoints(&self) -> &BreakpointRegistry {
        &self.breakpoints
    }

    pub fn get_all_breakpoints(&self) -> &[Breakpoint] {
        self.breakpoints.get_all_breakpoints()
    }

    pub fn get_breakpoint_by_index(&self, index: u32) -> Result<&Breakpoint> {
        self.breakpoints.get_breakpoint_by_index(index)
    }

    /// Add a source breakpoint; pushed right away if the program is running
    pub async fn set_source_breakpoint(&mut self, path: &str, line: u32) -> Result<BreakpointSetResult> {
        // Allowed before the program is launched
        let channel = self.ensure_session(true)?;
        let index = self.breakpoints.add_source_breakpoint(path, line);

        if matches!(
            self.state,
            SessionState::Initializing | SessionState::Configuring
        ) {
            return Ok(BreakpointSetResult {
                index,
                message: Some(PENDING_MESSAGE.to_string()),
            });
        }

        self.push_breakpoints_for_path(&channel, path).await?;
        let message = self
            .breakpoints
            .get_breakpoint_by_index(index)
            .ok()
            .and_then(|bp| bp.message().map(str::to_string));
        Ok(BreakpointSetResult { index, message })
    }

    /// Enable or disable a breakpoint; only sticks if the adapter accepts it
    pub async fn set_breakpoint_enabled(&mut self, index: u32, enabled: bool) -> Result<()> {
        let channel = self.ensure_session(false)?;
        let breakpoint = self.breakpoints.get_breakpoint_by_index_mut(index)?;
        if breakpoint.enabled() == enabled {
            return Ok(());
        }

        breakpoint.set_enabled(enabled);
        let Some(path) = breakpoint.path().map(str::to_string) else {
            return Ok(());
        };

        if let Err(e) = self.push_breakpoints_for_path(&channel, &path).await {
            if let Ok(bp) = self.breakpoints.get_breakpoint_by_index_mut(index) {
                bp.set_enabled(!enabled);
            }
            return Err(e);
        }
        Ok(())
    }

    pub async fn delete_breakpoint(&mut self, index: u32) -> Result<()> {
        let channel = self.ensure_session(false)?;
        let removed = self.breakpoints.delete_breakpoint(index)?;

        if let Some(path) = removed.path() {
            self.push_breakpoints_for_path(&channel, path).await?;
        }
        Ok(())
    }

    /// The enabled breakpoints of a path, as a set-breakpoints request
    fn request_for_path(&self, path: &str) -> (Vec<u32>, SetBreakpointsArguments) {
        let enabled = self.breakpoints.get_all_enabled_breakpoints_for_source(path);
        let indices = enabled.iter().map(|bp| bp.index()).collect();
        let args = SetBreakpointsArguments {
            source: Source::from_path(path),
            breakpoints: enabled
                .iter()
                .map(|bp| SourceBreakpoint {
                    line: bp.line(),
                    column: None,
                    condition: None,
                })
                .collect(),
        };
        (indices, args)
    }

    /// Replace the adapter's breakpoints for one path with our enabled set
    async fn push_breakpoints_for_path(
        &mut self,
        channel: &Arc<dyn DebugChannel>,
        path: &str,
    ) -> Result<()> {
        let (indices, args) = self.request_for_path(path);
        let descriptors = channel.set_breakpoints(&args).await?;
        self.reconcile(path, &indices, &descriptors)
    }

    /// Push every enabled breakpoint, one concurrent request per path
    async fn reset_all_breakpoints(&mut self, channel: &Arc<dyn DebugChannel>) -> Result<()> {
        let paths: Vec<String> = self
            .breakpoints
            .get_all_enabled_breakpoints_by_path()
            .keys()
            .map(|p| p.to_string())
            .collect();
        let requests: Vec<_> = paths
            .iter()
            .map(|path| {
                let (indices, args) = self.request_for_path(path);
                (path.as_str(), indices, args)
            })
            .collect();

        let responses =
            try_join_all(requests.iter().map(|(_, _, args)| channel.set_breakpoints(args))).await?;

        for ((path, indices, _), descriptors) in requests.iter().zip(responses) {
            self.reconcile(path, indices, &descriptors)?;
        }
        Ok(())
    }

    /// Apply a set-breakpoints response, pairing descriptors by position
    fn reconcile(
        &mut self,
        path: &str,
        indices: &[u32],
        descriptors: &[dap::Breakpoint],
    ) -> Result<()> {
        if descriptors.len() != indices.len() {
            return Err(Error::DapProtocol(format!(
                "setBreakpoints for {} returned {} breakpoints, {} were requested",
                path,
                descriptors.len(),
                indices.len()
            )));
        }

        for (&index, descriptor) in indices.iter().zip(descriptors) {
            let Ok(breakpoint) = self.breakpoints.get_breakpoint_by_index_mut(index) else {
                continue;
            };

            match descriptor.id {
                Some(id) => {
                    // Later breakpoint events may flip verification
                    breakpoint.set_adapter_id(id);
                    breakpoint.set_verified(descriptor.verified);
                    breakpoint.set_message(descriptor.message.clone());
                }
                None => {
                    // Without an id we will never hear about this one again
                    breakpoint.set_verified(true);
                    let message = match &descriptor.message {
                        Some(m) if !m.is_empty() => Some(m.clone()),
                        _ if !descriptor.verified => Some(UNVERIFIED_MESSAGE.to_string()),
                        _ => None,
                    };
                    breakpoint.set_message(message);
                }
            }
            tracing::debug!(
                index,
                adapter_id = ?descriptor.id,
                verified = breakpoint.verified(),
                "Breakpoint reconciled"
            );
        }
        Ok(())
    }

    // === Events ===

    /// Wait for the next event of the active session
    ///
    /// Never resolves while there is no session. Cancel safe.
    pub async fn next_event(&mut self) -> EngineEvent {
        let generation = self.generation;
        let Some(session) = self.session.as_mut() else {
            return std::future::pending().await;
        };
        let ActiveSession {
            events,
            events_ended,
            start_response,
            ..
        } = session;

        tokio::select! {
            biased;
            event = events.recv(), if !*events_ended => match event {
                Some(event) => EngineEvent::Adapter { generation, event },
                None => {
                    *events_ended = true;
                    EngineEvent::ChannelClosed { generation }
                }
            },
            result = wait_start_response(start_response) => {
                EngineEvent::StartCompleted { generation, result }
            }
        }
    }

    /// Apply one event. Failures are logged, never returned.
    pub async fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Adapter { generation, event } => {
                if generation != self.generation || self.session.is_none() {
                    tracing::debug!(generation, event = event.name(), "Dropping stale event");
                    return;
                }
                tracing::debug!(event = event.name(), state = %self.state, "Handling event");
                self.dispatch_event(event).await;
            }
            EngineEvent::ChannelClosed { generation } => {
                if generation != self.generation || self.session.is_none() {
                    return;
                }
                self.on_channel_closed().await;
            }
            EngineEvent::StartCompleted { generation, result } => {
                if generation != self.generation || self.session.is_none() {
                    return;
                }
                self.on_start_completed(result).await;
            }
        }
    }

    async fn dispatch_event(&mut self, event: Event) {
        match event {
            Event::Initialized => self.on_initialized().await,
            Event::Output(body) => {
                let category = body.category.as_deref().unwrap_or("console");
                if !self.suppressed_output.iter().any(|c| c == category) {
                    self.console.output(&body.output);
                }
            }
            Event::Continued {
                thread_id,
                all_threads_continued,
            } => self.on_continued(thread_id, all_threads_continued),
            Event::Stopped(body) => self.on_stopped(body).await,
            Event::Thread(body) => self.on_thread(body).await,
            Event::Exited(body) => {
                self.set_state(SessionState::Terminated);
                self.console
                    .output_line(&format!("Target exited with status {}", body.exit_code));
                self.on_target_gone().await;
            }
            Event::Terminated(_) => {
                // Some adapters send more than one
                if !matches!(self.state, SessionState::Running | SessionState::Stopped) {
                    tracing::debug!(state = %self.state, "Ignoring terminated event");
                    return;
                }
                self.set_state(SessionState::Terminated);
                self.console.output_line("The target has exited.");
                self.on_target_gone().await;
            }
            Event::Breakpoint { reason, breakpoint } => {
                let Some(id) = breakpoint.id else {
                    return;
                };
                if reason != "new" && reason != "changed" {
                    return;
                }
                match self.breakpoints.get_breakpoint_by_id_mut(id) {
                    Ok(bp) => {
                        bp.set_verified(breakpoint.verified);
                        tracing::debug!(index = bp.index(), id, verified = breakpoint.verified, "Breakpoint verification changed");
                    }
                    Err(e) => tracing::warn!(error = %e, "Failed to verify breakpoint"),
                }
            }
            Event::Unknown { event, .. } => {
                tracing::debug!(event = %event, "Ignoring unhandled event");
            }
        }
    }

    async fn on_initialized(&mut self) {
        let Some(adapter) = self.adapter.as_ref() else {
            return;
        };
        let attaching = !adapter.is_launch();
        self.set_state(SessionState::Configuring);

        // An attached process is already running; nothing to configure
        if attaching {
            if let Err(e) = self.configuration_done().await {
                self.console.output_line("Failed to initialize debugging session.");
                self.console.output_line(&e.to_string());
                if let Err(e) = self.close_session().await {
                    tracing::warn!(error = %e, "Failed to close session");
                }
            }
            return;
        }

        // Let the user set breakpoints before 'run'
        self.console.start_input();
    }

    fn on_continued(&mut self, thread_id: i64, all_threads_continued: bool) {
        if all_threads_continued {
            self.threads.mark_all_threads_running();
        } else if let Err(e) = self.threads.mark_thread_running(thread_id) {
            tracing::debug!(error = %e, "Continued event for unknown thread");
        }

        // Only close the prompt once everything is moving again
        if self.threads.all_threads_running() {
            if self.state == SessionState::Stopped {
                self.set_state(SessionState::Running);
            }
            self.console.stop_input();
        }
    }

    async fn on_stopped(&mut self, body: StoppedEventBody) {
        if let Some(description) = &body.description {
            self.console.output_line(description);
        }

        let first_stop = self.threads.all_threads_running();

        if body.all_threads_stopped {
            if self.threads.is_empty() {
                if let Err(e) = self.cache_threads().await {
                    tracing::warn!(error = %e, "Failed to fetch thread list");
                }
            }
            if let Some(id) = body.thread_id {
                self.ensure_thread_known(id);
            }
            self.threads.mark_all_threads_stopped();
            let ids: Vec<i64> = self.threads.all_threads().iter().map(|t| t.id()).collect();
            for id in ids {
                if let Ok(thread) = self.threads.get_thread_by_id_mut(id) {
                    thread.clear_selected_stack_frame();
                }
            }
        } else if let Some(id) = body.thread_id {
            self.ensure_thread_known(id);
            if let Ok(thread) = self.threads.get_thread_by_id_mut(id) {
                thread.clear_selected_stack_frame();
            }
            let _ = self.threads.mark_thread_stopped(id);
        } else {
            tracing::warn!(reason = %body.reason, "Stop event with no thread information ignored");
            self.console
                .output_line("stop event with no thread information ignored.");
            return;
        }

        if matches!(self.state, SessionState::Running | SessionState::Stopped) {
            self.set_state(SessionState::Stopped);
        }

        if !first_stop {
            return;
        }

        let focus = body.thread_id.or_else(|| self.threads.first_stopped_thread());
        let Some(focus) = focus else {
            tracing::warn!("Stop event left no stopped thread to focus");
            self.console.start_input();
            return;
        };
        if let Err(e) = self.threads.set_focus_thread(focus) {
            tracing::warn!(error = %e, "Failed to focus stopped thread");
        }

        match self.top_of_stack_source_info(focus).await {
            Ok(Some(top)) => self
                .console
                .output_line(&format!("{}:{} {}", top.name, top.line, top.text)),
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to fetch top of stack"),
        }

        self.console.start_input();
    }

    /// Insert a placeholder for a thread id we have not seen yet
    fn ensure_thread_known(&mut self, id: i64) {
        if self.threads.get_thread_by_id(id).is_err() {
            self.threads.add_thread(Thread::new(id, format!("thread {}", id)));
        }
    }

    async fn on_thread(&mut self, body: ThreadEventBody) {
        match body.reason.as_str() {
            "started" => {
                // Placeholder first, so queries before the refresh see it
                self.threads
                    .add_thread(Thread::new(body.thread_id, format!("thread {}", body.thread_id)));
                if let Err(e) = self.cache_threads().await {
                    tracing::warn!(error = %e, "Failed to refresh thread list");
                }
            }
            "exited" => self.threads.remove_thread(body.thread_id),
            other => tracing::debug!(reason = other, thread_id = body.thread_id, "Thread event"),
        }
    }

    /// Debuggee ended: relaunch what we launched, give up on what we attached to
    async fn on_target_gone(&mut self) {
        let Some(adapter) = self.adapter.as_ref() else {
            return;
        };

        if adapter.is_launch() {
            if let Err(e) = self.relaunch().await {
                self.console.output_line(&format!("Failed to relaunch: {}", e));
            }
            return;
        }

        self.request_host_shutdown();
    }

    /// A refused launch or attach ends the session
    async fn on_start_completed(&mut self, result: Result<()>) {
        let launching = self.adapter.as_ref().is_some_and(|a| a.is_launch());
        let verb = if launching { "launch" } else { "attach" };
        let Err(e) = result else {
            tracing::debug!(state = %self.state, "Adapter accepted {}", verb);
            return;
        };

        tracing::warn!(error = %e, "Adapter refused {}", verb);
        self.console.output_line(&format!("Failed to {}: {}", verb, e));
        self.set_state(SessionState::Terminated);
        if let Err(e) = self.close_session().await {
            tracing::warn!(error = %e, "Failed to close session");
        }

        if launching {
            // 'restart' can try again
            self.console.start_input();
        } else {
            self.request_host_shutdown();
        }
    }

    async fn on_channel_closed(&mut self) {
        self.console.output_line("The debug adapter has exited.");
        self.set_state(SessionState::Terminated);
        if let Err(e) = self.close_session().await {
            tracing::warn!(error = %e, "Failed to close session");
        }
        if self.adapter.as_ref().is_some_and(|a| !a.is_launch()) {
            self.request_host_shutdown();
        }
    }

    async fn top_of_stack_source_info(&mut self, thread_id: i64) -> Result<Option<TopOfStack>> {
        let frames = self.get_stack_trace(thread_id, 1).await?;
        let Some(frame) = frames.into_iter().next() else {
            return Ok(None);
        };
        let Some(source) = frame.source.clone() else {
            return Ok(None);
        };

        let name = match (&source.path, &source.name) {
            (Some(path), _) => Path::new(path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.clone()),
            (None, Some(name)) => name.clone(),
            (None, None) => return Ok(None),
        };

        let text = match self.get_source_lines(&source, frame.line as usize, 1).await {
            Ok(lines) => lines.into_iter().next().unwrap_or_default(),
            Err(e) => {
                tracing::debug!(error = %e, "Source text unavailable");
                String::new()
            }
        };

        Ok(Some(TopOfStack {
            name,
            line: frame.line,
            text,
        }))
    }
}

/// Wait for the outstanding launch or attach response, if any
///
/// Cancel safe: the request keeps running in its own task.
async fn wait_start_response(pending: &mut Option<JoinHandle<Result<()>>>) -> Result<()> {
    let Some(request) = pending.as_mut() else {
        return std::future::pending().await;
    };
    let result = request
        .await
        .unwrap_or_else(|e| Err(Error::DapProtocol(format!("Start request did not complete: {}", e))));
    *pending = None;
    result
}
