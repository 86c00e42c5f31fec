//! Session engine scenarios against an in-process fake adapter
//!
//! The fake records every request, answers with sensible defaults, and can
//! be scripted per command with a queue of responses (including failures).
//! Events are pushed into the engine's subscription and then pumped through
//! `next_event`/`handle_event` the same way the host loop does.

use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify};

use dapshell::common::config::ConsoleConfig;
use dapshell::console::{CommandDispatcher, Console, MemoryConsole};
use dapshell::dap::{
    AdapterConnector, AdapterExecutable, AttachArguments, Connection, DebugChannel, Event,
    EventMessage, EventSubscription, LaunchArguments, Source,
};
use dapshell::engine::EngineEvent;
use dapshell::{AdapterAction, AdapterDescription, Engine, Error, Result, SessionState};

// === Fake adapter ===

#[derive(Default)]
struct FakeAdapter {
    requests: Mutex<Vec<(String, Value)>>,
    scripted: Mutex<HashMap<String, VecDeque<Result<Value>>>>,
    events: Mutex<Option<mpsc::UnboundedSender<Event>>>,
    connects: AtomicUsize,
    next_breakpoint_id: AtomicI64,
    source_path: Mutex<Option<String>>,
    no_configuration_done: std::sync::atomic::AtomicBool,
    /// Answer launch/attach only after configurationDone, like debugpy
    defer_start_response: std::sync::atomic::AtomicBool,
    configured: Notify,
}

impl FakeAdapter {
    fn script(&self, command: &str, response: Result<Value>) {
        self.scripted
            .lock()
            .unwrap()
            .entry(command.to_string())
            .or_default()
            .push_back(response);
    }

    fn emit(&self, event: Event) {
        let tx = self.events.lock().unwrap();
        tx.as_ref().unwrap().send(event).unwrap();
    }

    fn drop_events(&self) {
        self.events.lock().unwrap().take();
    }

    fn sender(&self) -> mpsc::UnboundedSender<Event> {
        self.events.lock().unwrap().clone().unwrap()
    }

    fn commands(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(c, _)| c.clone())
            .collect()
    }

    fn count(&self, command: &str) -> usize {
        self.commands().iter().filter(|c| *c == command).count()
    }

    fn last_args(&self, command: &str) -> Value {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(c, _)| c == command)
            .map(|(_, a)| a.clone())
            .unwrap()
    }

    fn set_source_path(&self, path: &str) {
        *self.source_path.lock().unwrap() = Some(path.to_string());
    }

    fn default_response(&self, command: &str, args: &Value) -> Value {
        match command {
            "initialize" => json!({
                "supportsConfigurationDoneRequest":
                    !self.no_configuration_done.load(Ordering::SeqCst)
            }),
            "setBreakpoints" => {
                let descriptors: Vec<Value> = args["breakpoints"]
                    .as_array()
                    .cloned()
                    .unwrap_or_default()
                    .iter()
                    .map(|bp| {
                        let id = self.next_breakpoint_id.fetch_add(1, Ordering::SeqCst) + 1;
                        json!({ "id": id, "verified": true, "line": bp["line"] })
                    })
                    .collect();
                json!({ "breakpoints": descriptors })
            }
            "threads" => json!({ "threads": [{ "id": 1, "name": "main" }] }),
            "stackTrace" => {
                let source = match self.source_path.lock().unwrap().clone() {
                    Some(path) => json!({ "path": path }),
                    None => json!({ "name": "main.c", "sourceReference": 0 }),
                };
                let mut frames = vec![
                    json!({ "id": 11, "name": "main", "source": source, "line": 2, "column": 1 }),
                    json!({ "id": 12, "name": "start", "line": 0, "column": 0 }),
                ];
                if let Some(levels) = args["levels"].as_u64() {
                    frames.truncate(levels as usize);
                }
                json!({ "stackFrames": frames })
            }
            "scopes" => json!({
                "scopes": [
                    { "name": "Locals", "variablesReference": 100, "expensive": false },
                    { "name": "Globals", "variablesReference": 200, "expensive": true }
                ]
            }),
            "variables" => match args["variablesReference"].as_i64() {
                Some(100) => json!({ "variables": [
                    { "name": "x", "value": "1", "type": "int", "variablesReference": 0 }
                ]}),
                _ => json!({ "variables": [
                    { "name": "g", "value": "2", "variablesReference": 0 }
                ]}),
            },
            "evaluate" => json!({ "result": "42", "type": "int", "variablesReference": 0 }),
            "continue" => json!({ "allThreadsContinued": true }),
            _ => Value::Null,
        }
    }
}

struct FakeChannel {
    adapter: Arc<FakeAdapter>,
}

#[async_trait]
impl DebugChannel for FakeChannel {
    async fn request(&self, command: &str, arguments: Option<Value>) -> Result<Value> {
        let args = arguments.unwrap_or(Value::Null);
        self.adapter
            .requests
            .lock()
            .unwrap()
            .push((command.to_string(), args.clone()));

        match command {
            "launch" | "attach" if self.adapter.defer_start_response.load(Ordering::SeqCst) => {
                self.adapter.emit(Event::Initialized);
                self.adapter.configured.notified().await;
            }
            "configurationDone" => self.adapter.configured.notify_one(),
            _ => {}
        }

        let scripted = self
            .adapter
            .scripted
            .lock()
            .unwrap()
            .get_mut(command)
            .and_then(|q| q.pop_front());
        match scripted {
            Some(response) => response,
            None => Ok(self.adapter.default_response(command, &args)),
        }
    }
}

struct FakeConnector {
    adapter: Arc<FakeAdapter>,
}

#[async_trait]
impl AdapterConnector for FakeConnector {
    async fn connect(&self, _adapter: &AdapterExecutable) -> Result<Connection> {
        self.adapter.connects.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        *self.adapter.events.lock().unwrap() = Some(tx);
        Ok(Connection {
            channel: Arc::new(FakeChannel {
                adapter: Arc::clone(&self.adapter),
            }),
            events: EventSubscription::new(rx),
        })
    }
}

// === Helpers ===

fn event(name: &str, body: Value) -> Event {
    Event::from_message(&EventMessage {
        seq: 0,
        message_type: "event".to_string(),
        event: name.to_string(),
        body: (!body.is_null()).then_some(body),
    })
}

fn launch_action() -> AdapterAction {
    AdapterAction::Launch(LaunchArguments {
        program: "/bin/true".to_string(),
        args: Vec::new(),
        cwd: None,
        env: None,
        stop_on_entry: false,
        extra: Default::default(),
    })
}

fn attach_action() -> AdapterAction {
    AdapterAction::Attach(AttachArguments {
        pid: Some(1234),
        extra: Default::default(),
    })
}

struct Harness {
    engine: Engine,
    adapter: Arc<FakeAdapter>,
    console: Arc<MemoryConsole>,
}

impl Harness {
    fn new() -> Self {
        Self::with_adapter(FakeAdapter::default())
    }

    fn with_adapter(adapter: FakeAdapter) -> Self {
        let adapter = Arc::new(adapter);
        let console = Arc::new(MemoryConsole::new());
        let connector = Arc::new(FakeConnector {
            adapter: Arc::clone(&adapter),
        });
        let engine = Engine::new(connector, console.clone());
        Self {
            engine,
            adapter,
            console,
        }
    }

    async fn launch(&mut self, action: AdapterAction) {
        self.engine
            .launch(AdapterDescription {
                executable: AdapterExecutable {
                    command: "fake-adapter".into(),
                    args: Vec::new(),
                },
                adapter_id: "fake".to_string(),
                action,
            })
            .await
            .unwrap();
    }

    /// Launch, then deliver the initialized event (CONFIGURING for launch)
    async fn configured(&mut self, action: AdapterAction) {
        self.launch(action).await;
        self.adapter.emit(Event::Initialized);
        self.pump().await;
    }

    /// Launch and run to RUNNING
    async fn running(&mut self) {
        self.configured(launch_action()).await;
        self.engine.run().await.unwrap();
        assert_eq!(self.engine.state(), SessionState::Running);
    }

    /// Handle every event already queued
    async fn pump(&mut self) {
        while let Ok(event) =
            tokio::time::timeout(Duration::from_millis(50), self.engine.next_event()).await
        {
            self.engine.handle_event(event).await;
        }
    }

    async fn stop_thread(&mut self, thread_id: i64) {
        self.adapter.emit(event(
            "stopped",
            json!({ "reason": "breakpoint", "threadId": thread_id, "allThreadsStopped": true }),
        ));
        self.pump().await;
    }
}

fn source_file(lines: &[&str]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    for line in lines {
        writeln!(file, "{}", line).unwrap();
    }
    file
}

// === Guards ===

#[tokio::test]
async fn test_operations_without_session_fail() {
    let mut h = Harness::new();
    assert!(matches!(
        h.engine.continue_execution().await,
        Err(Error::SessionNotActive)
    ));
    assert!(matches!(
        h.engine.set_source_breakpoint("/a.js", 1).await,
        Err(Error::SessionNotActive)
    ));
    assert!(matches!(h.engine.relaunch().await, Err(Error::NothingToRelaunch)));
}

#[tokio::test]
async fn test_execution_before_run_is_not_yet_running() {
    let mut h = Harness::new();
    h.configured(launch_action()).await;
    assert_eq!(h.engine.state(), SessionState::Configuring);
    assert!(h.console.is_input_open());

    assert!(matches!(h.engine.step_in().await, Err(Error::NotYetRunning)));
    assert!(matches!(h.engine.threads(), Err(Error::NotYetRunning)));
    assert!(matches!(
        h.engine.get_stack_trace(1, 5).await,
        Err(Error::NotYetRunning)
    ));
}

#[tokio::test]
async fn test_breakpoint_before_run_is_pending() {
    let mut h = Harness::new();
    h.configured(launch_action()).await;

    let result = h.engine.set_source_breakpoint("/a.js", 4).await.unwrap();
    assert_eq!(result.index, 1);
    assert_eq!(
        result.message.as_deref(),
        Some("Breakpoint pending until program starts.")
    );
    assert_eq!(h.adapter.count("setBreakpoints"), 0);
}

#[tokio::test]
async fn test_run_requires_configuring_launch() {
    let mut h = Harness::new();
    h.launch(launch_action()).await;
    // Still initializing
    assert!(matches!(h.engine.run().await, Err(Error::NothingToRun)));

    let mut attached = Harness::new();
    attached.configured(attach_action()).await;
    assert!(matches!(attached.engine.run().await, Err(Error::NothingToRun)));
}

// === Configuration ===

#[tokio::test]
async fn test_run_configures_in_order() {
    let mut h = Harness::new();
    h.configured(launch_action()).await;
    h.engine.set_source_breakpoint("/a.js", 1).await.unwrap();
    h.engine.set_source_breakpoint("/b.js", 2).await.unwrap();

    h.engine.run().await.unwrap();

    assert_eq!(
        h.adapter.commands(),
        vec![
            "initialize",
            "launch",
            "setBreakpoints",
            "setBreakpoints",
            "setExceptionBreakpoints",
            "configurationDone",
            "threads",
        ]
    );
    assert_eq!(h.adapter.last_args("setExceptionBreakpoints")["filters"], json!([]));
    assert!(!h.console.is_input_open());
    assert_eq!(h.engine.threads().unwrap().len(), 1);
}

#[tokio::test]
async fn test_configuration_done_skipped_without_capability() {
    let adapter = FakeAdapter::default();
    adapter.no_configuration_done.store(true, Ordering::SeqCst);
    let mut h = Harness::with_adapter(adapter);
    h.running().await;
    assert_eq!(h.adapter.count("configurationDone"), 0);
    assert_eq!(h.adapter.count("setExceptionBreakpoints"), 1);
}

#[tokio::test]
async fn test_attach_configures_immediately() {
    let mut h = Harness::new();
    h.configured(attach_action()).await;
    assert_eq!(h.engine.state(), SessionState::Running);
    assert_eq!(h.adapter.count("configurationDone"), 1);
    assert_eq!(h.console.input_opened_count(), 0);
}

#[tokio::test]
async fn test_attach_configuration_failure_closes_session() {
    let mut h = Harness::new();
    h.adapter.script(
        "setExceptionBreakpoints",
        Err(Error::dap_request_failed("setExceptionBreakpoints", "nope")),
    );
    h.configured(attach_action()).await;

    let text = h.console.text();
    assert!(text.contains("Failed to initialize debugging session."));
    assert!(text.contains("nope"));
    assert!(!h.engine.has_session());
    assert_eq!(h.adapter.count("disconnect"), 1);
}

#[tokio::test]
async fn test_late_launch_response_does_not_block_events() {
    let adapter = FakeAdapter::default();
    adapter.defer_start_response.store(true, Ordering::SeqCst);
    let mut h = Harness::with_adapter(adapter);

    tokio::time::timeout(Duration::from_secs(2), h.launch(launch_action()))
        .await
        .expect("launch waited for the adapter's launch response");
    h.pump().await;
    assert_eq!(h.engine.state(), SessionState::Configuring);
    assert!(h.console.is_input_open());

    h.engine.set_source_breakpoint("/a.js", 3).await.unwrap();
    h.engine.run().await.unwrap();
    h.pump().await;

    assert_eq!(h.engine.state(), SessionState::Running);
    assert_eq!(h.adapter.count("setBreakpoints"), 1);
    assert_eq!(h.adapter.count("configurationDone"), 1);
    assert!(!h.console.text().contains("Failed to launch"));
    assert!(h.engine.has_session());
}

#[tokio::test]
async fn test_refused_launch_ends_session() {
    let mut h = Harness::new();
    h.adapter.script(
        "launch",
        Err(Error::dap_request_failed("launch", "no such program")),
    );
    h.launch(launch_action()).await;
    h.pump().await;

    assert!(h
        .console
        .text()
        .contains("Failed to launch: DAP request 'launch' failed: no such program"));
    assert!(!h.engine.has_session());
    assert_eq!(h.engine.state(), SessionState::Terminated);
    assert!(h.console.is_input_open());
    assert!(!h.engine.shutdown_requested());
}

#[tokio::test]
async fn test_refused_attach_requests_shutdown() {
    let mut h = Harness::new();
    h.adapter.script(
        "attach",
        Err(Error::dap_request_failed("attach", "permission denied")),
    );
    h.launch(attach_action()).await;
    h.pump().await;

    assert!(h.console.text().contains("Failed to attach:"));
    assert!(!h.engine.has_session());
    assert!(h.engine.shutdown_requested());
}

// === Breakpoint reconciliation ===

#[tokio::test]
async fn test_reconciliation_by_position() {
    let mut h = Harness::new();
    h.configured(launch_action()).await;
    let first = h.engine.set_source_breakpoint("/a.js", 10).await.unwrap().index;
    let second = h.engine.set_source_breakpoint("/a.js", 20).await.unwrap().index;

    h.adapter.script(
        "setBreakpoints",
        Ok(json!({ "breakpoints": [
            { "verified": true, "id": 1, "line": 10 },
            { "verified": false, "line": 20 }
        ]})),
    );
    h.engine.run().await.unwrap();

    let sent = h.adapter.last_args("setBreakpoints");
    assert_eq!(sent["source"]["path"], "/a.js");
    assert_eq!(sent["breakpoints"], json!([{ "line": 10 }, { "line": 20 }]));

    let bp = h.engine.get_breakpoint_by_index(first).unwrap();
    assert!(bp.verified());
    assert_eq!(bp.adapter_id(), Some(1));

    let bp = h.engine.get_breakpoint_by_index(second).unwrap();
    assert!(bp.verified());
    assert_eq!(bp.adapter_id(), None);
    assert!(!bp.message().unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_unverified_with_id_waits_for_event() {
    let mut h = Harness::new();
    h.running().await;
    h.adapter.script(
        "setBreakpoints",
        Ok(json!({ "breakpoints": [{ "verified": false, "id": 9, "line": 3 }] })),
    );
    let index = h.engine.set_source_breakpoint("/a.js", 3).await.unwrap().index;
    assert!(!h.engine.get_breakpoint_by_index(index).unwrap().verified());

    h.adapter.emit(event(
        "breakpoint",
        json!({ "reason": "changed", "breakpoint": { "id": 9, "verified": true } }),
    ));
    // Unknown ids are tolerated
    h.adapter.emit(event(
        "breakpoint",
        json!({ "reason": "changed", "breakpoint": { "id": 404, "verified": true } }),
    ));
    h.pump().await;

    assert!(h.engine.get_breakpoint_by_index(index).unwrap().verified());
}

#[tokio::test]
async fn test_descriptor_count_mismatch_is_protocol_error() {
    let mut h = Harness::new();
    h.running().await;
    h.adapter
        .script("setBreakpoints", Ok(json!({ "breakpoints": [] })));

    let err = h.engine.set_source_breakpoint("/a.js", 3).await.unwrap_err();
    assert!(matches!(err, Error::DapProtocol(_)));
}

#[tokio::test]
async fn test_enable_noop_skips_round_trip() {
    let mut h = Harness::new();
    h.running().await;
    let index = h.engine.set_source_breakpoint("/a.js", 3).await.unwrap().index;
    let pushes = h.adapter.count("setBreakpoints");

    h.engine.set_breakpoint_enabled(index, true).await.unwrap();
    assert_eq!(h.adapter.count("setBreakpoints"), pushes);
}

#[tokio::test]
async fn test_rejected_disable_rolls_back() {
    let mut h = Harness::new();
    h.running().await;
    let index = h.engine.set_source_breakpoint("/a.js", 3).await.unwrap().index;

    h.adapter.script(
        "setBreakpoints",
        Err(Error::dap_request_failed("setBreakpoints", "rejected")),
    );
    let err = h.engine.set_breakpoint_enabled(index, false).await.unwrap_err();
    assert!(matches!(err, Error::DapRequestFailed { .. }));
    assert!(h.engine.get_breakpoint_by_index(index).unwrap().enabled());
}

#[tokio::test]
async fn test_disable_pushes_remaining_set() {
    let mut h = Harness::new();
    h.running().await;
    let a = h.engine.set_source_breakpoint("/a.js", 3).await.unwrap().index;
    h.engine.set_source_breakpoint("/a.js", 8).await.unwrap();

    h.engine.set_breakpoint_enabled(a, false).await.unwrap();
    assert_eq!(
        h.adapter.last_args("setBreakpoints")["breakpoints"],
        json!([{ "line": 8 }])
    );
    assert!(!h.engine.get_breakpoint_by_index(a).unwrap().enabled());
}

#[tokio::test]
async fn test_delete_pushes_shorter_set() {
    let mut h = Harness::new();
    h.running().await;
    h.engine.set_source_breakpoint("/a.js", 3).await.unwrap();
    let b = h.engine.set_source_breakpoint("/a.js", 8).await.unwrap().index;

    h.engine.delete_breakpoint(b).await.unwrap();
    assert_eq!(
        h.adapter.last_args("setBreakpoints")["breakpoints"],
        json!([{ "line": 3 }])
    );
    assert!(matches!(
        h.engine.get_breakpoint_by_index(b),
        Err(Error::BreakpointNotFound(_))
    ));
}

// === Stops, threads and continues ===

#[tokio::test]
async fn test_first_stop_focuses_and_prints_location() {
    let file = source_file(&["fn main() {", "    let x = 1;", "}"]);
    let mut h = Harness::new();
    h.adapter.set_source_path(&file.path().to_string_lossy());
    h.adapter
        .script("threads", Ok(json!({ "threads": [{ "id": 3, "name": "worker" }] })));
    h.running().await;
    assert!(h.engine.threads().unwrap().all_threads_running());

    h.stop_thread(3).await;

    let threads = h.engine.threads().unwrap();
    assert!(threads.all_threads_stopped());
    assert_eq!(threads.focus_thread_id(), Some(3));
    assert_eq!(
        threads.get_thread_by_id(3).unwrap().selected_stack_frame(),
        None
    );
    assert_eq!(h.engine.state(), SessionState::Stopped);
    assert_eq!(h.adapter.count("stackTrace"), 1);

    let name = file.path().file_name().unwrap().to_string_lossy().into_owned();
    assert!(h.console.lines().contains(&format!("{}:2     let x = 1;", name)));
    assert!(h.console.is_input_open());
}

#[tokio::test]
async fn test_second_stop_is_not_a_first_stop() {
    let mut h = Harness::new();
    h.adapter.script(
        "threads",
        Ok(json!({ "threads": [{ "id": 1, "name": "a" }, { "id": 2, "name": "b" }] })),
    );
    h.running().await;

    h.adapter.emit(event("stopped", json!({ "reason": "step", "threadId": 1 })));
    h.adapter.emit(event("stopped", json!({ "reason": "step", "threadId": 2 })));
    h.pump().await;

    assert_eq!(h.adapter.count("stackTrace"), 1);
    assert_eq!(h.engine.threads().unwrap().focus_thread_id(), Some(1));
}

#[tokio::test]
async fn test_stop_without_thread_information_is_ignored() {
    let mut h = Harness::new();
    h.running().await;
    h.adapter.emit(event("stopped", json!({ "reason": "pause" })));
    h.pump().await;

    assert_eq!(h.engine.state(), SessionState::Running);
    assert!(h.engine.threads().unwrap().all_threads_running());
    assert!(h
        .console
        .text()
        .contains("stop event with no thread information ignored."));
}

#[tokio::test]
async fn test_stop_for_unknown_thread_adds_it() {
    let mut h = Harness::new();
    h.running().await;
    h.stop_thread(42).await;

    let threads = h.engine.threads().unwrap();
    assert!(threads.get_thread_by_id(42).unwrap().is_stopped());
    assert_eq!(threads.focus_thread_id(), Some(42));
}

#[tokio::test]
async fn test_stop_clears_selected_frame() {
    let mut h = Harness::new();
    h.running().await;
    h.stop_thread(1).await;

    h.engine.set_selected_stack_frame(1, 1).await.unwrap();
    assert_eq!(h.engine.active_thread().unwrap().selected_stack_frame(), Some(1));

    h.adapter.emit(event(
        "continued",
        json!({ "threadId": 1, "allThreadsContinued": true }),
    ));
    h.stop_thread(1).await;
    assert_eq!(h.engine.active_thread().unwrap().selected_stack_frame(), None);
}

#[tokio::test]
async fn test_partial_continue_keeps_input_open() {
    let mut h = Harness::new();
    h.adapter.script(
        "threads",
        Ok(json!({ "threads": [{ "id": 1, "name": "a" }, { "id": 2, "name": "b" }] })),
    );
    h.running().await;
    h.stop_thread(1).await;
    assert!(h.console.is_input_open());

    h.adapter.emit(event("continued", json!({ "threadId": 1 })));
    h.pump().await;
    assert!(h.console.is_input_open());
    assert_eq!(h.engine.state(), SessionState::Stopped);

    h.adapter.emit(event("continued", json!({ "threadId": 2 })));
    h.pump().await;
    assert!(!h.console.is_input_open());
    assert_eq!(h.engine.state(), SessionState::Running);
}

#[tokio::test]
async fn test_thread_started_and_exited() {
    let mut h = Harness::new();
    h.running().await;
    h.adapter.script(
        "threads",
        Ok(json!({ "threads": [{ "id": 1, "name": "main" }, { "id": 5, "name": "io" }] })),
    );

    h.adapter
        .emit(event("thread", json!({ "reason": "started", "threadId": 5 })));
    h.pump().await;
    assert_eq!(
        h.engine.threads().unwrap().get_thread_by_id(5).unwrap().name(),
        "io"
    );

    h.adapter
        .emit(event("thread", json!({ "reason": "exited", "threadId": 5 })));
    h.pump().await;
    assert!(h.engine.threads().unwrap().get_thread_by_id(5).is_err());
}

#[tokio::test]
async fn test_break_into_pauses_focus_thread() {
    let mut h = Harness::new();
    h.running().await;
    h.engine.break_into().await.unwrap();
    assert_eq!(h.adapter.last_args("pause")["threadId"], 1);

    // Pausing again while stopped is harmless
    h.stop_thread(1).await;
    h.engine.break_into().await.unwrap();
    assert_eq!(h.adapter.count("pause"), 2);
}

#[tokio::test]
async fn test_continue_response_resumes_without_event() {
    let mut h = Harness::new();
    h.running().await;
    h.stop_thread(1).await;
    assert!(h.console.is_input_open());
    assert_eq!(h.adapter.count("stackTrace"), 1);

    // No continued event follows
    h.engine.continue_execution().await.unwrap();
    assert!(!h.console.is_input_open());
    assert_eq!(h.engine.state(), SessionState::Running);
    assert!(h.engine.threads().unwrap().all_threads_running());

    h.stop_thread(1).await;
    assert_eq!(h.adapter.count("stackTrace"), 2);
    assert!(h.console.is_input_open());
}

#[tokio::test]
async fn test_continue_response_for_one_thread() {
    let mut h = Harness::new();
    h.adapter.script(
        "threads",
        Ok(json!({ "threads": [{ "id": 1, "name": "a" }, { "id": 2, "name": "b" }] })),
    );
    h.adapter
        .script("continue", Ok(json!({ "allThreadsContinued": false })));
    h.running().await;
    h.stop_thread(1).await;

    h.engine.continue_execution().await.unwrap();
    let threads = h.engine.threads().unwrap();
    assert!(!threads.get_thread_by_id(1).unwrap().is_stopped());
    assert!(threads.get_thread_by_id(2).unwrap().is_stopped());
    assert!(h.console.is_input_open());
    assert_eq!(h.engine.state(), SessionState::Stopped);
}

// === Inspection ===

#[tokio::test]
async fn test_variables_keep_scope_order() {
    let mut h = Harness::new();
    h.running().await;
    h.stop_thread(1).await;

    let scopes = h.engine.get_variables(None).await.unwrap();
    assert_eq!(scopes.len(), 2);
    assert_eq!(scopes[0].scope_name, "Locals");
    assert_eq!(scopes[0].variables.as_ref().unwrap()[0].name, "x");
    assert_eq!(scopes[1].scope_name, "Globals");
    assert!(scopes[1].expensive);
    assert!(scopes[1].variables.is_none());
    assert_eq!(h.adapter.last_args("scopes")["frameId"], 11);

    let globals = h.engine.get_variables(Some("Globals")).await.unwrap();
    let fetched: Vec<_> = globals.iter().filter(|s| s.variables.is_some()).collect();
    assert_eq!(fetched.len(), 1);
    assert_eq!(fetched[0].scope_name, "Globals");

    assert!(matches!(
        h.engine.get_variables(Some("Registers")).await,
        Err(Error::ScopeNotFound(_))
    ));
}

#[tokio::test]
async fn test_frame_selection_out_of_range() {
    let mut h = Harness::new();
    h.running().await;
    h.stop_thread(1).await;

    let err = h.engine.set_selected_stack_frame(1, 5).await.unwrap_err();
    assert!(matches!(err, Error::FrameNotFound { index: 5, available: 2 }));

    h.engine.set_selected_stack_frame(1, 1).await.unwrap();
    let frame = h.engine.get_current_stack_frame().await.unwrap().unwrap();
    assert_eq!(frame.id, 12);
}

#[tokio::test]
async fn test_evaluate_uses_selected_frame() {
    let mut h = Harness::new();
    h.running().await;
    h.stop_thread(1).await;

    let result = h.engine.evaluate_expression("x + 1").await.unwrap();
    assert_eq!(result.result, "42");
    let args = h.adapter.last_args("evaluate");
    assert_eq!(args["expression"], "x + 1");
    assert_eq!(args["frameId"], 11);
    assert_eq!(args["context"], "repl");
}

#[tokio::test]
async fn test_source_lines_clamped_to_file() {
    let file = source_file(&["one", "two", "three", "four", "five"]);
    let mut h = Harness::new();
    let source = Source::from_path(&file.path().to_string_lossy());

    let all = h.engine.get_source_lines(&source, 1, 10).await.unwrap();
    assert_eq!(all, vec!["one", "two", "three", "four", "five"]);

    assert!(h.engine.get_source_lines(&source, 6, 10).await.unwrap().is_empty());
    assert_eq!(
        h.engine.get_source_lines(&source, 2, 2).await.unwrap(),
        vec!["two", "three"]
    );
    assert_eq!(
        h.engine.get_source_lines(&source, 4, usize::MAX).await.unwrap(),
        vec!["four", "five"]
    );
    assert_eq!(
        h.engine.get_source_lines(&source, 0, 1).await.unwrap(),
        vec!["one"]
    );
}

#[tokio::test]
async fn test_list_from_line_zero_numbers_from_one() {
    let file = source_file(&["fn main() {", "    let x = 1;", "}"]);
    let mut h = Harness::new();
    h.adapter.set_source_path(&file.path().to_string_lossy());
    h.running().await;
    h.stop_thread(1).await;

    let dispatcher = CommandDispatcher::with_builtin_commands(&ConsoleConfig::default());
    dispatcher.dispatch(&mut h.engine, "list 0").await.unwrap();

    let lines = h.console.lines();
    assert!(lines.contains(&"      1 | fn main() {".to_string()));
    assert!(lines.contains(&"->    2 |     let x = 1;".to_string()));
    assert!(lines.contains(&"      3 | }".to_string()));
}

#[tokio::test]
async fn test_source_reference_fetched_once() {
    let mut h = Harness::new();
    h.running().await;
    h.adapter
        .script("source", Ok(json!({ "content": "a\nb\nc" })));
    let source = Source {
        name: Some("gen.js".to_string()),
        path: Some("/does/not/exist.js".to_string()),
        source_reference: Some(17),
    };

    assert_eq!(
        h.engine.get_source_lines(&source, 2, 5).await.unwrap(),
        vec!["b", "c"]
    );
    assert_eq!(
        h.engine.get_source_lines(&source, 1, 1).await.unwrap(),
        vec!["a"]
    );
    assert_eq!(h.adapter.count("source"), 1);
    assert_eq!(h.adapter.last_args("source")["sourceReference"], 17);
}

// === Output ===

#[tokio::test]
async fn test_output_categories_filtered() {
    let mut h = Harness::new();
    h.running().await;
    h.adapter
        .emit(event("output", json!({ "category": "stdout", "output": "hello\n" })));
    h.adapter
        .emit(event("output", json!({ "category": "stderr", "output": "noise\n" })));
    h.adapter
        .emit(event("output", json!({ "category": "telemetry", "output": "{}" })));
    h.pump().await;

    let text = h.console.text();
    assert!(text.contains("hello\n"));
    assert!(!text.contains("noise"));
    assert!(!text.contains("{}"));
}

// === Termination ===

#[tokio::test]
async fn test_attach_termination_requests_shutdown() {
    let mut h = Harness::new();
    h.configured(attach_action()).await;
    assert_eq!(h.engine.state(), SessionState::Running);

    h.adapter.emit(event("terminated", Value::Null));
    h.pump().await;
    assert_eq!(h.engine.state(), SessionState::Terminated);
    assert!(h.engine.shutdown_requested());
    assert_eq!(h.adapter.connects.load(Ordering::SeqCst), 1);

    h.adapter.emit(event("terminated", Value::Null));
    h.pump().await;
    assert_eq!(h.engine.state(), SessionState::Terminated);
    assert_eq!(h.console.text().matches("The target has exited.").count(), 1);
}

#[tokio::test]
async fn test_launch_exit_relaunches_with_breakpoints() {
    let mut h = Harness::new();
    h.configured(launch_action()).await;
    let index = h.engine.set_source_breakpoint("/a.js", 7).await.unwrap().index;
    h.engine.run().await.unwrap();

    h.adapter.emit(event("exited", json!({ "exitCode": 3 })));
    h.pump().await;

    assert!(h.console.text().contains("Target exited with status 3"));
    assert_eq!(h.engine.state(), SessionState::Initializing);
    assert_eq!(h.adapter.connects.load(Ordering::SeqCst), 2);
    assert!(!h.engine.shutdown_requested());
    assert!(h.engine.get_breakpoint_by_index(index).is_ok());
    assert_eq!(h.adapter.count("disconnect"), 1);
    assert_eq!(h.adapter.last_args("disconnect")["terminateDebuggee"], true);
}

#[tokio::test]
async fn test_stale_events_are_dropped() {
    let mut h = Harness::new();
    h.running().await;
    let old = h.adapter.sender();

    h.engine.relaunch().await.unwrap();
    assert_eq!(h.engine.state(), SessionState::Initializing);

    // The old subscription is closed
    assert!(old
        .send(event("stopped", json!({ "threadId": 1, "allThreadsStopped": true })))
        .is_err());

    // An event tagged with an earlier session is ignored
    h.engine
        .handle_event(EngineEvent::Adapter {
            generation: 1,
            event: Event::Initialized,
        })
        .await;
    assert_eq!(h.engine.state(), SessionState::Initializing);

    h.adapter.emit(Event::Initialized);
    h.pump().await;
    assert_eq!(h.engine.state(), SessionState::Configuring);
}

#[tokio::test]
async fn test_adapter_exit_closes_session() {
    let mut h = Harness::new();
    h.running().await;
    h.adapter.drop_events();
    h.pump().await;

    assert!(h.console.text().contains("The debug adapter has exited."));
    assert!(!h.engine.has_session());
    assert_eq!(h.engine.state(), SessionState::Terminated);
    assert!(matches!(
        h.engine.continue_execution().await,
        Err(Error::SessionNotActive)
    ));
}
