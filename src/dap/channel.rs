//! Transport-agnostic adapter channel
//!
//! The session engine only ever talks to an adapter through these two
//! collaborators: a [`DebugChannel`] that issues requests and a per-session
//! [`EventSubscription`] that delivers events. [`AdapterConnector`] turns an
//! executable description into both.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::common::{Error, Result};

use super::types::*;

/// How to start an adapter process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterExecutable {
    pub command: PathBuf,
    pub args: Vec<String>,
}

/// Decode a response body, treating an absent body as an empty object
fn decode<T: DeserializeOwned>(command: &str, body: Value) -> Result<T> {
    let body = if body.is_null() {
        Value::Object(Map::new())
    } else {
        body
    };
    serde_json::from_value(body)
        .map_err(|e| Error::DapProtocol(format!("Failed to parse {} response: {}", command, e)))
}

fn encode<A: Serialize>(args: &A) -> Result<Option<Value>> {
    Ok(Some(serde_json::to_value(args)?))
}

/// Request side of an adapter connection
///
/// Implementors provide [`DebugChannel::request`]; the typed helpers are
/// built on top of it. Requests take `&self` so independent requests can be
/// in flight at the same time.
#[async_trait]
pub trait DebugChannel: Send + Sync {
    /// Send a request and return its response body (`Value::Null` if none).
    /// A response with `success: false` is an error.
    async fn request(&self, command: &str, arguments: Option<Value>) -> Result<Value>;

    async fn initialize(&self, args: &InitializeArguments) -> Result<Capabilities> {
        decode("initialize", self.request("initialize", encode(args)?).await?)
    }

    async fn launch(&self, args: &LaunchArguments) -> Result<()> {
        self.request("launch", encode(args)?).await?;
        Ok(())
    }

    async fn attach(&self, args: &AttachArguments) -> Result<()> {
        self.request("attach", encode(args)?).await?;
        Ok(())
    }

    async fn disconnect(&self, args: &DisconnectArguments) -> Result<()> {
        self.request("disconnect", encode(args)?).await?;
        Ok(())
    }

    async fn set_breakpoints(&self, args: &SetBreakpointsArguments) -> Result<Vec<Breakpoint>> {
        let body: SetBreakpointsResponseBody =
            decode("setBreakpoints", self.request("setBreakpoints", encode(args)?).await?)?;
        Ok(body.breakpoints)
    }

    async fn set_exception_breakpoints(
        &self,
        args: &SetExceptionBreakpointsArguments,
    ) -> Result<()> {
        self.request("setExceptionBreakpoints", encode(args)?).await?;
        Ok(())
    }

    async fn configuration_done(&self) -> Result<()> {
        self.request("configurationDone", None).await?;
        Ok(())
    }

    async fn stack_trace(&self, args: &StackTraceArguments) -> Result<Vec<StackFrame>> {
        let body: StackTraceResponseBody =
            decode("stackTrace", self.request("stackTrace", encode(args)?).await?)?;
        Ok(body.stack_frames)
    }

    async fn scopes(&self, args: &ScopesArguments) -> Result<Vec<Scope>> {
        let body: ScopesResponseBody = decode("scopes", self.request("scopes", encode(args)?).await?)?;
        Ok(body.scopes)
    }

    async fn variables(&self, args: &VariablesArguments) -> Result<Vec<Variable>> {
        let body: VariablesResponseBody =
            decode("variables", self.request("variables", encode(args)?).await?)?;
        Ok(body.variables)
    }

    async fn continue_execution(&self, args: &ContinueArguments) -> Result<ContinueResponseBody> {
        decode("continue", self.request("continue", encode(args)?).await?)
    }

    async fn next(&self, args: &StepArguments) -> Result<()> {
        self.request("next", encode(args)?).await?;
        Ok(())
    }

    async fn step_in(&self, args: &StepArguments) -> Result<()> {
        self.request("stepIn", encode(args)?).await?;
        Ok(())
    }

    async fn pause(&self, args: &PauseArguments) -> Result<()> {
        self.request("pause", encode(args)?).await?;
        Ok(())
    }

    async fn evaluate(&self, args: &EvaluateArguments) -> Result<EvaluateResponseBody> {
        decode("evaluate", self.request("evaluate", encode(args)?).await?)
    }

    async fn threads(&self) -> Result<Vec<Thread>> {
        let body: ThreadsResponseBody = decode("threads", self.request("threads", None).await?)?;
        Ok(body.threads)
    }

    async fn source(&self, args: &SourceArguments) -> Result<String> {
        let body: SourceResponseBody = decode("source", self.request("source", encode(args)?).await?)?;
        Ok(body.content)
    }
}

/// Event side of an adapter connection
///
/// One subscription exists per session. Closing or dropping it detaches
/// the engine from that session's event stream for good.
#[derive(Debug)]
pub struct EventSubscription {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl EventSubscription {
    pub fn new(rx: mpsc::UnboundedReceiver<Event>) -> Self {
        Self { rx }
    }

    /// Wait for the next event. Returns `None` once the adapter side is gone.
    ///
    /// Cancel safe: no event is lost if the future is dropped.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Stop accepting events; anything already queued is discarded
    pub fn close(&mut self) {
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
    }
}

/// A live adapter connection
pub struct Connection {
    pub channel: Arc<dyn DebugChannel>,
    pub events: EventSubscription,
}

/// Obtains a connection from an adapter executable description
#[async_trait]
pub trait AdapterConnector: Send + Sync {
    async fn connect(&self, adapter: &AdapterExecutable) -> Result<Connection>;
}
