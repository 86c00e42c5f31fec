//! Mock DAP adapter binary for integration testing
//!
//! Speaks just enough of the Debug Adapter Protocol over stdio to drive a
//! full dapshell session: one thread, breakpoints that are hit in the order
//! they were set, a fixed set of variables, and a program that exits once
//! it runs past the last breakpoint. Exits after `disconnect`.

use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read, Write};

/// Reference of the synthetic source used when no breakpoint is set
const SYNTHETIC_SOURCE_REFERENCE: i64 = 7;
const SYNTHETIC_SOURCE: &str = "int main() {\n    return 0;\n}\n";

/// Lines at or above this are reported unverified and without an id
const UNVERIFIABLE_LINE: u64 = 10_000;

fn main() {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let mut reader = BufReader::new(stdin.lock());
    let mut writer = stdout.lock();

    let mut state = MockState::default();

    while let Some(message) = read_message(&mut reader) {
        for outgoing in state.process_message(&message) {
            send_message(&mut writer, &outgoing);
        }
        if state.disconnected {
            break;
        }
    }
}

fn read_message<R: BufRead>(reader: &mut R) -> Option<Value> {
    loop {
        let mut content_length = None;
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).ok()? == 0 {
                return None;
            }
            let line = line.trim();
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                if name.trim().eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse::<usize>().ok();
                }
            }
        }

        let Some(len) = content_length else {
            continue;
        };
        let mut body = vec![0u8; len];
        reader.read_exact(&mut body).ok()?;
        if let Ok(value) = serde_json::from_slice(&body) {
            return Some(value);
        }
    }
}

fn send_message<W: Write>(writer: &mut W, message: &Value) {
    let body = message.to_string();
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    writer.write_all(header.as_bytes()).ok();
    writer.write_all(body.as_bytes()).ok();
    writer.flush().ok();
}

#[derive(Default)]
struct MockState {
    seq: i64,
    attached: bool,
    disconnected: bool,
    next_breakpoint_id: i64,
    /// Verified breakpoint lines per path, as last set
    breakpoints: BTreeMap<String, Vec<u64>>,
    /// Breakpoints still ahead of the program, in hit order
    pending_hits: Vec<(String, u64)>,
    location: Option<(String, u64)>,
}

impl MockState {
    fn next_seq(&mut self) -> i64 {
        self.seq += 1;
        self.seq
    }

    fn event(&mut self, event: &str, body: Value) -> Value {
        json!({
            "seq": self.next_seq(),
            "type": "event",
            "event": event,
            "body": body
        })
    }

    fn stopped(&mut self, reason: &str) -> Value {
        self.event(
            "stopped",
            json!({ "reason": reason, "threadId": 1, "allThreadsStopped": true }),
        )
    }

    /// Run to the next pending breakpoint, or to the end of the program
    fn resume(&mut self, events: &mut Vec<Value>) {
        if self.pending_hits.is_empty() {
            self.location = None;
            let output = self.event(
                "output",
                json!({ "category": "stdout", "output": "mock program finished\n" }),
            );
            let exited = self.event("exited", json!({ "exitCode": 0 }));
            let terminated = self.event("terminated", json!({}));
            events.extend([output, exited, terminated]);
            return;
        }

        let hit = self.pending_hits.remove(0);
        self.location = Some(hit);
        let stopped = self.stopped("breakpoint");
        events.push(stopped);
    }

    fn stack_frames(&self) -> Value {
        let top = match &self.location {
            Some((path, line)) => json!({
                "id": 1,
                "name": "main",
                "source": { "path": path },
                "line": line,
                "column": 1
            }),
            None => json!({
                "id": 1,
                "name": "main",
                "source": { "name": "main.c", "sourceReference": SYNTHETIC_SOURCE_REFERENCE },
                "line": 2,
                "column": 1
            }),
        };
        json!([
            top,
            { "id": 2, "name": "__libc_start_main", "line": 0, "column": 0 }
        ])
    }

    fn process_message(&mut self, message: &Value) -> Vec<Value> {
        if message.get("type").and_then(Value::as_str) != Some("request") {
            return Vec::new();
        }
        let command = message
            .get("command")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let request_seq = message.get("seq").and_then(Value::as_i64).unwrap_or(0);
        let arguments = message.get("arguments").cloned().unwrap_or(json!({}));

        let mut events = Vec::new();
        let (success, body) = match command.as_str() {
            "initialize" => (
                true,
                json!({
                    "supportsConfigurationDoneRequest": true,
                    "supportsEvaluateForHovers": true,
                    "supportsTerminateRequest": true
                }),
            ),
            "launch" | "attach" => {
                self.attached = command == "attach";
                events.push(self.event("initialized", Value::Null));
                (true, Value::Null)
            }
            "setBreakpoints" => {
                let path = arguments
                    .pointer("/source/path")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string();
                let lines: Vec<u64> = arguments
                    .get("breakpoints")
                    .and_then(Value::as_array)
                    .map(|bps| {
                        bps.iter()
                            .filter_map(|bp| bp.get("line").and_then(Value::as_u64))
                            .collect()
                    })
                    .unwrap_or_default();

                let mut descriptors = Vec::new();
                let mut verified = Vec::new();
                for line in lines {
                    if line >= UNVERIFIABLE_LINE {
                        descriptors.push(json!({ "verified": false, "line": line }));
                        continue;
                    }
                    self.next_breakpoint_id += 1;
                    descriptors.push(json!({
                        "id": self.next_breakpoint_id,
                        "verified": true,
                        "line": line,
                        "source": { "path": &path }
                    }));
                    verified.push(line);
                }
                self.breakpoints.insert(path, verified);
                (true, json!({ "breakpoints": descriptors }))
            }
            "setExceptionBreakpoints" => (true, json!({})),
            "configurationDone" => {
                self.pending_hits = self
                    .breakpoints
                    .iter()
                    .flat_map(|(path, lines)| lines.iter().map(move |l| (path.clone(), *l)))
                    .collect();
                // An attached program is already running; wait for a pause
                if !self.attached {
                    self.resume(&mut events);
                }
                (true, Value::Null)
            }
            "threads" => (true, json!({ "threads": [{ "id": 1, "name": "main" }] })),
            "stackTrace" => {
                let levels = arguments
                    .get("levels")
                    .and_then(Value::as_u64)
                    .unwrap_or(0) as usize;
                let mut frames = self.stack_frames();
                if let Some(all) = frames.as_array_mut() {
                    if levels > 0 {
                        all.truncate(levels);
                    }
                }
                let total = frames.as_array().map(Vec::len).unwrap_or(0);
                (true, json!({ "stackFrames": frames, "totalFrames": total }))
            }
            "scopes" => (
                true,
                json!({
                    "scopes": [
                        { "name": "Locals", "variablesReference": 1000, "expensive": false },
                        { "name": "Globals", "variablesReference": 2000, "expensive": true }
                    ]
                }),
            ),
            "variables" => {
                let reference = arguments
                    .get("variablesReference")
                    .and_then(Value::as_i64)
                    .unwrap_or(0);
                let variables = match reference {
                    1000 => json!([
                        { "name": "x", "value": "42", "type": "int", "variablesReference": 0 },
                        { "name": "name", "value": "\"hello\"", "type": "const char*", "variablesReference": 0 }
                    ]),
                    2000 => json!([
                        { "name": "counter", "value": "7", "type": "int", "variablesReference": 0 }
                    ]),
                    _ => json!([]),
                };
                (true, json!({ "variables": variables }))
            }
            "evaluate" => {
                let expression = arguments
                    .get("expression")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                match expression {
                    "x" => (true, json!({ "result": "42", "type": "int", "variablesReference": 0 })),
                    "x + 1" => (true, json!({ "result": "43", "type": "int", "variablesReference": 0 })),
                    other => (
                        false,
                        json!({ "error": { "id": 1, "format": format!("cannot evaluate '{}'", other) } }),
                    ),
                }
            }
            "source" => {
                let reference = arguments
                    .get("sourceReference")
                    .and_then(Value::as_i64)
                    .unwrap_or(0);
                if reference == SYNTHETIC_SOURCE_REFERENCE {
                    (true, json!({ "content": SYNTHETIC_SOURCE }))
                } else {
                    (false, json!({}))
                }
            }
            "continue" => {
                events.push(self.event(
                    "continued",
                    json!({ "threadId": 1, "allThreadsContinued": true }),
                ));
                self.resume(&mut events);
                (true, json!({ "allThreadsContinued": true }))
            }
            "next" | "stepIn" => {
                if let Some((_, line)) = self.location.as_mut() {
                    *line += 1;
                }
                let stopped = self.stopped("step");
                events.push(stopped);
                (true, Value::Null)
            }
            "pause" => {
                let stopped = self.stopped("pause");
                events.push(stopped);
                (true, Value::Null)
            }
            "disconnect" => {
                self.disconnected = true;
                (true, Value::Null)
            }
            other => (false, json!({ "error": { "id": 2, "format": format!("Unknown command: {}", other) } })),
        };

        let message = match body.pointer("/error/format").and_then(Value::as_str) {
            Some(m) if !success => m.to_string(),
            _ => String::new(),
        };
        let mut response = json!({
            "seq": self.next_seq(),
            "type": "response",
            "request_seq": request_seq,
            "success": success,
            "command": command,
            "body": body
        });
        if !success {
            response["message"] = json!(message);
        }

        let mut outgoing = vec![response];
        outgoing.extend(events);
        outgoing
    }
}
