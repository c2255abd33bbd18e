//! Decoder for the `text/event-stream` framing used by REST streaming
//! listeners, plus the snapshot bookkeeping for `put`/`patch` events.

use bytes::BytesMut;
use serde_json::{Map, Value};

use crate::database::error::{malformed_payload, permission_denied, DatabaseError, DatabaseResult};
use crate::database::path::normalize_path;

/// One dispatched `event:`/`data:` block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ServerEvent {
    pub event: String,
    pub data: String,
}

/// Incremental line decoder. Chunks may split lines (and UTF-8 sequences)
/// anywhere; an event is dispatched on the blank line that ends it.
#[derive(Debug, Default)]
pub(crate) struct EventStreamDecoder {
    buffer: BytesMut,
    event: Option<String>,
    data: Vec<String>,
}

impl EventStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<ServerEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let raw = self.buffer.split_to(newline + 1);
            let mut end = newline;
            if end > 0 && raw[end - 1] == b'\r' {
                end -= 1;
            }
            let line = String::from_utf8_lossy(&raw[..end]).into_owned();
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Flushes a trailing event that was not terminated by a blank line.
    pub fn finish(&mut self) -> Option<ServerEvent> {
        if !self.buffer.is_empty() {
            let rest = self.buffer.split();
            let line = String::from_utf8_lossy(&rest).into_owned();
            let line = line.trim_end_matches('\r').to_owned();
            if let Some(event) = self.process_line(&line) {
                return Some(event);
            }
        }
        self.dispatch()
    }

    fn process_line(&mut self, line: &str) -> Option<ServerEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_owned()),
            "data" => self.data.push(value.to_owned()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<ServerEvent> {
        let event = self.event.take();
        if event.is_none() && self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(ServerEvent {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
        })
    }
}

/// Meaning of a decoded server event.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum StreamEvent {
    Put { path: Vec<String>, data: Value },
    Patch { path: Vec<String>, data: Value },
    KeepAlive,
    /// The server closed the listener; the stream must terminate with this error.
    Closed(DatabaseError),
    Ignored(String),
}

pub(crate) fn interpret(event: &ServerEvent) -> DatabaseResult<StreamEvent> {
    match event.event.as_str() {
        "put" | "patch" => {
            let payload: Value = serde_json::from_str(&event.data).map_err(|err| {
                malformed_payload(format!("invalid '{}' payload: {err}", event.event))
            })?;
            let Value::Object(mut body) = payload else {
                return Err(malformed_payload(format!(
                    "'{}' payload is not an object",
                    event.event
                )));
            };
            let Some(data) = body.remove("data") else {
                return Err(malformed_payload(format!(
                    "'{}' payload has no data field",
                    event.event
                )));
            };
            let path = match body.get("path").and_then(Value::as_str) {
                Some(raw) => normalize_path(raw)
                    .map_err(|err| malformed_payload(format!("invalid event path: {err}")))?,
                None => Vec::new(),
            };
            if event.event == "put" {
                Ok(StreamEvent::Put { path, data })
            } else {
                Ok(StreamEvent::Patch { path, data })
            }
        }
        "keep-alive" => Ok(StreamEvent::KeepAlive),
        "cancel" => Ok(StreamEvent::Closed(permission_denied(format!(
            "listener cancelled by server: {}",
            event.data.trim_matches('"')
        )))),
        "auth_revoked" => Ok(StreamEvent::Closed(permission_denied(
            "credential revoked by server",
        ))),
        other => Ok(StreamEvent::Ignored(other.to_owned())),
    }
}

/// Applies a put/patch to the cached snapshot of the listened path.
pub(crate) fn apply_event(snapshot: &mut Value, event: StreamEvent) {
    match event {
        StreamEvent::Put { path, data } => set_at_path(snapshot, &path, data),
        StreamEvent::Patch { path, data } => match data {
            Value::Object(children) => {
                for (key, value) in children {
                    let mut child_path = path.clone();
                    child_path.extend(key.split('/').filter(|s| !s.is_empty()).map(str::to_owned));
                    set_at_path(snapshot, &child_path, value);
                }
            }
            other => set_at_path(snapshot, &path, other),
        },
        StreamEvent::KeepAlive | StreamEvent::Closed(_) | StreamEvent::Ignored(_) => {}
    }
}

fn set_at_path(root: &mut Value, path: &[String], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        *root = value;
        return;
    };

    if value.is_null() {
        delete_at_path(root, path);
        return;
    }

    let mut current = root;
    for segment in parents {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let Value::Object(obj) = current else {
            return;
        };
        current = obj
            .entry(segment.clone())
            .or_insert(Value::Object(Map::new()));
    }

    if !current.is_object() {
        *current = Value::Object(Map::new());
    }
    if let Value::Object(obj) = current {
        obj.insert(last.clone(), value);
    }
}

fn delete_at_path(root: &mut Value, path: &[String]) {
    let Some((last, parents)) = path.split_last() else {
        *root = Value::Null;
        return;
    };

    let mut current = root;
    for segment in parents {
        match current {
            Value::Object(obj) => match obj.get_mut(segment) {
                Some(next) => current = next,
                None => return,
            },
            _ => return,
        }
    }

    let now_empty = match &mut *current {
        Value::Object(obj) => {
            obj.remove(last);
            obj.is_empty()
        }
        _ => false,
    };
    if now_empty {
        *current = Value::Null;
    }
}
