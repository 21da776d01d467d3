use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

/// Append-only JSONL log of what the studio wrote and how each request was
/// reconciled.
///
/// Every line carries `type`, `session`, and `ts`; the caller's fields are
/// merged after them. The file is opened on the first record and the handle
/// is shared by all clones.
#[derive(Debug, Clone)]
pub struct EventLog {
    path: Arc<PathBuf>,
    session: Arc<str>,
    sink: Arc<Mutex<Option<File>>>,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>, session: impl Into<String>) -> Self {
        Self {
            path: Arc::new(path.into()),
            session: Arc::from(session.into()),
            sink: Arc::new(Mutex::new(None)),
        }
    }

    /// `fields` must be a JSON object; anything else is recorded under
    /// `detail`.
    pub fn record(&self, event_type: &str, fields: Value) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), json_str(event_type));
        event.insert("session".to_string(), json_str(&self.session));
        event.insert(
            "ts".to_string(),
            json_str(&Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)),
        );
        match fields {
            Value::Object(map) => event.extend(map),
            Value::Null => {}
            other => {
                event.insert("detail".to_string(), other);
            }
        }

        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');
        let mut sink = self
            .sink
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
        let file = match sink.take() {
            Some(file) => file,
            None => self.open()?,
        };
        let file = sink.insert(file);
        file.write_all(&line)
            .with_context(|| format!("failed to append to {}", self.path.display()))?;
        Ok(Value::Object(event))
    }

    fn open(&self) -> anyhow::Result<File> {
        if let Some(parent) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&*self.path)
            .with_context(|| format!("failed to open event log {}", self.path.display()))
    }
}

fn json_str(value: &str) -> Value {
    Value::String(value.to_string())
}
