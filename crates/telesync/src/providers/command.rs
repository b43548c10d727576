//! Provider backed by an external command
//!
//! Each registration spawns the configured program and feeds its stdout to
//! the listener. Output may be one JSON value per line or pretty-printed
//! JSON spread over several lines (as `termux-location` prints it).

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::CommandConfig;
use crate::db::models::{Feature, Location, Reading};
use crate::error::{Result, SyncError};
use crate::sync::sampler::{Listener, RegistrationId, SampleSource};

/// Output buffered without producing a value before it is discarded
const MAX_PENDING_BYTES: usize = 64 * 1024;

/// Turns command output into readings
#[derive(Debug)]
pub struct ReadingParser {
    feature: Feature,
    buffer: String,
}

impl ReadingParser {
    pub fn new(feature: Feature) -> Self {
        Self {
            feature,
            buffer: String::new(),
        }
    }

    /// Feed one line; returns a reading once a complete value has been seen
    pub fn push_line(&mut self, line: &str) -> Option<Reading> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        self.buffer.push_str(line);
        self.buffer.push('\n');

        match serde_json::from_str::<Value>(&self.buffer) {
            Ok(value) => {
                self.buffer.clear();
                let reading = to_reading(&value).filter(|r| r.feature() == self.feature);
                if reading.is_none() {
                    debug!(feature = %self.feature, %value, "unrecognised provider output");
                }
                reading
            }
            Err(e) if e.is_eof() && self.buffer.len() < MAX_PENDING_BYTES => None,
            Err(e) => {
                debug!(feature = %self.feature, error = %e, "discarding provider output");
                self.buffer.clear();
                None
            }
        }
    }
}

fn to_reading(value: &Value) -> Option<Reading> {
    if let Some(raw) = value.as_i64() {
        return Some(Reading::StepCounter { raw });
    }

    let obj = value.as_object()?;
    if let Some(delta) = obj.get("delta").and_then(Value::as_i64) {
        return Some(Reading::StepDelta { delta });
    }
    if let Some(raw) = obj
        .get("raw")
        .or_else(|| obj.get("steps"))
        .and_then(Value::as_i64)
    {
        return Some(Reading::StepCounter { raw });
    }

    let latitude = obj.get("latitude").and_then(Value::as_f64)?;
    let longitude = obj.get("longitude").and_then(Value::as_f64)?;
    let accuracy = obj.get("accuracy").and_then(Value::as_f64).unwrap_or(0.0);
    Some(Reading::Location(Location {
        latitude,
        longitude,
        accuracy,
    }))
}

/// Whether `program` names an executable file, directly or via `PATH`
fn resolves(program: &str) -> bool {
    if program.contains(std::path::MAIN_SEPARATOR) {
        return Path::new(program).is_file();
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
        .unwrap_or(false)
}

/// [`SampleSource`] running a shell command per registration
pub struct CommandSource {
    feature: Feature,
    command: CommandConfig,
    next_id: AtomicU64,
    active: Mutex<HashMap<RegistrationId, JoinHandle<()>>>,
}

impl CommandSource {
    pub fn new(feature: Feature, command: CommandConfig) -> Self {
        Self {
            feature,
            command,
            next_id: AtomicU64::new(1),
            active: Mutex::new(HashMap::new()),
        }
    }

    fn active(&self) -> std::sync::MutexGuard<'_, HashMap<RegistrationId, JoinHandle<()>>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    fn active_count(&self) -> usize {
        self.active().values().filter(|h| !h.is_finished()).count()
    }
}

impl SampleSource for CommandSource {
    fn feature(&self) -> Feature {
        self.feature
    }

    fn is_available(&self) -> bool {
        resolves(&self.command.program)
    }

    fn register(&self, listener: Listener) -> Result<RegistrationId> {
        let mut child = Command::new(&self.command.program)
            .args(&self.command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                SyncError::provider(format!("Failed to start '{}': {}", self.command.program, e))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SyncError::provider("Provider command has no stdout"))?;

        let feature = self.feature;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            let mut parser = ReadingParser::new(feature);
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if let Some(reading) = parser.push_line(&line) {
                            if !listener.deliver(reading) {
                                break;
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(%feature, error = %e, "failed reading provider output");
                        break;
                    }
                }
            }
            // Dropping the child kills it if it is still running
            drop(child);
        });

        self.active().insert(id, reader);
        Ok(id)
    }

    fn unregister(&self, id: RegistrationId) {
        if let Some(reader) = self.active().remove(&id) {
            reader.abort();
        }
    }
}

impl Drop for CommandSource {
    fn drop(&mut self) {
        for (_, reader) in self.active().drain() {
            reader.abort();
        }
    }
}
