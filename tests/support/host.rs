use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parabulk::{ErrorRecord, Host, ProgressRecord};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    Verbose(String),
    Warning(String),
    Error(ErrorRecord),
    Progress(ProgressRecord),
    Object(Value),
}

/// Host that records everything in arrival order. Not `Send`-dependent: the
/// engine only ever touches it from the test task.
#[derive(Default)]
pub struct RecordingHost {
    events: Vec<HostEvent>,
    stopping: Arc<AtomicBool>,
    declined: Vec<String>,
    decline_all: bool,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declining() -> Self {
        Self {
            decline_all: true,
            ..Self::default()
        }
    }

    /// Flag the host reports through `is_stopping`.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stopping)
    }

    pub fn events(&self) -> &[HostEvent] {
        &self.events
    }

    pub fn declined(&self) -> &[String] {
        &self.declined
    }

    pub fn errors(&self) -> Vec<&ErrorRecord> {
        self.events
            .iter()
            .filter_map(|event| match event {
                HostEvent::Error(record) => Some(record),
                _ => None,
            })
            .collect()
    }

    pub fn objects(&self) -> Vec<&Value> {
        self.events
            .iter()
            .filter_map(|event| match event {
                HostEvent::Object(value) => Some(value),
                _ => None,
            })
            .collect()
    }

    pub fn progress(&self) -> Vec<&ProgressRecord> {
        self.events
            .iter()
            .filter_map(|event| match event {
                HostEvent::Progress(record) => Some(record),
                _ => None,
            })
            .collect()
    }

    pub fn warnings(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|event| match event {
                HostEvent::Warning(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn position(&self, predicate: impl Fn(&HostEvent) -> bool) -> Option<usize> {
        self.events.iter().position(predicate)
    }
}

impl Host for RecordingHost {
    fn write_verbose(&mut self, text: &str) {
        self.events.push(HostEvent::Verbose(text.to_string()));
    }

    fn write_warning(&mut self, text: &str) {
        self.events.push(HostEvent::Warning(text.to_string()));
    }

    fn write_error(&mut self, record: ErrorRecord) {
        self.events.push(HostEvent::Error(record));
    }

    fn write_progress(&mut self, record: ProgressRecord) {
        self.events.push(HostEvent::Progress(record));
    }

    fn write_object(&mut self, value: Value) {
        self.events.push(HostEvent::Object(value));
    }

    fn should_process(&mut self, description: &str) -> bool {
        if self.decline_all {
            self.declined.push(description.to_string());
            return false;
        }
        true
    }

    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }
}
