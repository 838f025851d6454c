//! Output channels written by workers and the single-consumer drain that
//! forwards them to the host.

use crate::runtime::host::Host;
use crate::runtime::records::{ErrorRecord, ProgressRecord};
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Upper bound on drain cycles per call so a busy pool cannot pin the host task.
const MAX_DRAIN_CYCLES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Verbose,
    Warning,
    Debug,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMessage {
    pub level: LogLevel,
    pub text: String,
}

/// Producer side of the output queues. Cheap to clone; one copy per worker.
#[derive(Debug, Clone)]
pub struct OutputChannels {
    log_tx: UnboundedSender<LogMessage>,
    error_tx: UnboundedSender<ErrorRecord>,
    progress_tx: UnboundedSender<ProgressRecord>,
    object_tx: UnboundedSender<Value>,
}

impl OutputChannels {
    pub fn new() -> (Self, OutputDrain) {
        let (log_tx, log_rx) = mpsc::unbounded_channel();
        let (error_tx, error_rx) = mpsc::unbounded_channel();
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let (object_tx, object_rx) = mpsc::unbounded_channel();

        (
            Self {
                log_tx,
                error_tx,
                progress_tx,
                object_tx,
            },
            OutputDrain {
                log_rx,
                error_rx,
                progress_rx,
                object_rx,
                last_progress: None,
            },
        )
    }

    pub fn verbose(&self, text: impl Into<String>) {
        self.log(LogLevel::Verbose, text.into());
    }

    pub fn warning(&self, text: impl Into<String>) {
        self.log(LogLevel::Warning, text.into());
    }

    pub fn debug(&self, text: impl Into<String>) {
        self.log(LogLevel::Debug, text.into());
    }

    // Sends only fail once the drain is gone, at which point nobody is listening.
    fn log(&self, level: LogLevel, text: String) {
        let _ = self.log_tx.send(LogMessage { level, text });
    }

    pub fn error(&self, record: ErrorRecord) {
        let _ = self.error_tx.send(record);
    }

    pub fn progress(&self, record: ProgressRecord) {
        let _ = self.progress_tx.send(record);
    }

    pub fn object(&self, value: Value) {
        let _ = self.object_tx.send(value);
    }
}

/// Counts of what a single [`OutputDrain::drain`] call forwarded.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainStats {
    pub log_lines: usize,
    pub errors: usize,
    pub progress: usize,
    pub objects: usize,
}

impl DrainStats {
    pub fn total(&self) -> usize {
        self.log_lines + self.errors + self.progress + self.objects
    }
}

/// Consumer side of the output queues. Owned by the engine and only used
/// with `&mut` access to the host, so host calls never overlap.
#[derive(Debug)]
pub struct OutputDrain {
    log_rx: UnboundedReceiver<LogMessage>,
    error_rx: UnboundedReceiver<ErrorRecord>,
    progress_rx: UnboundedReceiver<ProgressRecord>,
    object_rx: UnboundedReceiver<Value>,
    last_progress: Option<(u64, u8)>,
}

impl OutputDrain {
    /// Forwards everything queued so far. Each cycle empties log text, then
    /// errors, then progress, then objects, and cycles repeat until a pass
    /// finds all channels empty.
    pub fn drain<H: Host + ?Sized>(&mut self, host: &mut H) -> DrainStats {
        let mut stats = DrainStats::default();

        for _ in 0..MAX_DRAIN_CYCLES {
            let mut received = 0usize;

            while let Ok(message) = self.log_rx.try_recv() {
                received += 1;
                stats.log_lines += 1;
                match message.level {
                    LogLevel::Verbose => host.write_verbose(&message.text),
                    LogLevel::Warning => host.write_warning(&message.text),
                    LogLevel::Debug => host.write_debug(&message.text),
                }
            }

            while let Ok(record) = self.error_rx.try_recv() {
                received += 1;
                stats.errors += 1;
                host.write_error(record);
            }

            while let Ok(record) = self.progress_rx.try_recv() {
                received += 1;
                if self.accept_progress(&record) {
                    stats.progress += 1;
                    host.write_progress(record);
                }
            }

            while let Ok(value) = self.object_rx.try_recv() {
                received += 1;
                stats.objects += 1;
                host.write_object(value);
            }

            if received == 0 {
                break;
            }
        }

        stats
    }

    // Workers race to publish progress, so a record computed from fewer
    // completions can arrive after a newer one. While input is still open the
    // queued total also grows, which can lower the computed percentage. Those
    // records and repeats of the last percentage are dropped.
    fn accept_progress(&mut self, record: &ProgressRecord) -> bool {
        if let Some((completed, percent)) = self.last_progress {
            if record.completed_items < completed {
                return false;
            }
            if record.percent_complete <= percent && !record.completed {
                self.last_progress = Some((record.completed_items, percent));
                return false;
            }
        }
        self.last_progress = Some((record.completed_items, record.percent_complete));
        true
    }
}
