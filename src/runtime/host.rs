use crate::runtime::records::{ErrorRecord, ProgressRecord};
use serde_json::Value;

/// Output surface of the command invoking the engine.
///
/// A host is not required to be `Send` or `Sync`: the engine only touches it
/// from the task that calls [`crate::BulkEngine::queue_operation`] and
/// [`crate::BulkEngine::wait_for_completion`]. Workers never see it.
pub trait Host {
    fn write_verbose(&mut self, text: &str);

    fn write_warning(&mut self, text: &str) {
        self.write_verbose(text);
    }

    fn write_debug(&mut self, text: &str) {
        self.write_verbose(text);
    }

    fn write_error(&mut self, record: ErrorRecord);

    fn write_progress(&mut self, record: ProgressRecord);

    fn write_object(&mut self, value: Value);

    /// Confirmation gate consulted once per item before it is queued.
    fn should_process(&mut self, _description: &str) -> bool {
        true
    }

    /// Cooperative stop request (e.g. the user pressed Ctrl-C).
    fn is_stopping(&self) -> bool {
        false
    }
}
