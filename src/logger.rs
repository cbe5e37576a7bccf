//! Injected diagnostics. The core never logs on its own; callers that
//! want visibility into `debug`/`debugFileLimit` pass an [`ArcLogger`].
//! Absent one, [`DummyLogger`] is a silent no-op.

use std::sync::Arc;

pub type ArcLogger = Arc<dyn Logger + Send + Sync>;

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warning,
    Info,
    Debug,
}

pub trait Logger {
    fn log(&self, _level: LogLevel, _msg: &str) {}
}

pub struct DummyLogger;

impl DummyLogger {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(DummyLogger {})
    }
}

impl Logger for DummyLogger {
    fn log(&self, _level: LogLevel, _msg: &str) {}
}
