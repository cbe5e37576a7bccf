//! Caller-tunable knobs for a remux call.

use crate::logger::{ArcLogger, DummyLogger};

/// Options recognized by the pipeline. Defaults match what a
/// single-file, strictly-conforming remux needs.
#[derive(Clone)]
pub struct FlattenOptions {
    /// Shift each file's timestamps by the running total of prior
    /// files' inferred durations so their timelines concatenate.
    pub normalize_across_files: bool,

    /// When a `trun` omits `data_offset`, synthesize one instead of
    /// failing. See [`crate::fragment_parser`] for the exact fallback.
    pub allow_trun_data_offset_fallback: bool,

    /// Emit verbose diagnostics through `logger`. Purely observational;
    /// never changes the output bytes.
    pub debug: bool,

    /// Caps how many files `debug` logs detail for, to keep verbose
    /// runs over many inputs bounded. `None` means no cap.
    pub debug_file_limit: Option<usize>,

    pub logger: ArcLogger,
}

impl Default for FlattenOptions {
    fn default() -> Self {
        Self {
            normalize_across_files: true,
            allow_trun_data_offset_fallback: false,
            debug: false,
            debug_file_limit: None,
            logger: DummyLogger::new(),
        }
    }
}

impl std::fmt::Debug for FlattenOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlattenOptions")
            .field("normalize_across_files", &self.normalize_across_files)
            .field(
                "allow_trun_data_offset_fallback",
                &self.allow_trun_data_offset_fallback,
            )
            .field("debug", &self.debug)
            .field("debug_file_limit", &self.debug_file_limit)
            .finish_non_exhaustive()
    }
}
