//! Per-sample data model shared by the fragment parser, the timeline
//! normalizer, and the builder.

/// One coded access unit. Borrows its payload out of whichever input
/// buffer it came from; the borrow lives as long as the caller's input
/// slice, which covers the whole pipeline call.
#[derive(Clone, Debug)]
pub struct Sample<'a> {
    pub dts: i64,
    pub cts: i64,
    pub duration: u32,
    pub size: u32,
    pub is_keyframe: bool,
    pub data: &'a [u8],
}

/// `tfhd` defaults for a track fragment: the subset present depends on
/// which optional flag bits were set.
#[derive(Clone, Copy, Debug, Default)]
pub struct TfhdDefaults {
    pub track_id: u32,
    pub base_data_offset: Option<u64>,
    pub default_sample_duration: u32,
    pub default_sample_size: u32,
    pub default_sample_flags: u32,
}

/// Per-sample overrides decoded from one `trun` entry. `None` means the
/// corresponding `trun` flag bit was clear; the caller falls back to
/// `TfhdDefaults`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TrunSample {
    pub duration: Option<u32>,
    pub size: Option<u32>,
    pub flags: Option<u32>,
    pub cto: Option<i64>,
}

/// Sample flags bit that marks a sample as *not* a sync sample.
pub const SAMPLE_IS_NON_SYNC_SAMPLE: u32 = 0x0001_0000;

#[must_use]
pub fn is_keyframe(flags: u32) -> bool {
    flags & SAMPLE_IS_NON_SYNC_SAMPLE == 0
}
