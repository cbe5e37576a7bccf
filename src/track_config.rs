//! `TrackConfig`: the single video track's parameters pulled out of the
//! init segment by [`crate::init_parser`] and reused verbatim by
//! [`crate::builder`].

/// Parameters describing a single video track, carried opaque wherever
/// byte-exactness matters (`stsd`, `ftyp`).
#[derive(Clone, Debug)]
pub struct TrackConfig {
    pub track_id: u32,
    pub timescale: u32,
    pub width: u16,
    pub height: u16,
    /// Full bytes of the source `stsd` box, header included, reused
    /// byte-for-byte in the output.
    pub stsd: Vec<u8>,
    /// Full bytes of the source `ftyp` box, if one was present.
    pub ftyp: Option<Vec<u8>>,
}
