//! Error taxonomy, one enum per pipeline stage, composed into [`RemuxError`].
//!
//! Mirrors the nested-error convention used for box marshaling: a leaf
//! error wraps narrower causes with `#[from]` rather than flattening
//! everything into one enum.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BoxWalkError {
    #[error("box too large: size64 {0} exceeds platform integer range")]
    BoxTooLarge(u64),
}

#[derive(Debug, Error)]
pub enum InitError {
    #[error("box walk: {0}")]
    BoxWalk(#[from] BoxWalkError),

    #[error("missing moov box")]
    MissingMoov,

    #[error("no video track in moov")]
    NoVideoTrack,

    #[error("missing mdhd in mdia")]
    MissingMdhd,

    #[error("missing tkhd in trak")]
    MissingTkhd,

    #[error("missing stsd in stbl")]
    MissingStsd,

    #[error("unsupported mdhd version: {0}")]
    UnsupportedMdhdVersion(u8),
}

#[derive(Debug, Error)]
pub enum FragmentError {
    #[error("box walk: {0}")]
    BoxWalk(#[from] BoxWalkError),

    #[error("no moof box in fragment")]
    NoMoof,

    #[error("moof at offset {0} has no following mdat")]
    MoofWithoutMdat(usize),

    #[error("missing tfhd in traf")]
    MissingTfhd,

    #[error("missing tfdt in traf")]
    MissingTfdt,

    #[error("missing trun in traf")]
    MissingTrun,

    #[error("unsupported tfdt version: {0}")]
    UnsupportedTfdtVersion(u8),

    #[error("missing sample size for sample index {0}")]
    MissingSampleSize(usize),

    #[error("trun is missing data_offset and allowTrunDataOffsetFallback is disabled")]
    MissingTrunDataOffset,

    #[error(
        "mdat range mismatch: dataStart={data_start} sampleBytes={sample_bytes} mdat=[{mdat_start}, {mdat_end})"
    )]
    MdatRangeMismatch {
        data_start: u64,
        sample_bytes: u64,
        mdat_start: u64,
        mdat_end: u64,
    },

    #[error("integer too large for number: {0}")]
    IntegerTooLargeForNumber(String),
}

#[derive(Debug, Error)]
pub enum BuilderError {
    #[error("mp4: {0}")]
    Mp4(#[from] crate::mp4::Mp4Error),

    #[error("chunk offset overflow: {0} does not fit in 64 bits")]
    ChunkOffsetOverflow(u128),

    #[error("integer too large for number: {0}")]
    IntegerTooLargeForNumber(String),

    #[error("sample list is empty")]
    EmptySampleList,
}

#[derive(Debug, Error)]
pub enum SplitError {
    #[error("no input buffer contained a moov box")]
    NoInitSegment,
}

#[derive(Debug, Error)]
pub enum MfraError {
    #[error("box walk: {0}")]
    BoxWalk(#[from] BoxWalkError),

    #[error("missing mfra box")]
    MissingMfra,

    #[error("unsupported tfra version: {0}")]
    UnsupportedTfraVersion(u8),

    #[error("tfra entry table truncated")]
    Truncated,
}

#[derive(Debug, Error)]
pub enum RemuxError {
    #[error("split: {0}")]
    Split(#[from] SplitError),

    #[error("init: {0}")]
    Init(#[from] InitError),

    #[error("fragment: {0}")]
    Fragment(#[from] FragmentError),

    #[error("build: {0}")]
    Build(#[from] BuilderError),
}
