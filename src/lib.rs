//! Remuxes one or more fragmented ISO-BMFF inputs (an init segment plus
//! zero or more `moof`+`mdat` fragments) into a single progressive MP4:
//! `ftyp` + `moov` + `mdat`.
//!
//! The pipeline is a straight line from borrowed byte buffers to one
//! owned output buffer, single-threaded and synchronous throughout:
//!
//! ```text
//! buffers[] -> Splitter -> InitParser -> TrackConfig
//!                 \-> FragmentParser(config) -> Sample[] per fragment
//!                                          -> TimelineNormalizer -> ordered Sample[]
//!                                                                 -> Mp4Builder -> bytes
//! ```

pub mod box_walker;
pub mod builder;
pub mod bytes_ext;
pub mod error;
pub mod fragment_parser;
pub mod init_parser;
pub mod logger;
pub mod mfra;
pub mod mp4;
pub mod options;
pub mod sample;
pub mod splitter;
pub mod timeline;
pub mod track_config;

pub use error::RemuxError;
pub use options::FlattenOptions;
pub use sample::Sample;
pub use track_config::TrackConfig;

/// Output of a successful [`remux`] call.
pub struct RemuxOutput {
    /// A complete `ftyp` + `moov` + `mdat` ISO-BMFF file.
    pub data: Vec<u8>,
    /// Keyframe presentation times, in seconds, in decode order.
    pub idr_timestamps: Vec<f64>,
    /// Set when the timeline normalizer found a zero-duration sample
    /// whose repaired gap exceeded one media-timescale tick, i.e. the
    /// source timeline had a discontinuity larger than a single frame.
    pub discontinuity_detected: bool,
}

/// Runs the full init-to-progressive-MP4 pipeline over a set of input
/// buffers. Buffer order defines decode order across files; exactly one
/// buffer must carry a `moov`, and any may carry `moof`+`mdat` pairs
/// (the buffer that carries the `moov` may also carry fragments itself).
pub fn remux(buffers: &[&[u8]], options: &FlattenOptions) -> Result<RemuxOutput, RemuxError> {
    let split = splitter::split(buffers)?;

    let config = init_parser::parse(split.init_segment)?;

    let parser = fragment_parser::FragmentParser::new(&config, options);
    let mut per_file_samples = Vec::with_capacity(split.fragments.len());
    for (i, fragment) in split.fragments.iter().enumerate() {
        let within_debug_limit = options.debug_file_limit.map_or(true, |limit| i < limit);
        if options.debug && within_debug_limit {
            options.logger.log(
                logger::LogLevel::Debug,
                &format!("parsing fragment {i} ({} bytes)", fragment.len()),
            );
        }
        per_file_samples.push(parser.parse(fragment)?);
    }

    let normalized = timeline::normalize(per_file_samples, options);

    let built = builder::build(&config, &normalized.samples)?;

    Ok(RemuxOutput {
        data: built.data,
        idr_timestamps: built.idr_timestamps,
        discontinuity_detected: normalized.discontinuity_detected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn make_box(box_type: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(8 + u32::try_from(body.len()).unwrap()).to_be_bytes());
        out.extend_from_slice(box_type);
        out.extend_from_slice(body);
        out
    }

    fn make_tkhd_v0(track_id: u32, width: u16, height: u16) -> Vec<u8> {
        let mut body = vec![0, 0, 0, 0];
        body.extend_from_slice(&0u32.to_be_bytes());
        body.extend_from_slice(&0u32.to_be_bytes());
        body.extend_from_slice(&track_id.to_be_bytes());
        body.extend_from_slice(&0u32.to_be_bytes());
        body.extend_from_slice(&0u32.to_be_bytes());
        body.extend_from_slice(&[0u8; 8]);
        body.extend_from_slice(&[0u8; 2]);
        body.extend_from_slice(&[0u8; 2]);
        body.extend_from_slice(&[0u8; 2]);
        body.extend_from_slice(&[0u8; 2]);
        body.extend_from_slice(&[0u8; 36]);
        body.extend_from_slice(&(u32::from(width) << 16).to_be_bytes());
        body.extend_from_slice(&(u32::from(height) << 16).to_be_bytes());
        make_box(b"tkhd", &body)
    }

    fn make_mdhd_v0(timescale: u32) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&[0, 0, 0, 0]);
        body.extend_from_slice(&0u32.to_be_bytes());
        body.extend_from_slice(&0u32.to_be_bytes());
        body.extend_from_slice(&timescale.to_be_bytes());
        body.extend_from_slice(&0u32.to_be_bytes());
        body.extend_from_slice(&[0u8; 2]);
        body.extend_from_slice(&[0u8; 2]);
        make_box(b"mdhd", &body)
    }

    fn make_hdlr(handler_type: &[u8; 4]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&[0, 0, 0, 0]);
        body.extend_from_slice(&0u32.to_be_bytes());
        body.extend_from_slice(handler_type);
        body.extend_from_slice(&[0u8; 12]);
        body.push(0);
        make_box(b"hdlr", &body)
    }

    fn make_init_segment() -> Vec<u8> {
        let stsd = make_box(b"stsd", &[0, 0, 0, 0, 0, 0, 0, 1]);
        let stbl = make_box(b"stbl", &stsd);
        let minf = make_box(b"minf", &stbl);
        let mdhd = make_mdhd_v0(30000);
        let hdlr = make_hdlr(b"vide");
        let mdia = make_box(b"mdia", &[mdhd, hdlr, minf].concat());
        let tkhd = make_tkhd_v0(1, 1920, 1080);
        let trak = make_box(b"trak", &[tkhd, mdia].concat());
        let moov = make_box(b"moov", &trak);
        let ftyp = make_box(b"ftyp", b"isom\x00\x00\x02\x00isomiso2avc1mp41");
        [ftyp, moov].concat()
    }

    /// Builds one (moof, mdat) pair carrying a single keyframe sample of
    /// `size` bytes at `dts`, with `trun.data_offset` patched to point at
    /// the `mdat` payload start.
    fn make_fragment(track_id: u32, dts: u32, size: u32, duration: u32) -> Vec<u8> {
        let mfhd = make_box(b"mfhd", &[0, 0, 0, 0, 0, 0, 0, 1]);

        let mut tfhd_body = vec![0, 0, 0, 0];
        tfhd_body.extend_from_slice(&track_id.to_be_bytes());
        let tfhd = make_box(b"tfhd", &tfhd_body);

        let mut tfdt_body = vec![0, 0, 0, 0];
        tfdt_body.extend_from_slice(&dts.to_be_bytes());
        let tfdt = make_box(b"tfdt", &tfdt_body);

        let trun_flags: u32 = 0x1 | 0x4 | 0x100 | 0x200;
        let mut trun_body = vec![0, 0, (trun_flags >> 8) as u8, trun_flags as u8];
        trun_body.extend_from_slice(&1u32.to_be_bytes());
        let data_offset_pos = trun_body.len();
        trun_body.extend_from_slice(&0i32.to_be_bytes());
        trun_body.extend_from_slice(&0x0200_0000u32.to_be_bytes());
        trun_body.extend_from_slice(&duration.to_be_bytes());
        trun_body.extend_from_slice(&size.to_be_bytes());
        let trun = make_box(b"trun", &trun_body);

        let mut traf_body = tfhd.clone();
        traf_body.extend(tfdt.clone());
        traf_body.extend(trun);
        let traf = make_box(b"traf", &traf_body);

        let mut moof_body = mfhd.clone();
        moof_body.extend(traf);
        let mut moof = make_box(b"moof", &moof_body);

        let trun_data_offset_pos =
            8 + mfhd.len() + 8 + tfhd.len() + tfdt.len() + 8 + data_offset_pos;
        let mdat_payload_start = (moof.len() + 8) as i32;
        moof[trun_data_offset_pos..trun_data_offset_pos + 4]
            .copy_from_slice(&mdat_payload_start.to_be_bytes());

        let payload = vec![0xCDu8; size as usize];
        let mdat = make_box(b"mdat", &payload);

        let mut out = moof;
        out.extend(mdat);
        out
    }

    #[test]
    fn remuxes_single_fragment_into_progressive_mp4() {
        let init = make_init_segment();
        let fragment = make_fragment(1, 0, 100, 1000);
        let buffers: Vec<&[u8]> = vec![&init, &fragment];

        let out = remux(&buffers, &FlattenOptions::default()).unwrap();

        let headers: Vec<_> = box_walker::BoxWalker::whole_buffer(&out.data)
            .map(Result::unwrap)
            .collect();
        assert_eq!(headers.len(), 3);
        assert_eq!(headers[0].box_type, *b"ftyp");
        assert_eq!(headers[1].box_type, *b"moov");
        assert_eq!(headers[2].box_type, *b"mdat");
        assert_eq!(headers[2].size - headers[2].header_size, 100);
        assert_eq!(out.idr_timestamps, vec![0.0]);
        assert!(!out.discontinuity_detected);
    }

    #[test]
    fn remuxes_multiple_fragments_preserving_decode_order() {
        let init = make_init_segment();
        let frag1 = make_fragment(1, 0, 50, 1000);
        let frag2 = make_fragment(1, 1000, 60, 1000);
        let buffers: Vec<&[u8]> = vec![&init, &frag1, &frag2];

        let out = remux(&buffers, &FlattenOptions::default()).unwrap();
        let headers: Vec<_> = box_walker::BoxWalker::whole_buffer(&out.data)
            .map(Result::unwrap)
            .collect();
        assert_eq!(headers[2].size - headers[2].header_size, 110);
    }

    #[test]
    fn missing_init_segment_fails_fast() {
        let fragment = make_fragment(1, 0, 10, 1000);
        let buffers: Vec<&[u8]> = vec![&fragment];

        let err = remux(&buffers, &FlattenOptions::default()).unwrap_err();
        assert!(matches!(err, RemuxError::Split(error::SplitError::NoInitSegment)));
    }
}
