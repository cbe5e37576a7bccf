//! Decodes `moof`+`mdat` fragment pairs into [`Sample`]s for a single
//! configured track.
//!
//! The `tfhd`/`trun` flag matrices are driven by small flag tables
//! rather than a branch ladder per the box layout they encode.

use crate::box_walker::{find_box, BoxHeader, BoxWalker};
use crate::bytes_ext::{fullbox_flags, read_i32, read_u32, read_u64};
use crate::error::FragmentError;
use crate::options::FlattenOptions;
use crate::sample::{is_keyframe, Sample, TfhdDefaults, TrunSample};
use crate::track_config::TrackConfig;

const TFHD_BASE_DATA_OFFSET_PRESENT: u32 = 0x0000_01;
const TFHD_SAMPLE_DESCRIPTION_INDEX_PRESENT: u32 = 0x0000_02;
const TFHD_DEFAULT_SAMPLE_DURATION_PRESENT: u32 = 0x0000_08;
const TFHD_DEFAULT_SAMPLE_SIZE_PRESENT: u32 = 0x0000_10;
const TFHD_DEFAULT_SAMPLE_FLAGS_PRESENT: u32 = 0x0000_20;

const TRUN_DATA_OFFSET_PRESENT: u32 = 0x0000_01;
const TRUN_FIRST_SAMPLE_FLAGS_PRESENT: u32 = 0x0000_04;
const TRUN_SAMPLE_DURATION_PRESENT: u32 = 0x0000_0100;
const TRUN_SAMPLE_SIZE_PRESENT: u32 = 0x0000_0200;
const TRUN_SAMPLE_FLAGS_PRESENT: u32 = 0x0000_0400;
const TRUN_SAMPLE_CTO_PRESENT: u32 = 0x0000_0800;

pub struct FragmentParser<'c> {
    config: &'c TrackConfig,
    options: &'c FlattenOptions,
}

impl<'c> FragmentParser<'c> {
    #[must_use]
    pub fn new(config: &'c TrackConfig, options: &'c FlattenOptions) -> Self {
        Self { config, options }
    }

    /// Parses one fragment buffer into decode-ordered samples, borrowed
    /// from `data`.
    pub fn parse<'b>(&self, data: &'b [u8]) -> Result<Vec<Sample<'b>>, FragmentError> {
        let headers: Vec<BoxHeader> = BoxWalker::whole_buffer(data).collect::<Result<_, _>>()?;

        let mut samples = Vec::new();
        let mut intra_offset: i64 = 0;
        let mut last_end: i64 = 0;
        let mut any_moof = false;

        let mut i = 0;
        while i < headers.len() {
            if headers[i].box_type != *b"moof" {
                i += 1;
                continue;
            }
            any_moof = true;
            let moof = headers[i];

            let mut j = i + 1;
            let mdat = loop {
                match headers.get(j) {
                    None => break None,
                    Some(h) if h.box_type == *b"moof" => break None,
                    Some(h) if h.box_type == *b"mdat" => break Some(*h),
                    Some(_) => j += 1,
                }
            };
            let mdat = mdat.ok_or(FragmentError::MoofWithoutMdat(moof.start))?;

            self.parse_pair(data, &moof, &mdat, &mut samples, &mut intra_offset, &mut last_end)?;
            i = j + 1;
        }

        if !any_moof {
            return Err(FragmentError::NoMoof);
        }
        Ok(samples)
    }

    #[allow(clippy::too_many_lines)]
    fn parse_pair<'b>(
        &self,
        data: &'b [u8],
        moof: &BoxHeader,
        mdat: &BoxHeader,
        samples: &mut Vec<Sample<'b>>,
        intra_offset: &mut i64,
        last_end: &mut i64,
    ) -> Result<(), FragmentError> {
        let mdat_payload_start = u64::try_from(mdat.body_start())
            .map_err(|_| FragmentError::IntegerTooLargeForNumber("mdat body_start".to_owned()))?;
        let mdat_payload_end = u64::try_from(mdat.end())
            .map_err(|_| FragmentError::IntegerTooLargeForNumber("mdat end".to_owned()))?;

        let mut pair_samples: Vec<Sample<'b>> = Vec::new();

        for traf in BoxWalker::children_of(data, moof) {
            let traf = traf?;
            if traf.box_type != *b"traf" {
                continue;
            }

            let tfhd_header = find_box(data, traf.body_start(), traf.end(), b"tfhd")
                .ok_or(FragmentError::MissingTfhd)?;
            let defaults = parse_tfhd(data, &tfhd_header)?;
            if defaults.track_id != self.config.track_id {
                continue;
            }

            let tfdt_header = find_box(data, traf.body_start(), traf.end(), b"tfdt")
                .ok_or(FragmentError::MissingTfdt)?;
            let base_media_decode_time = parse_tfdt(data, &tfdt_header)?;

            let base_data_offset = match defaults.base_data_offset {
                Some(v) => v,
                None => u64::try_from(moof.start).map_err(|_| {
                    FragmentError::IntegerTooLargeForNumber("moof start".to_owned())
                })?,
            };

            let mut dts = i64::try_from(base_media_decode_time).map_err(|_| {
                FragmentError::IntegerTooLargeForNumber(format!(
                    "tfdt base_media_decode_time {base_media_decode_time}"
                ))
            })?;

            let mut any_trun = false;
            for trun in BoxWalker::children_of(data, &traf) {
                let trun = trun?;
                if trun.box_type != *b"trun" {
                    continue;
                }
                any_trun = true;

                let parsed = parse_trun(data, &trun)?;

                let data_start: i64 = match parsed.data_offset {
                    Some(off) => {
                        let base = i64::try_from(base_data_offset).map_err(|_| {
                            FragmentError::IntegerTooLargeForNumber(format!(
                                "base_data_offset {base_data_offset}"
                            ))
                        })?;
                        base + i64::from(off)
                    }
                    None if self.options.allow_trun_data_offset_fallback => {
                        if defaults.base_data_offset.is_some() {
                            i64::try_from(moof.end()).map_err(|_| {
                                FragmentError::IntegerTooLargeForNumber("moof end".to_owned())
                            })?
                        } else {
                            i64::try_from(mdat_payload_start).map_err(|_| {
                                FragmentError::IntegerTooLargeForNumber(
                                    "mdat payload start".to_owned(),
                                )
                            })?
                        }
                    }
                    None => return Err(FragmentError::MissingTrunDataOffset),
                };
                let data_start = u64::try_from(data_start).map_err(|_| {
                    FragmentError::IntegerTooLargeForNumber(format!("data_start {data_start}"))
                })?;

                let mut cursor = data_start;
                let mut total: u64 = 0;
                for (idx, entry) in parsed.entries.iter().enumerate() {
                    let duration = entry.duration.unwrap_or(defaults.default_sample_duration);
                    let size = entry.size.unwrap_or(defaults.default_sample_size);
                    if size == 0 {
                        return Err(FragmentError::MissingSampleSize(idx));
                    }
                    let flags = entry.flags.unwrap_or(if idx == 0 {
                        parsed
                            .first_sample_flags
                            .unwrap_or(defaults.default_sample_flags)
                    } else {
                        defaults.default_sample_flags
                    });
                    let cto = entry.cto.unwrap_or(0);
                    let cts = dts + cto;

                    let start = cursor;
                    let sample_end = start.checked_add(u64::from(size)).ok_or_else(|| {
                        FragmentError::IntegerTooLargeForNumber(format!(
                            "sample end at cursor {start} size {size}"
                        ))
                    })?;

                    let slice = data
                        .get(usize::try_from(start).ok().unwrap_or(usize::MAX)
                            ..usize::try_from(sample_end).ok().unwrap_or(usize::MAX))
                        .ok_or(FragmentError::MdatRangeMismatch {
                            data_start,
                            sample_bytes: u64::from(size),
                            mdat_start: mdat_payload_start,
                            mdat_end: mdat_payload_end,
                        })?;

                    pair_samples.push(Sample {
                        dts,
                        cts,
                        duration,
                        size,
                        is_keyframe: is_keyframe(flags),
                        data: slice,
                    });

                    cursor = sample_end;
                    total += u64::from(size);
                    dts += i64::from(duration);
                }

                if data_start < mdat_payload_start || data_start + total > mdat_payload_end {
                    return Err(FragmentError::MdatRangeMismatch {
                        data_start,
                        sample_bytes: total,
                        mdat_start: mdat_payload_start,
                        mdat_end: mdat_payload_end,
                    });
                }
            }

            if !any_trun {
                return Err(FragmentError::MissingTrun);
            }
        }

        if pair_samples.is_empty() {
            return Ok(());
        }

        let first_raw_dts = pair_samples[0].dts;
        if first_raw_dts + *intra_offset < *last_end {
            *intra_offset = *last_end - first_raw_dts;
        }
        for s in &mut pair_samples {
            s.dts += *intra_offset;
            s.cts += *intra_offset;
        }
        *last_end = pair_samples
            .last()
            .map(|s| s.dts + i64::from(s.duration))
            .unwrap_or(*last_end);

        samples.extend(pair_samples);
        Ok(())
    }
}

fn parse_tfhd(data: &[u8], header: &BoxHeader) -> Result<TfhdDefaults, FragmentError> {
    let content = &data[header.body_start()..header.end()];
    let flags = fullbox_flags(content).ok_or(FragmentError::MissingTfhd)?;

    let mut offset = 4;
    let track_id = read_u32(content, offset).ok_or(FragmentError::MissingTfhd)?;
    offset += 4;

    let mut defaults = TfhdDefaults {
        track_id,
        ..TfhdDefaults::default()
    };

    if flags & TFHD_BASE_DATA_OFFSET_PRESENT != 0 {
        defaults.base_data_offset =
            Some(read_u64(content, offset).ok_or(FragmentError::MissingTfhd)?);
        offset += 8;
    }
    if flags & TFHD_SAMPLE_DESCRIPTION_INDEX_PRESENT != 0 {
        offset += 4;
    }
    if flags & TFHD_DEFAULT_SAMPLE_DURATION_PRESENT != 0 {
        defaults.default_sample_duration =
            read_u32(content, offset).ok_or(FragmentError::MissingTfhd)?;
        offset += 4;
    }
    if flags & TFHD_DEFAULT_SAMPLE_SIZE_PRESENT != 0 {
        defaults.default_sample_size =
            read_u32(content, offset).ok_or(FragmentError::MissingTfhd)?;
        offset += 4;
    }
    if flags & TFHD_DEFAULT_SAMPLE_FLAGS_PRESENT != 0 {
        defaults.default_sample_flags =
            read_u32(content, offset).ok_or(FragmentError::MissingTfhd)?;
        offset += 4;
    }

    Ok(defaults)
}

fn parse_tfdt(data: &[u8], header: &BoxHeader) -> Result<u64, FragmentError> {
    let content = &data[header.body_start()..header.end()];
    let version = *content.first().ok_or(FragmentError::MissingTfdt)?;
    match version {
        0 => read_u32(content, 4)
            .map(u64::from)
            .ok_or(FragmentError::MissingTfdt),
        1 => read_u64(content, 4).ok_or(FragmentError::MissingTfdt),
        v => Err(FragmentError::UnsupportedTfdtVersion(v)),
    }
}

struct ParsedTrun {
    entries: Vec<TrunSample>,
    data_offset: Option<i32>,
    first_sample_flags: Option<u32>,
}

fn parse_trun(data: &[u8], header: &BoxHeader) -> Result<ParsedTrun, FragmentError> {
    let content = &data[header.body_start()..header.end()];
    let version = *content.first().ok_or(FragmentError::MissingTrun)?;
    let flags = fullbox_flags(content).ok_or(FragmentError::MissingTrun)?;

    let mut offset = 4;
    let sample_count = read_u32(content, offset).ok_or(FragmentError::MissingTrun)?;
    offset += 4;

    let data_offset = if flags & TRUN_DATA_OFFSET_PRESENT != 0 {
        let v = read_i32(content, offset).ok_or(FragmentError::MissingTrun)?;
        offset += 4;
        Some(v)
    } else {
        None
    };

    let first_sample_flags = if flags & TRUN_FIRST_SAMPLE_FLAGS_PRESENT != 0 {
        let v = read_u32(content, offset).ok_or(FragmentError::MissingTrun)?;
        offset += 4;
        Some(v)
    } else {
        None
    };

    let mut entries = Vec::with_capacity(usize::try_from(sample_count).unwrap_or(0));
    for _ in 0..sample_count {
        let mut entry = TrunSample::default();
        if flags & TRUN_SAMPLE_DURATION_PRESENT != 0 {
            entry.duration = Some(read_u32(content, offset).ok_or(FragmentError::MissingTrun)?);
            offset += 4;
        }
        if flags & TRUN_SAMPLE_SIZE_PRESENT != 0 {
            entry.size = Some(read_u32(content, offset).ok_or(FragmentError::MissingTrun)?);
            offset += 4;
        }
        if flags & TRUN_SAMPLE_FLAGS_PRESENT != 0 {
            entry.flags = Some(read_u32(content, offset).ok_or(FragmentError::MissingTrun)?);
            offset += 4;
        }
        if flags & TRUN_SAMPLE_CTO_PRESENT != 0 {
            let cto = if version == 1 {
                i64::from(read_i32(content, offset).ok_or(FragmentError::MissingTrun)?)
            } else {
                i64::from(read_u32(content, offset).ok_or(FragmentError::MissingTrun)?)
            };
            entry.cto = Some(cto);
            offset += 4;
        }
        entries.push(entry);
    }

    Ok(ParsedTrun {
        entries,
        data_offset,
        first_sample_flags,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn make_box(box_type: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(8 + body.len() as u32).to_be_bytes());
        out.extend_from_slice(box_type);
        out.extend_from_slice(body);
        out
    }

    /// Builds a minimal (moof(mfhd,traf(tfhd,tfdt,trun)), mdat) fragment
    /// for one track with one sample per entry in `sizes`, all of equal
    /// `duration`, the first marked a keyframe. `trun.data_offset` is
    /// patched after assembly to point at the `mdat` payload start.
    fn make_fragment(track_id: u32, base_dts: u32, sizes: &[u32], duration: u32) -> Vec<u8> {
        let total: u32 = sizes.iter().sum();

        let mfhd = make_box(b"mfhd", &[0, 0, 0, 0, 0, 0, 0, 1]);

        let mut tfhd_body = vec![0, 0, 0, 0]; // version + flags (no optional fields)
        tfhd_body.extend_from_slice(&track_id.to_be_bytes());
        let tfhd = make_box(b"tfhd", &tfhd_body);

        let mut tfdt_body = vec![0, 0, 0, 0];
        tfdt_body.extend_from_slice(&base_dts.to_be_bytes());
        let tfdt = make_box(b"tfdt", &tfdt_body);

        // trun flags: data-offset(0x1) | first-sample-flags(0x4) | duration(0x100) | size(0x200)
        let trun_flags: u32 = 0x1 | 0x4 | 0x100 | 0x200;
        let mut trun_body = vec![0, 0, (trun_flags >> 8) as u8, trun_flags as u8];
        trun_body.extend_from_slice(&(sizes.len() as u32).to_be_bytes());
        let data_offset_field_pos_in_trun_body = trun_body.len();
        trun_body.extend_from_slice(&0i32.to_be_bytes()); // data_offset placeholder
        trun_body.extend_from_slice(&0x0200_0000u32.to_be_bytes()); // first sample flags: keyframe
        for size in sizes {
            trun_body.extend_from_slice(&duration.to_be_bytes());
            trun_body.extend_from_slice(&size.to_be_bytes());
        }
        let trun = make_box(b"trun", &trun_body);

        let mut traf_body = tfhd.clone();
        traf_body.extend(tfdt.clone());
        traf_body.extend(trun);
        let traf = make_box(b"traf", &traf_body);

        let mut moof_body = mfhd.clone();
        moof_body.extend(traf);
        let mut moof = make_box(b"moof", &moof_body);

        // Absolute position (within `moof`) of the trun box's data_offset
        // field: moof header + mfhd + traf header + tfhd + tfdt + trun
        // header + version/flags + sample_count.
        let trun_data_offset_pos = 8
            + mfhd.len()
            + 8
            + tfhd.len()
            + tfdt.len()
            + 8
            + data_offset_field_pos_in_trun_body;

        let mdat_payload_start = (moof.len() + 8) as i32; // +8 for mdat's own header
        moof[trun_data_offset_pos..trun_data_offset_pos + 4]
            .copy_from_slice(&mdat_payload_start.to_be_bytes());

        let payload = vec![0xABu8; total as usize];
        let mdat = make_box(b"mdat", &payload);

        let mut out = moof;
        out.extend(mdat);
        out
    }

    fn config(track_id: u32) -> TrackConfig {
        TrackConfig {
            track_id,
            timescale: 30000,
            width: 1920,
            height: 1080,
            stsd: vec![],
            ftyp: None,
        }
    }

    #[test]
    fn parses_single_keyframe_sample() {
        let data = make_fragment(1, 0, &[100], 1000);
        let cfg = config(1);
        let opts = FlattenOptions::default();
        let parser = FragmentParser::new(&cfg, &opts);

        let samples = parser.parse(&data).unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].size, 100);
        assert_eq!(samples[0].dts, 0);
        assert!(samples[0].is_keyframe);
    }

    #[test]
    fn tracks_not_matching_config_are_skipped() {
        let data = make_fragment(7, 0, &[100], 1000);
        let cfg = config(1);
        let opts = FlattenOptions::default();
        let parser = FragmentParser::new(&cfg, &opts);

        let samples = parser.parse(&data).unwrap();
        assert!(samples.is_empty());
    }

    #[test]
    fn missing_moof_is_an_error() {
        let mdat = make_box(b"mdat", &[1, 2, 3]);
        let cfg = config(1);
        let opts = FlattenOptions::default();
        let parser = FragmentParser::new(&cfg, &opts);

        assert!(matches!(parser.parse(&mdat), Err(FragmentError::NoMoof)));
    }

    #[test]
    fn moof_without_mdat_is_an_error() {
        let mfhd = make_box(b"mfhd", &[0, 0, 0, 0, 0, 0, 0, 1]);
        let moof = make_box(b"moof", &mfhd);
        let cfg = config(1);
        let opts = FlattenOptions::default();
        let parser = FragmentParser::new(&cfg, &opts);

        assert!(matches!(
            parser.parse(&moof),
            Err(FragmentError::MoofWithoutMdat(_))
        ));
    }
}
