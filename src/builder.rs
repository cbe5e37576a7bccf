//! Assembles a progressive `ftyp`/`moov`/`mdat` file from one ordered
//! sample list, reusing the source track's `stsd` (and `ftyp`, if any)
//! verbatim.

use crate::box_walker::BoxWalker;
use crate::error::BuilderError;
use crate::mp4::{
    BoxType, Boxes, CompatibleBrandElem, Co64, Ctts, CttsEntries, CttsEntryV0, CttsEntryV1, Dinf,
    Dref, FullBox, Ftyp, Hdlr, ImmutableBox, Mdat, Mdhd, MdhdV0, MdhdVersion, Mdia, Minf, Mp4Error,
    Moov, Mvhd, MvhdV0, MvhdVersion, Stbl, Stco, Stsc, StscEntry, Stss, Stsz, Stts, SttsEntry,
    Tkhd, TkhdV0, TkhdVersion, Trak, Url, Vmhd, u32_to_flags,
};
use crate::sample::Sample;
use crate::track_config::TrackConfig;

pub struct BuiltFile {
    pub data: Vec<u8>,
    pub idr_timestamps: Vec<f64>,
}

const DEFAULT_COMPATIBLE_BRANDS: [[u8; 4]; 4] = [*b"isom", *b"iso2", *b"avc1", *b"mp41"];

/// Wraps already-encoded box content so it can be re-emitted verbatim,
/// the way [`Mdat`] carries its payload as a plain byte vector rather
/// than modeling the box's internal structure.
struct RawBox {
    box_type: BoxType,
    content: Vec<u8>,
}

impl ImmutableBox for RawBox {
    fn box_type(&self) -> BoxType {
        self.box_type
    }

    fn size(&self) -> usize {
        self.content.len()
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        w.write_all(&self.content)?;
        Ok(())
    }
}

impl From<RawBox> for Box<dyn ImmutableBox> {
    fn from(value: RawBox) -> Self {
        Box::new(value)
    }
}

/// Strips a box's header off already-encoded bytes, tolerating both
/// compact and extended-size headers. Returns an empty body if `full`
/// doesn't parse as a single box.
fn box_content(full: &[u8]) -> Vec<u8> {
    match BoxWalker::whole_buffer(full).next().and_then(Result::ok) {
        Some(header) => full[header.body_start()..header.end()].to_vec(),
        None => Vec::new(),
    }
}

fn ftyp_box(config: &TrackConfig) -> Boxes {
    match &config.ftyp {
        Some(raw) => Boxes::new(RawBox {
            box_type: *b"ftyp",
            content: box_content(raw),
        }),
        None => Boxes::new(Ftyp {
            major_brand: *b"isom",
            minor_version: 0x0000_0200,
            compatible_brands: DEFAULT_COMPATIBLE_BRANDS
                .into_iter()
                .map(CompatibleBrandElem)
                .collect(),
        }),
    }
}

fn stsd_box(config: &TrackConfig) -> Boxes {
    Boxes::new(RawBox {
        box_type: *b"stsd",
        content: box_content(&config.stsd),
    })
}

#[allow(clippy::cast_precision_loss, clippy::as_conversions)]
fn dts_to_seconds(dts: i64, timescale: u32) -> f64 {
    dts as f64 / f64::from(timescale)
}

fn sample_sizes(samples: &[Sample<'_>]) -> Result<Vec<u32>, BuilderError> {
    samples
        .iter()
        .map(|s| {
            u32::try_from(s.data.len())
                .map_err(|_| BuilderError::IntegerTooLargeForNumber(format!(
                    "sample size {}",
                    s.data.len()
                )))
        })
        .collect()
}

fn total_duration(samples: &[Sample<'_>]) -> Result<u32, BuilderError> {
    let sum: u64 = samples.iter().map(|s| u64::from(s.duration)).sum();
    u32::try_from(sum)
        .map_err(|_| BuilderError::IntegerTooLargeForNumber(format!("movie duration {sum}")))
}

fn stts_entries(samples: &[Sample<'_>]) -> Vec<SttsEntry> {
    let mut entries: Vec<SttsEntry> = Vec::new();
    for s in samples {
        match entries.last_mut() {
            Some(last) if last.sample_delta == s.duration => last.sample_count += 1,
            _ => entries.push(SttsEntry {
                sample_count: 1,
                sample_delta: s.duration,
            }),
        }
    }
    entries
}

/// `None` when every sample's composition offset is zero: `ctts` is
/// only worth emitting when B-frame reordering actually happened.
fn ctts_entries(samples: &[Sample<'_>]) -> Result<Option<CttsEntries>, BuilderError> {
    let offsets: Vec<i64> = samples.iter().map(|s| s.cts - s.dts).collect();
    if offsets.iter().all(|&o| o == 0) {
        return Ok(None);
    }
    let any_negative = offsets.iter().any(|&o| o < 0);

    let mut runs: Vec<(u32, i64)> = Vec::new();
    for &o in &offsets {
        match runs.last_mut() {
            Some(last) if last.1 == o => last.0 += 1,
            _ => runs.push((1, o)),
        }
    }

    if any_negative {
        let entries = runs
            .into_iter()
            .map(|(count, offset)| {
                i32::try_from(offset)
                    .map(|offset| CttsEntryV1 {
                        sample_count: count,
                        sample_offset: offset,
                    })
                    .map_err(|_| {
                        BuilderError::IntegerTooLargeForNumber(format!("ctts offset {offset}"))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(CttsEntries::V1(entries)))
    } else {
        let entries = runs
            .into_iter()
            .map(|(count, offset)| {
                u32::try_from(offset)
                    .map(|offset| CttsEntryV0 {
                        sample_count: count,
                        sample_offset: offset,
                    })
                    .map_err(|_| {
                        BuilderError::IntegerTooLargeForNumber(format!("ctts offset {offset}"))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(CttsEntries::V0(entries)))
    }
}

/// `None` when no sample is a keyframe: an empty `stss` would claim no
/// sample is a sync sample, which is worse than omitting it.
fn stss_numbers(samples: &[Sample<'_>]) -> Result<Option<Vec<u32>>, BuilderError> {
    let mut numbers = Vec::new();
    for (i, s) in samples.iter().enumerate() {
        if s.is_keyframe {
            let n = u32::try_from(i + 1).map_err(|_| {
                BuilderError::IntegerTooLargeForNumber(format!("stss index {}", i + 1))
            })?;
            numbers.push(n);
        }
    }
    Ok(if numbers.is_empty() { None } else { Some(numbers) })
}

fn build_stsz(sizes: &[u32]) -> Result<Stsz, BuilderError> {
    let sample_count = u32::try_from(sizes.len())
        .map_err(|_| BuilderError::IntegerTooLargeForNumber(format!("sample count {}", sizes.len())))?;
    Ok(Stsz {
        full_box: FullBox::default(),
        sample_size: 0,
        sample_count,
        entry_sizes: sizes.to_vec(),
    })
}

fn chunk_offsets_box(use_co64: bool, offsets: &[u64]) -> Result<Boxes, BuilderError> {
    if use_co64 {
        Ok(Boxes::new(Co64 {
            full_box: FullBox::default(),
            chunk_offsets: offsets.to_vec(),
        }))
    } else {
        let offsets32 = offsets
            .iter()
            .map(|&o| {
                u32::try_from(o).map_err(|_| BuilderError::ChunkOffsetOverflow(u128::from(o)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Boxes::new(Stco {
            full_box: FullBox::default(),
            chunk_offsets: offsets32,
        }))
    }
}

struct MoovParts {
    total_duration: u32,
    stts: Vec<SttsEntry>,
    ctts: Option<CttsEntries>,
    stss: Option<Vec<u32>>,
    stsz: Stsz,
    stsc: Stsc,
}

fn assemble_moov(config: &TrackConfig, parts: &MoovParts, chunk_offsets: Boxes) -> Boxes {
    let mut stbl = Boxes::new(Stbl).with_child(stsd_box(config)).with_child(
        Boxes::new(Stts {
            full_box: FullBox::default(),
            entries: parts.stts.clone(),
        }),
    );
    if let Some(ctts) = &parts.ctts {
        stbl = stbl.with_child(Boxes::new(Ctts {
            flags: [0, 0, 0],
            entries: ctts.clone(),
        }));
    }
    if let Some(stss) = &parts.stss {
        stbl = stbl.with_child(Boxes::new(Stss {
            full_box: FullBox::default(),
            sample_numbers: stss.clone(),
        }));
    }
    stbl = stbl
        .with_child(Boxes::new(parts.stsc.clone()))
        .with_child(Boxes::new(parts.stsz.clone()))
        .with_child(chunk_offsets);

    let minf = Boxes::new(Minf)
        .with_child(Boxes::new(Vmhd {
            full_box: FullBox {
                version: 0,
                flags: u32_to_flags(0x0000_0001),
            },
            graphics_mode: 0,
            opcolor: [0, 0, 0],
        }))
        .with_child(
            Boxes::new(Dinf).with_child(
                Boxes::new(Dref {
                    full_box: FullBox::default(),
                    entry_count: 1,
                })
                .with_child(Boxes::new(Url {
                    full_box: FullBox {
                        version: 0,
                        flags: u32_to_flags(0x0000_0001),
                    },
                    location: String::new(),
                })),
            ),
        )
        .with_child(stbl);

    let mdia = Boxes::new(Mdia)
        .with_child(Boxes::new(Mdhd {
            flags: [0, 0, 0],
            version: MdhdVersion::V0(MdhdV0 {
                creation_time: 0,
                modification_time: 0,
                duration: parts.total_duration,
            }),
            timescale: config.timescale,
            pad: false,
            language: [0x55, 0x4e, 0x44], // "und" 5-bit-packed.
            pre_defined: 0,
        }))
        .with_child(Boxes::new(Hdlr {
            full_box: FullBox::default(),
            pre_defined: 0,
            handler_type: *b"vide",
            reserved: [0, 0, 0],
            name: "VideoHandler".to_owned(),
        }))
        .with_child(minf);

    let trak = Boxes::new(Trak)
        .with_child(Boxes::new(Tkhd {
            flags: u32_to_flags(0x0000_0007),
            version: TkhdVersion::V0(TkhdV0 {
                creation_time: 0,
                modification_time: 0,
                duration: parts.total_duration,
            }),
            track_id: config.track_id,
            reserved0: 0,
            reserved1: [0, 0],
            layer: 0,
            alternate_group: 0,
            volume: 0,
            reserved2: 0,
            matrix: [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000],
            width: u32::from(config.width) << 16,
            height: u32::from(config.height) << 16,
        }))
        .with_child(mdia);

    Boxes::new(Moov)
        .with_child(Boxes::new(Mvhd {
            flags: [0, 0, 0],
            version: MvhdVersion::V0(MvhdV0 {
                creation_time: 0,
                modification_time: 0,
                duration: parts.total_duration,
            }),
            timescale: config.timescale,
            rate: 0x0001_0000,
            volume: 0x0100,
            reserved: 0,
            reserved2: [0, 0],
            matrix: [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000],
            pre_defined: [0; 6],
            next_track_id: 2,
        }))
        .with_child(trak)
}

/// Builds a standalone progressive MP4 from one ordered, already
/// timeline-normalized sample list.
pub fn build(config: &TrackConfig, samples: &[Sample<'_>]) -> Result<BuiltFile, BuilderError> {
    if samples.is_empty() {
        return Err(BuilderError::EmptySampleList);
    }

    let sizes = sample_sizes(samples)?;
    let parts = MoovParts {
        total_duration: total_duration(samples)?,
        stts: stts_entries(samples),
        ctts: ctts_entries(samples)?,
        stss: stss_numbers(samples)?,
        stsz: build_stsz(&sizes)?,
        stsc: Stsc {
            full_box: FullBox::default(),
            entries: vec![StscEntry {
                first_chunk: 1,
                samples_per_chunk: 1,
                sample_description_index: 1,
            }],
        },
    };

    let ftyp = ftyp_box(config);
    let mdat_len: u64 = sizes.iter().map(|&s| u64::from(s)).sum();
    let mdat_header_size: u64 = if u32::try_from(mdat_len + 8).is_ok() {
        8
    } else {
        16
    };

    let mut use_co64 = false;
    let moov = loop {
        let zero_offsets = vec![0u64; sizes.len()];
        let stub = assemble_moov(config, &parts, chunk_offsets_box(use_co64, &zero_offsets)?);
        let prefix_size = ftyp.size() + stub.size();
        let mdat_start = u64::try_from(prefix_size)
            .map_err(|_| BuilderError::IntegerTooLargeForNumber(format!("prefix size {prefix_size}")))?
            + mdat_header_size;

        let mut offsets = Vec::with_capacity(sizes.len());
        let mut cursor = mdat_start;
        for &sz in &sizes {
            offsets.push(cursor);
            cursor += u64::from(sz);
        }
        let max_offset = offsets.iter().copied().max().unwrap_or(0);

        if !use_co64 && max_offset > u64::from(u32::MAX) {
            use_co64 = true;
            continue;
        }

        break assemble_moov(config, &parts, chunk_offsets_box(use_co64, &offsets)?);
    };

    let mut data = Vec::new();
    ftyp.marshal(&mut data)?;
    moov.marshal(&mut data)?;

    let mut mdat_payload = Vec::with_capacity(usize::try_from(mdat_len).unwrap_or(0));
    for s in samples {
        mdat_payload.extend_from_slice(s.data);
    }
    Boxes::new(Mdat(mdat_payload)).marshal(&mut data)?;

    let idr_timestamps = samples
        .iter()
        .filter(|s| s.is_keyframe)
        .map(|s| dts_to_seconds(s.dts, config.timescale))
        .collect();

    Ok(BuiltFile { data, idr_timestamps })
}
