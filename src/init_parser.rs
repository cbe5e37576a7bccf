//! Extracts a [`TrackConfig`] from an init segment (`ftyp`? + `moov`).

use crate::box_walker::{find_box, BoxHeader, BoxWalker};
use crate::bytes_ext::read_u32;
use crate::error::InitError;
use crate::track_config::TrackConfig;

/// Walks an init segment's `moov` and returns the config of its first
/// video track.
pub fn parse(data: &[u8]) -> Result<TrackConfig, InitError> {
    let mut ftyp = None;
    let mut moov = None;
    for header in BoxWalker::whole_buffer(data) {
        let header = header?;
        match &header.box_type {
            b"ftyp" => ftyp = Some(data[header.start..header.end()].to_vec()),
            b"moov" => moov = Some(header),
            _ => {}
        }
    }
    let moov = moov.ok_or(InitError::MissingMoov)?;

    for trak in BoxWalker::children_of(data, &moov) {
        let trak = trak?;
        if trak.box_type != *b"trak" {
            continue;
        }

        let Some(mdia) = find_box(data, trak.body_start(), trak.end(), b"mdia") else {
            continue;
        };
        let Some(hdlr) = find_box(data, mdia.body_start(), mdia.end(), b"hdlr") else {
            continue;
        };
        let handler_type_offset = hdlr.body_start() + 8;
        let Some(handler_type) = data.get(handler_type_offset..handler_type_offset + 4) else {
            continue;
        };
        if handler_type != b"vide" {
            continue;
        }

        let tkhd =
            find_box(data, trak.body_start(), trak.end(), b"tkhd").ok_or(InitError::MissingTkhd)?;
        let (track_id, width, height) = parse_tkhd(data, &tkhd)?;

        let mdhd =
            find_box(data, mdia.body_start(), mdia.end(), b"mdhd").ok_or(InitError::MissingMdhd)?;
        let timescale = parse_mdhd_timescale(data, &mdhd)?;

        let stsd = find_box(data, mdia.body_start(), mdia.end(), b"minf")
            .and_then(|minf| find_box(data, minf.body_start(), minf.end(), b"stbl"))
            .and_then(|stbl| find_box(data, stbl.body_start(), stbl.end(), b"stsd"))
            .ok_or(InitError::MissingStsd)?;

        return Ok(TrackConfig {
            track_id,
            timescale,
            width,
            height,
            stsd: data[stsd.start..stsd.end()].to_vec(),
            ftyp,
        });
    }

    Err(InitError::NoVideoTrack)
}

#[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
fn parse_tkhd(data: &[u8], header: &BoxHeader) -> Result<(u32, u16, u16), InitError> {
    let content = &data[header.body_start()..header.end()];
    let version = *content.first().ok_or(InitError::MissingTkhd)?;
    let track_id_offset = if version == 0 { 12 } else { 20 };
    let track_id = read_u32(content, track_id_offset).ok_or(InitError::MissingTkhd)?;

    let len = content.len();
    if len < 8 {
        return Err(InitError::MissingTkhd);
    }
    let width_fixed = read_u32(content, len - 8).ok_or(InitError::MissingTkhd)?;
    let height_fixed = read_u32(content, len - 4).ok_or(InitError::MissingTkhd)?;

    Ok((track_id, (width_fixed >> 16) as u16, (height_fixed >> 16) as u16))
}

fn parse_mdhd_timescale(data: &[u8], header: &BoxHeader) -> Result<u32, InitError> {
    let content = &data[header.body_start()..header.end()];
    let version = *content.first().ok_or(InitError::MissingMdhd)?;
    let offset = match version {
        0 => 12,
        1 => 20,
        v => return Err(InitError::UnsupportedMdhdVersion(v)),
    };
    read_u32(content, offset).ok_or(InitError::MissingMdhd)
}
