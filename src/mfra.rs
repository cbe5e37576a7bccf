//! Optional `mfra`/`tfra`/`mfro` random-access index. Not used by the
//! core remux pipeline: `mfra` indexes fragments by byte offset into a
//! specific source file, which a remux invalidates. Exposed for callers
//! that want to read an index out of a source file directly.

use crate::box_walker::{find_box, BoxHeader, BoxWalker};
use crate::bytes_ext::{read_u32, read_u64};
use crate::error::MfraError;

#[derive(Clone, Copy, Debug)]
pub struct TfraEntry {
    pub time: u64,
    pub moof_offset: u64,
    pub traf_number: u32,
    pub trun_number: u32,
    pub sample_number: u32,
}

#[derive(Clone, Debug)]
pub struct Tfra {
    pub track_id: u32,
    pub entries: Vec<TfraEntry>,
}

/// Parses every `tfra` table out of an `mfra` box. `mfro` (the trailing
/// pointer back to the start of `mfra`) is not needed here since the
/// caller already located the whole buffer.
pub fn parse(data: &[u8]) -> Result<Vec<Tfra>, MfraError> {
    let mfra = find_box(data, 0, data.len(), b"mfra").ok_or(MfraError::MissingMfra)?;

    let mut tables = Vec::new();
    for header in BoxWalker::children_of(data, &mfra) {
        let header = header?;
        if header.box_type != *b"tfra" {
            continue;
        }
        tables.push(parse_tfra(data, &header)?);
    }
    Ok(tables)
}

fn parse_tfra(data: &[u8], header: &BoxHeader) -> Result<Tfra, MfraError> {
    let content = &data[header.body_start()..header.end()];
    let version = *content.first().ok_or(MfraError::Truncated)?;
    let track_id = read_u32(content, 4).ok_or(MfraError::Truncated)?;
    let size_bits = read_u32(content, 8).ok_or(MfraError::Truncated)?;
    let length_of_traf_num = packed_field_width(size_bits >> 4);
    let length_of_trun_num = packed_field_width(size_bits >> 2);
    let length_of_sample_num = packed_field_width(size_bits);
    let number_of_entries = read_u32(content, 12).ok_or(MfraError::Truncated)?;

    let mut offset = 16usize;
    let mut entries =
        Vec::with_capacity(usize::try_from(number_of_entries).unwrap_or(0));

    for _ in 0..number_of_entries {
        let (time, moof_offset) = match version {
            0 => {
                let time = u64::from(read_u32(content, offset).ok_or(MfraError::Truncated)?);
                let moof_offset =
                    u64::from(read_u32(content, offset + 4).ok_or(MfraError::Truncated)?);
                offset += 8;
                (time, moof_offset)
            }
            1 => {
                let time = read_u64(content, offset).ok_or(MfraError::Truncated)?;
                let moof_offset = read_u64(content, offset + 8).ok_or(MfraError::Truncated)?;
                offset += 16;
                (time, moof_offset)
            }
            v => return Err(MfraError::UnsupportedTfraVersion(v)),
        };

        let traf_number = read_packed(content, &mut offset, length_of_traf_num)?;
        let trun_number = read_packed(content, &mut offset, length_of_trun_num)?;
        let sample_number = read_packed(content, &mut offset, length_of_sample_num)?;

        entries.push(TfraEntry {
            time,
            moof_offset,
            traf_number,
            trun_number,
            sample_number,
        });
    }

    Ok(Tfra { track_id, entries })
}

/// The two-bit packed width fields in `tfra` store `width - 1`.
fn packed_field_width(bits: u32) -> usize {
    usize::try_from(bits & 0b11).unwrap_or(0) + 1
}

fn read_packed(data: &[u8], offset: &mut usize, width: usize) -> Result<u32, MfraError> {
    let bytes = data.get(*offset..*offset + width).ok_or(MfraError::Truncated)?;
    let mut value: u32 = 0;
    for &b in bytes {
        value = (value << 8) | u32::from(b);
    }
    *offset += width;
    Ok(value)
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

    fn make_tfra_v0(track_id: u32, entries: &[(u32, u32, u32, u32, u32)]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&[0, 0, 0, 0]); // version + flags
        body.extend_from_slice(&track_id.to_be_bytes());
        body.extend_from_slice(&0u32.to_be_bytes()); // all width fields = 1 byte
        body.extend_from_slice(&u32::try_from(entries.len()).unwrap().to_be_bytes());
        for &(time, moof_offset, traf, trun, sample) in entries {
            body.extend_from_slice(&time.to_be_bytes());
            body.extend_from_slice(&moof_offset.to_be_bytes());
            body.push(u8::try_from(traf).unwrap());
            body.push(u8::try_from(trun).unwrap());
            body.push(u8::try_from(sample).unwrap());
        }
        make_box(b"tfra", &body)
    }

    #[test]
    fn parses_single_entry_v0_table() {
        let tfra = make_tfra_v0(7, &[(1000, 4096, 1, 1, 1)]);
        let mfra = make_box(b"mfra", &tfra);

        let tables = parse(&mfra).unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].track_id, 7);
        assert_eq!(tables[0].entries.len(), 1);
        assert_eq!(tables[0].entries[0].time, 1000);
        assert_eq!(tables[0].entries[0].moof_offset, 4096);
        assert_eq!(tables[0].entries[0].sample_number, 1);
    }

    #[test]
    fn missing_mfra_is_an_error() {
        let data = make_box(b"free", &[]);
        assert!(matches!(parse(&data), Err(MfraError::MissingMfra)));
    }
}
