//! Tiny big-endian integer readers shared by the init and fragment
//! parsers. Every ISO-BMFF field is big-endian; these just bounds-check
//! and decode fixed-width slices.

#[must_use]
pub fn read_u16(data: &[u8], offset: usize) -> Option<u16> {
    data.get(offset..offset + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
}

#[must_use]
pub fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    data.get(offset..offset + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

#[must_use]
#[allow(clippy::cast_possible_wrap, clippy::as_conversions)]
pub fn read_i32(data: &[u8], offset: usize) -> Option<i32> {
    read_u32(data, offset).map(|v| v as i32)
}

#[must_use]
pub fn read_u64(data: &[u8], offset: usize) -> Option<u64> {
    data.get(offset..offset + 8).map(|b| {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        u64::from_be_bytes(buf)
    })
}

/// Decodes a full-box's packed version+flags content (the first four
/// bytes of any full box) into the 24-bit flags value.
#[must_use]
pub fn fullbox_flags(content: &[u8]) -> Option<u32> {
    let b = content.get(0..4)?;
    Some((u32::from(b[1]) << 16) ^ (u32::from(b[2]) << 8) ^ u32::from(b[3]))
}
