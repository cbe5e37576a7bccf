//! Generic ISO-BMFF box walking: byte-level iteration over a range of a
//! buffer, decoding compact and large sizes without knowing what any box
//! type means. Used by both the init and fragment parsers; box semantics
//! live one layer up.

use crate::error::BoxWalkError;

/// A decoded box header. `start`/`end` are absolute offsets into the
/// buffer the walker was constructed over, so headers from nested walks
/// stay comparable with headers from the top level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoxHeader {
    pub box_type: [u8; 4],
    pub start: usize,
    pub size: usize,
    pub header_size: usize,
}

impl BoxHeader {
    #[must_use]
    pub fn end(&self) -> usize {
        self.start + self.size
    }

    #[must_use]
    pub fn body_start(&self) -> usize {
        self.start + self.header_size
    }
}

/// Walks `[start, end)` of `data`, non-recursively, yielding top-level
/// box headers. Children are walked by constructing a new `BoxWalker`
/// over `[header.body_start(), header.end())`. Restartable: cloning or
/// re-constructing from the same bounds reproduces the same sequence.
#[derive(Clone)]
pub struct BoxWalker<'a> {
    data: &'a [u8],
    pos: usize,
    end: usize,
}

impl<'a> BoxWalker<'a> {
    #[must_use]
    pub fn new(data: &'a [u8], start: usize, end: usize) -> Self {
        let end = end.min(data.len());
        Self {
            data,
            pos: start.min(end),
            end,
        }
    }

    #[must_use]
    pub fn whole_buffer(data: &'a [u8]) -> Self {
        Self::new(data, 0, data.len())
    }

    #[must_use]
    pub fn children_of(data: &'a [u8], parent: &BoxHeader) -> Self {
        Self::new(data, parent.body_start(), parent.end())
    }
}

impl Iterator for BoxWalker<'_> {
    type Item = Result<BoxHeader, BoxWalkError>;

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.pos;
        let remaining = self.end.saturating_sub(start);
        if remaining < 8 {
            return None;
        }

        let size32 = u32::from_be_bytes([
            self.data[start],
            self.data[start + 1],
            self.data[start + 2],
            self.data[start + 3],
        ]);
        let box_type: [u8; 4] = [
            self.data[start + 4],
            self.data[start + 5],
            self.data[start + 6],
            self.data[start + 7],
        ];

        let (size, header_size) = if size32 == 1 {
            if remaining < 16 {
                return None;
            }
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&self.data[start + 8..start + 16]);
            let size64 = u64::from_be_bytes(buf);
            let size = usize::try_from(size64).map_err(|_| BoxWalkError::BoxTooLarge(size64));
            match size {
                Ok(size) => (size, 16),
                Err(e) => {
                    self.pos = self.end;
                    return Some(Err(e));
                }
            }
        } else if size32 == 0 {
            (self.end - start, 8)
        } else {
            (size32 as usize, 8)
        };

        if size < header_size || start + size > self.end {
            self.pos = self.end;
            return None;
        }

        self.pos = start + size;
        Some(Ok(BoxHeader {
            box_type,
            start,
            size,
            header_size,
        }))
    }
}

/// Finds the first direct child of `box_type` within `[start, end)`.
#[must_use]
pub fn find_box(data: &[u8], start: usize, end: usize, box_type: &[u8; 4]) -> Option<BoxHeader> {
    BoxWalker::new(data, start, end)
        .filter_map(Result::ok)
        .find(|h| &h.box_type == box_type)
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

    fn make_large_box(box_type: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&1u32.to_be_bytes());
        out.extend_from_slice(box_type);
        out.extend_from_slice(&(16 + body.len() as u64).to_be_bytes());
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn walks_compact_boxes() {
        let mut data = make_box(b"ftyp", &[1, 2, 3, 4]);
        data.extend(make_box(b"free", &[]));

        let headers: Vec<_> = BoxWalker::whole_buffer(&data)
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(headers.len(), 2);
        assert_eq!(headers[0].box_type, *b"ftyp");
        assert_eq!(headers[0].start, 0);
        assert_eq!(headers[0].size, 12);
        assert_eq!(headers[0].header_size, 8);
        assert_eq!(headers[1].box_type, *b"free");
        assert_eq!(headers[1].start, 12);
    }

    #[test]
    fn decodes_large_size() {
        let data = make_large_box(b"mdat", &[9, 9, 9]);
        let headers: Vec<_> = BoxWalker::whole_buffer(&data)
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0].header_size, 16);
        assert_eq!(headers[0].size, 19);
    }

    #[test]
    fn box_extending_to_end_has_size_zero_sentinel() {
        let mut data = vec![0, 0, 0, 0];
        data.extend_from_slice(b"mdat");
        data.extend_from_slice(&[1, 2, 3, 4, 5]);

        let headers: Vec<_> = BoxWalker::whole_buffer(&data)
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0].size, 13);
        assert_eq!(headers[0].end(), 13);
    }

    #[test]
    fn truncated_tail_is_tolerated() {
        let mut data = make_box(b"ftyp", &[1, 2, 3, 4]);
        data.extend_from_slice(&[0, 0, 0, 20]); // claims a 20-byte box but data ends here
        data.extend_from_slice(b"free");

        let headers: Vec<_> = BoxWalker::whole_buffer(&data)
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0].box_type, *b"ftyp");
    }

    #[test]
    fn find_box_locates_direct_child() {
        let mut moov = make_box(b"mvhd", &[0; 4]);
        moov.extend(make_box(b"trak", &[]));
        let data = make_box(b"moov", &moov);

        let moov_hdr = find_box(&data, 0, data.len(), b"moov").unwrap();
        let trak_hdr = find_box(&data, moov_hdr.body_start(), moov_hdr.end(), b"trak").unwrap();
        assert_eq!(trak_hdr.box_type, *b"trak");
    }

    #[test]
    fn large_size_within_usize_range_decodes_without_error() {
        let data = make_large_box(b"mdat", &[1, 2, 3]);
        let header = BoxWalker::whole_buffer(&data).next().unwrap().unwrap();
        assert_eq!(header.size, 19);
    }
}
