//! Classifies each input buffer as carrying an init segment, a
//! fragment, or both, based on which top-level boxes it contains.

use crate::box_walker::BoxWalker;
use crate::error::SplitError;

struct Classified {
    has_moov: bool,
    has_moof: bool,
}

fn classify(data: &[u8]) -> Classified {
    let mut has_moov = false;
    let mut has_moof = false;
    for header in BoxWalker::whole_buffer(data).filter_map(Result::ok) {
        match &header.box_type {
            b"moov" => has_moov = true,
            b"moof" => has_moof = true,
            _ => {}
        }
    }
    Classified { has_moov, has_moof }
}

pub struct SplitInputs<'a> {
    /// The first buffer seen carrying a `moov` box.
    pub init_segment: &'a [u8],
    /// Every buffer carrying a `moof` box, in input order. A buffer
    /// that is also the init segment appears here too.
    pub fragments: Vec<&'a [u8]>,
}

/// Sorts a set of input buffers into one init segment and zero or more
/// fragments, per their top-level box contents.
pub fn split<'a>(buffers: &[&'a [u8]]) -> Result<SplitInputs<'a>, SplitError> {
    let mut init_segment = None;
    let mut fragments = Vec::new();

    for &buf in buffers {
        let classified = classify(buf);
        let became_init = classified.has_moov && init_segment.is_none();
        if became_init {
            init_segment = Some(buf);
        }
        // Every buffer is a fragment unless it is the one chosen as the
        // init segment and carries no `moof` of its own: a `moov`-only
        // buffer that lost the race to become init, or one with neither
        // box, is still trusted to the fragment parser, which fails
        // cleanly on it (`NoMoof`) rather than this silently dropping it.
        if classified.has_moof || !became_init {
            fragments.push(buf);
        }
    }

    let init_segment = init_segment.ok_or(SplitError::NoInitSegment)?;
    Ok(SplitInputs {
        init_segment,
        fragments,
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

    #[test]
    fn separates_init_segment_from_fragments() {
        let init = make_box(b"moov", &[]);
        let frag1 = make_box(b"moof", &[]);
        let frag2 = make_box(b"moof", &[]);
        let buffers: Vec<&[u8]> = vec![&init, &frag1, &frag2];

        let result = split(&buffers).unwrap();
        assert_eq!(result.init_segment, init.as_slice());
        assert_eq!(result.fragments.len(), 2);
    }

    #[test]
    fn buffer_with_both_moov_and_moof_counts_as_both() {
        let combined = [make_box(b"moov", &[]), make_box(b"moof", &[])].concat();
        let buffers: Vec<&[u8]> = vec![&combined];

        let result = split(&buffers).unwrap();
        assert_eq!(result.init_segment, combined.as_slice());
        assert_eq!(result.fragments.len(), 1);
    }

    #[test]
    fn missing_init_segment_is_an_error() {
        let frag = make_box(b"moof", &[]);
        let buffers: Vec<&[u8]> = vec![&frag];
        assert!(matches!(split(&buffers), Err(SplitError::NoInitSegment)));
    }

    #[test]
    fn buffer_with_neither_box_is_trusted_to_the_fragment_parser() {
        let init = make_box(b"moov", &[]);
        let mystery = make_box(b"free", &[1, 2, 3]);
        let buffers: Vec<&[u8]> = vec![&init, &mystery];

        let result = split(&buffers).unwrap();
        assert_eq!(result.fragments, vec![mystery.as_slice()]);
    }

    #[test]
    fn second_moov_only_buffer_is_trusted_to_the_fragment_parser() {
        let init = make_box(b"moov", &[]);
        let second_moov = make_box(b"moov", &[1, 2, 3]);
        let buffers: Vec<&[u8]> = vec![&init, &second_moov];

        let result = split(&buffers).unwrap();
        assert_eq!(result.init_segment, init.as_slice());
        assert_eq!(result.fragments, vec![second_moov.as_slice()]);
    }
}
