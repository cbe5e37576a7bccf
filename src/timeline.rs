//! Splices per-file sample lists into one monotonic decode-order
//! timeline, in three phases: per-file duration inference, cross-file
//! offsetting, then global monotonization without re-sorting (so
//! B-frame composition offsets survive intact).

use crate::options::FlattenOptions;
use crate::sample::Sample;

pub struct NormalizedTimeline<'a> {
    pub samples: Vec<Sample<'a>>,
    pub discontinuity_detected: bool,
}

#[must_use]
pub fn normalize<'a>(
    files: Vec<Vec<Sample<'a>>>,
    options: &FlattenOptions,
) -> NormalizedTimeline<'a> {
    let mut discontinuity_detected = false;
    let mut timeline_offset: i64 = 0;
    let mut all_samples: Vec<Sample<'a>> = Vec::new();

    for mut file_samples in files {
        discontinuity_detected |= repair_durations(&mut file_samples);
        let inferred_end = file_samples
            .iter()
            .map(|s| s.dts + i64::from(s.duration))
            .max()
            .unwrap_or(0);

        if options.normalize_across_files {
            for s in &mut file_samples {
                s.dts += timeline_offset;
                s.cts += timeline_offset;
            }
            timeline_offset += inferred_end;
        }

        all_samples.extend(file_samples);
    }

    monotonize(&mut all_samples);

    NormalizedTimeline {
        samples: all_samples,
        discontinuity_detected,
    }
}

/// Phase A: repairs zero-duration samples in input order, returning
/// whether a repaired gap signaled a timeline jump larger than one tick.
fn repair_durations(samples: &mut [Sample<'_>]) -> bool {
    let mut discontinuity = false;
    let n = samples.len();
    for i in 0..n {
        if samples[i].duration != 0 {
            continue;
        }
        let repaired = if i + 1 < n {
            let gap = samples[i + 1].dts - samples[i].dts;
            if gap > 1 {
                discontinuity = true;
            }
            u32::try_from(gap.max(1)).unwrap_or(1)
        } else if i > 0 {
            samples[i - 1].duration.max(1)
        } else {
            1
        };
        samples[i].duration = repaired;
    }
    discontinuity
}

/// Phase C: sanitizes negative timestamps, then walks forward ensuring
/// each sample's dts is at least the previous sample's end, without
/// ever re-ordering the slice.
fn monotonize(samples: &mut [Sample<'_>]) {
    for s in samples.iter_mut() {
        if s.dts < 0 {
            s.dts = 0;
        }
        if s.cts < s.dts {
            s.cts = s.dts;
        }
    }

    for i in 1..samples.len() {
        let prev_dts = samples[i - 1].dts;
        let prev_end = prev_dts + i64::from(samples[i - 1].duration.max(1));
        let cur_dts = samples[i].dts;
        let target_dts = cur_dts.max(prev_dts).max(prev_end);
        let delta = target_dts - cur_dts;
        if delta != 0 {
            samples[i].dts += delta;
            samples[i].cts += delta;
        }
        if samples[i].cts < samples[i].dts {
            samples[i].cts = samples[i].dts;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample(dts: i64, cts: i64, duration: u32) -> Sample<'static> {
        Sample {
            dts,
            cts,
            duration,
            size: 1,
            is_keyframe: false,
            data: &[],
        }
    }

    #[test]
    fn cross_file_offsetting_concatenates_timelines() {
        let file1 = vec![sample(0, 0, 1000), sample(1000, 1000, 1000)];
        let file2 = vec![sample(0, 0, 1000), sample(1000, 1000, 1000)];
        let options = FlattenOptions::default();

        let result = normalize(vec![file1, file2], &options);

        let dts: Vec<i64> = result.samples.iter().map(|s| s.dts).collect();
        assert_eq!(dts, vec![0, 1000, 2000, 3000]);
        assert!(!result.discontinuity_detected);
    }

    #[test]
    fn disabling_cross_file_normalization_keeps_local_timestamps() {
        let file1 = vec![sample(0, 0, 1000)];
        let file2 = vec![sample(0, 0, 1000)];
        let options = FlattenOptions {
            normalize_across_files: false,
            ..FlattenOptions::default()
        };

        let result = normalize(vec![file1, file2], &options);
        let dts: Vec<i64> = result.samples.iter().map(|s| s.dts).collect();
        // Monotonization still pushes the second file's sample forward
        // since nothing shifted it away from overlapping the first.
        assert_eq!(dts[0], 0);
        assert!(dts[1] >= dts[0]);
    }

    #[test]
    fn zero_duration_gap_larger_than_one_tick_flags_discontinuity() {
        let file = vec![sample(0, 0, 1000), sample(5000, 5000, 0), sample(5001, 5001, 1000)];
        let options = FlattenOptions::default();

        let result = normalize(vec![file], &options);
        assert!(result.discontinuity_detected);
    }

    #[test]
    fn monotonization_never_decreases_dts() {
        let file = vec![sample(1000, 1000, 500), sample(900, 900, 500)];
        let options = FlattenOptions::default();

        let result = normalize(vec![file], &options);
        assert!(result.samples[1].dts >= result.samples[0].dts);
        for s in &result.samples {
            assert!(s.cts >= s.dts);
        }
    }
}
