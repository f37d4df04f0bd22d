//! Post-pass timeline recalculation.
//!
//! During the measure walk, a note's time position reflects only the
//! tempo changes seen up to that point in its own part. Once every
//! tempo-change event in the score is known, this pass rewrites each
//! note's real-time position from its tick position using
//! piecewise-constant tempo segments.

use crate::model::{Part, Tempo};

/// Rewrite tempo segment start times, then every note's time position.
///
/// Tempos are sorted by tick position and their start times accumulated
/// segment by segment. Each note is then placed inside the segment
/// covering its tick position (the last segment when the note lies past
/// the final tempo change). The segment scan is linear per note; tempo
/// change counts are small in practice.
pub fn recalculate_time_positions(tempos: &mut [Tempo], parts: &mut [Part]) {
    if tempos.is_empty() {
        return;
    }

    tempos.sort_by_key(|t| t.xml_position);

    let mut new_time_position = 0.0;
    for i in 0..tempos.len() {
        tempos[i].time_position = new_time_position;
        if i + 1 < tempos.len() {
            new_time_position += (tempos[i + 1].xml_position - tempos[i].xml_position) as f64
                / tempos[i].qpm
                * 60.0
                / tempos[i].divisions as f64;
        }
    }

    for part in parts.iter_mut() {
        for measure in part.measures.iter_mut() {
            for note in measure.notes.iter_mut() {
                let position = note.duration.xml_position;
                let i = segment_index(tempos, position);
                let current_tempo = tempos[i].qpm * 60.0 / tempos[i].divisions as f64;
                note.duration.time_position = tempos[i].time_position
                    + (position - tempos[i].xml_position) as f64 / current_tempo;
            }
        }
    }
}

/// Index of the tempo segment covering `position`: the segment whose
/// start is at or before it and whose successor starts after it, or the
/// last segment when the position lies beyond the final tempo change.
fn segment_index(tempos: &[Tempo], position: i64) -> usize {
    for i in 0..tempos.len() - 1 {
        if tempos[i].xml_position <= position && tempos[i + 1].xml_position > position {
            return i;
        }
    }
    tempos.len() - 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tempo(qpm: f64, xml_position: i64, divisions: i64) -> Tempo {
        Tempo {
            qpm,
            time_position: 0.0,
            xml_position,
            divisions,
        }
    }

    #[test]
    fn segment_lookup_picks_covering_tempo() {
        let tempos = vec![tempo(120.0, 0, 1), tempo(60.0, 8, 1)];
        assert_eq!(segment_index(&tempos, 0), 0);
        assert_eq!(segment_index(&tempos, 7), 0);
        assert_eq!(segment_index(&tempos, 8), 1);
        assert_eq!(segment_index(&tempos, 100), 1);
    }

    #[test]
    fn segment_start_times_accumulate() {
        let mut tempos = vec![tempo(120.0, 0, 1), tempo(60.0, 8, 1)];
        recalculate_time_positions(&mut tempos, &mut []);
        assert_eq!(tempos[0].time_position, 0.0);
        // 8 ticks at 120 qpm with 1 division per quarter: 8 / 120 * 60
        assert!((tempos[1].time_position - 4.0).abs() < 1e-12);
    }
}
