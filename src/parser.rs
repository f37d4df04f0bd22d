//! Stateful walk over parts and measures.
//!
//! A measure's children are interpreted strictly left to right: elements
//! that move the position clocks (<note>, <backup>, <forward>) must be
//! applied before later elements read the position. Tempo directives take
//! effect immediately for everything that follows them. After the walk,
//! a per-measure inference pass resolves partial or missing time
//! signatures from the measure's accumulated voice-1 duration.

use std::collections::HashMap;

use log::{debug, warn};
use num_rational::Ratio;
use roxmltree::Node;

use crate::error::ParseError;
use crate::model::*;
use crate::state::{ParserState, PreviousNote, STANDARD_PPQ};

/// Parse a <part> element, resetting the position clocks first.
/// The part name is resolved from the <part-list> directory.
pub(crate) fn parse_part(
    node: &Node,
    score_parts: &HashMap<String, ScorePart>,
    state: &mut ParserState,
) -> Result<Part, ParseError> {
    let id = node.attribute("id").unwrap_or("").to_string();
    let name = score_parts
        .get(&id)
        .map(|sp| sp.name.clone())
        .unwrap_or_default();

    state.reset_position();

    let mut measures = Vec::new();
    for child in node.children().filter(|n| n.is_element()) {
        if child.tag_name().name() == "measure" {
            measures.push(parse_measure(&child, state)?);
        }
    }

    Ok(Part { id, name, measures })
}

/// Parse one <measure> element in document order.
pub(crate) fn parse_measure(node: &Node, state: &mut ParserState) -> Result<Measure, ParseError> {
    let mut measure = Measure {
        number: node.attribute("number").unwrap_or("").to_string(),
        notes: Vec::new(),
        chord_symbols: Vec::new(),
        tempos: Vec::new(),
        time_signature: None,
        key_signature: None,
        barline: None,
        repeat: None,
        duration: 0,
        // Frozen before any child moves the clocks, so synthesized time
        // signatures can be stamped at the beginning of the measure.
        start_time_position: state.time_position,
        start_xml_position: state.xml_position,
    };

    // Directions seen since the last note; handed to the next note so
    // markings immediately preceding it are attached to it.
    let mut directions: Vec<Direction> = Vec::new();

    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "attributes" => parse_attributes(&child, &mut measure, state)?,
            "backup" => parse_backup(&child, state)?,
            "forward" => parse_forward(&child, state)?,
            "barline" => parse_barline(&child, &mut measure),
            "direction" => directions.push(parse_direction(&child, &mut measure, state)?),
            "harmony" => {
                measure
                    .chord_symbols
                    .push(ChordSymbol::from_element(&child, state));
            }
            "note" => {
                let note = build_note(&child, &directions, state)?;
                directions.clear();
                // Keep the note's timing around for chord grouping
                state.previous_note = Some(PreviousNote {
                    duration: note.duration.ticks,
                    time_position: note.duration.time_position,
                    xml_position: note.duration.xml_position,
                });
                // Sum up voice-1 durations for time-signature inference
                if note.voice == 1 && !note.chord {
                    measure.duration += note.duration.ticks;
                }
                measure.notes.push(note);
            }
            // Other tag types are ignored for forward compatibility
            _ => {}
        }
    }

    fix_time_signature(&mut measure, state);

    Ok(measure)
}

// ─── Attributes ──────────────────────────────────────────────────────

fn parse_attributes(
    node: &Node,
    measure: &mut Measure,
    state: &mut ParserState,
) -> Result<(), ParseError> {
    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "divisions" => {
                let divisions = child
                    .text()
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| ParseError::malformed("divisions", "empty element"))?
                    .parse::<i64>()
                    .map_err(|e| ParseError::malformed("divisions", format!("bad value: {e}")))?;
                if divisions <= 0 {
                    return Err(ParseError::malformed(
                        "divisions",
                        format!("must be positive, got {divisions}"),
                    ));
                }
                state.divisions = divisions;
            }
            "key" => {
                measure.key_signature = Some(KeySignature::from_element(&child, state)?);
            }
            "time" => {
                if measure.time_signature.is_some() {
                    return Err(ParseError::MultipleTimeSignature {
                        measure: measure.number.clone(),
                    });
                }
                // Senza misura decodes to None and leaves the measure
                // without a declared signature
                if let Some(ts) = TimeSignature::from_element(&child, state)? {
                    state.time_signature = Some(ts.clone());
                    measure.time_signature = Some(ts);
                }
            }
            "transpose" => {
                let shift = required_i64(&child, "chromatic", "transpose")? as i32;
                state.transpose = shift;
                if let Some(key_signature) = &mut measure.key_signature {
                    key_signature.key = transpose_key(key_signature.key, shift);
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Shift a circle-of-fifths key by a chromatic transposition. Every half
/// step up is 5 steps backward on the circle of fifths, which has 12
/// positions. Keys above 6 sharps wrap into the flat range.
fn transpose_key(key: i32, chromatic_shift: i32) -> i32 {
    let key_transpose = (chromatic_shift * -5).rem_euclid(12);
    let mut new_key = key + key_transpose;
    if new_key > 6 {
        new_key = new_key.rem_euclid(6);
        if new_key != 0 {
            new_key -= 6;
        }
    }
    new_key
}

// ─── Backup / forward ────────────────────────────────────────────────

/// <backup> rewinds both clocks; used to lay down a second voice over
/// time that has already elapsed.
fn parse_backup(node: &Node, state: &mut ParserState) -> Result<(), ParseError> {
    let duration = required_i64(node, "duration", "backup")?;
    let seconds = state.ticks_to_seconds(duration);
    state.time_position -= seconds;
    state.xml_position -= duration;
    Ok(())
}

/// <forward> skips silent time, e.g. padding in multi-voice measures.
fn parse_forward(node: &Node, state: &mut ParserState) -> Result<(), ParseError> {
    let duration = required_i64(node, "duration", "forward")?;
    let seconds = state.ticks_to_seconds(duration);
    state.time_position += seconds;
    state.xml_position += duration;
    Ok(())
}

// ─── Barline ─────────────────────────────────────────────────────────

fn parse_barline(node: &Node, measure: &mut Measure) {
    let style = child_element(node, "bar-style")
        .and_then(|n| n.text())
        .map(str::trim);
    match style {
        Some("light-light") => measure.barline = Some(BarlineKind::Double),
        Some("light-heavy") => measure.barline = Some(BarlineKind::Final),
        _ => {}
    }

    if let Some(repeat) = child_element(node, "repeat") {
        match repeat.attribute("direction") {
            Some("forward") => measure.repeat = Some(RepeatKind::Start),
            Some("backward") => measure.repeat = Some(RepeatKind::End),
            // Some exporters misspell the token; accept it as a repeat end
            Some("backword") => {
                warn!(
                    "measure {}: accepting misspelled repeat direction \"backword\"",
                    measure.number
                );
                measure.repeat = Some(RepeatKind::End);
            }
            _ => {}
        }
    }
}

// ─── Direction ───────────────────────────────────────────────────────

/// Parse a <direction> element. A <sound> child with a tempo attribute
/// records a Tempo at the current position and immediately updates the
/// state tempo so every subsequent element uses it; a dynamics attribute
/// alongside it updates the state velocity.
fn parse_direction(
    node: &Node,
    measure: &mut Measure,
    state: &mut ParserState,
) -> Result<Direction, ParseError> {
    let mut record = Direction {
        words: None,
        tempo: None,
        dynamics: None,
        time_position: state.time_position,
        xml_position: state.xml_position,
    };

    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "direction-type" => {
                for dt_child in child.children().filter(|n| n.is_element()) {
                    if dt_child.tag_name().name() == "words" {
                        record.words = dt_child.text().map(|t| t.trim().to_string());
                    }
                }
            }
            "sound" => {
                if child.attribute("tempo").is_some() {
                    let tempo = Tempo::from_element(&child, state)?;
                    debug!(
                        "tempo change to {} qpm at tick {}",
                        tempo.qpm, tempo.xml_position
                    );
                    record.tempo = Some(tempo.qpm);
                    state.set_qpm(tempo.qpm);
                    measure.tempos.push(tempo);

                    if let Some(dynamics) = child.attribute("dynamics") {
                        // A velocity, so it must be a whole number
                        let dynamics = dynamics.trim().parse::<i32>().map_err(|e| {
                            ParseError::malformed("sound", format!("bad dynamics attribute: {e}"))
                        })?;
                        record.dynamics = Some(dynamics);
                        state.velocity = dynamics;
                    }
                }
            }
            _ => {}
        }
    }

    Ok(record)
}

// ─── Note ────────────────────────────────────────────────────────────

/// Decode a <note> element against the current state, advancing the
/// position clocks. Chord member notes reuse the previous note's start
/// and duration and leave the clocks untouched; grace notes carry no
/// duration of their own.
pub(crate) fn build_note(
    node: &Node,
    pending_directions: &[Direction],
    state: &mut ParserState,
) -> Result<Note, ParseError> {
    let mut pitch = None;
    let mut rest = false;
    let mut chord = false;
    let mut grace = false;
    let mut voice = 1;
    let mut ticks: i64 = 0;

    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "pitch" => pitch = Some(parse_pitch(&child)?),
            "duration" => {
                ticks = child
                    .text()
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| ParseError::malformed("note", "empty <duration>"))?
                    .parse::<i64>()
                    .map_err(|e| ParseError::malformed("note", format!("bad <duration>: {e}")))?;
            }
            "voice" => {
                voice = child
                    .text()
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| ParseError::malformed("note", "empty <voice>"))?
                    .parse::<i32>()
                    .map_err(|e| ParseError::malformed("note", format!("bad <voice>: {e}")))?;
            }
            "rest" => rest = true,
            "chord" => chord = true,
            "grace" => grace = true,
            _ => {}
        }
    }

    if ticks == 0 && !grace && child_element(node, "duration").is_none() {
        return Err(ParseError::malformed("note", "missing <duration>"));
    }

    // A chord member shares the previous note's duration and start
    if chord {
        if let Some(previous) = state.previous_note {
            ticks = previous.duration;
        }
    }

    let midi_ticks = to_midi_ticks(ticks, state.divisions);
    let seconds = (midi_ticks / STANDARD_PPQ as f64) * state.seconds_per_quarter;

    let (time_position, xml_position) = match (chord, state.previous_note) {
        (true, Some(previous)) => (previous.time_position, previous.xml_position),
        _ => (state.time_position, state.xml_position),
    };

    if !chord {
        state.time_position += seconds;
        state.xml_position += ticks;
    }

    let midi_pitch = pitch.as_ref().map(|p: &Pitch| p.midi() + state.transpose);

    Ok(Note {
        pitch,
        midi_pitch,
        duration: NoteDuration {
            ticks,
            midi_ticks,
            seconds,
            time_position,
            xml_position,
        },
        voice,
        velocity: state.velocity,
        rest,
        chord,
        grace,
        directions: pending_directions.to_vec(),
    })
}

fn parse_pitch(node: &Node) -> Result<Pitch, ParseError> {
    let step = child_element(node, "step")
        .and_then(|n| n.text())
        .map(|t| t.trim().to_string())
        .ok_or_else(|| ParseError::malformed("pitch", "missing <step>"))?;
    if !matches!(step.as_str(), "A" | "B" | "C" | "D" | "E" | "F" | "G") {
        return Err(ParseError::malformed(
            "pitch",
            format!("unknown <step> \"{step}\""),
        ));
    }
    let octave = required_i64(node, "octave", "pitch")? as i32;
    let alter = child_element(node, "alter")
        .and_then(|n| n.text())
        .and_then(|t| t.trim().parse::<f64>().ok())
        .unwrap_or(0.0) as i32;
    Ok(Pitch {
        step,
        alter,
        octave,
    })
}

// ─── Time-signature inference ────────────────────────────────────────

/// Resolve the time signature of a just-parsed measure from its
/// accumulated voice-1 duration.
///
/// The measure's effective length as a fraction of a whole note is
/// `duration / (divisions * 4)`. Three situations are handled:
///
/// - no signature anywhere yet (senza misura): adopt the effective
///   length as the signature;
/// - a measure shorter than the prevailing numerator (a pickup): give it
///   a measure-local signature and make that the new prevailing one;
/// - a measure without a declared signature whose effective length
///   disagrees with the prevailing fraction: same treatment.
///
/// A whole measure (effective length exactly 1) that is not a pickup is
/// normalized to numerator = denominator = the prevailing denominator.
/// Otherwise the raw numerator/denominator pair is used unless it
/// reduces exactly to the effective fraction, in which case the reduced
/// pair is kept. Measures with zero voice-1 duration carry no meter
/// evidence and never drive inference.
fn fix_time_signature(measure: &mut Measure, state: &mut ParserState) {
    if measure.duration == 0 {
        return;
    }

    // Divisions are parts per quarter note, so scale by 4 to express the
    // measure length relative to a whole note
    let numerator = measure.duration;
    let denominator = state.divisions * 4;
    let fractional_time_signature = Ratio::new(numerator, denominator);

    let global = match &state.time_signature {
        Some(ts) => ts.clone(),
        None => {
            if measure.time_signature.is_none() {
                // No prevailing signature and none declared here: the
                // effective length is the signature. A whole measure is
                // normalized against the raw denominator.
                let (num, den) = synthesize_pair(
                    numerator,
                    denominator,
                    fractional_time_signature,
                    denominator,
                    false,
                );
                let ts = TimeSignature {
                    numerator: num,
                    denominator: den,
                    time_position: measure.start_time_position,
                    xml_position: measure.start_xml_position,
                };
                measure.time_signature = Some(ts.clone());
                state.time_signature = Some(ts);
            }
            return;
        }
    };

    let fractional_state_time_signature = Ratio::new(global.numerator, global.denominator);

    // A measure shorter than the prevailing numerator is a pickup
    let pickup_measure = numerator < global.numerator;

    let (num, den) = synthesize_pair(
        numerator,
        denominator,
        fractional_time_signature,
        global.denominator,
        pickup_measure,
    );

    // Install the synthesized signature only for pickups, or when the
    // measure declared nothing and its effective length disagrees with
    // the prevailing signature
    if pickup_measure
        || (measure.time_signature.is_none()
            && fractional_time_signature != fractional_state_time_signature)
    {
        let ts = TimeSignature {
            numerator: num,
            denominator: den,
            time_position: measure.start_time_position,
            xml_position: measure.start_xml_position,
        };
        measure.time_signature = Some(ts.clone());
        state.time_signature = Some(ts);
    }
}

/// Choose the numerator/denominator pair for a synthesized signature.
fn synthesize_pair(
    numerator: i64,
    denominator: i64,
    fractional: Ratio<i64>,
    global_denominator: i64,
    pickup_measure: bool,
) -> (i64, i64) {
    if fractional == Ratio::from_integer(1) && !pickup_measure {
        // A whole measure, e.g. an effective 4/4 written with
        // nonstandard divisions: normalize to the prevailing denominator
        (global_denominator, global_denominator)
    } else {
        // Use the raw pair unless it reduces exactly to the effective
        // fraction, in which case prefer the reduced form
        let mut num = numerator;
        let mut den = denominator;
        if Ratio::new(num, den) == fractional {
            num = *fractional.numer();
            den = *fractional.denom();
        }
        (num, den)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn measure_state() -> ParserState {
        ParserState::new()
    }

    fn parse_one_measure(xml: &str, state: &mut ParserState) -> Measure {
        let doc = roxmltree::Document::parse(xml).unwrap();
        parse_measure(&doc.root_element(), state).unwrap()
    }

    #[test]
    fn backup_then_forward_is_a_round_trip() {
        let xml = r#"<measure number="1">
            <backup><duration>3</duration></backup>
            <forward><duration>3</duration></forward>
        </measure>"#;
        let mut state = measure_state();
        state.divisions = 2;
        state.time_position = 10.0;
        state.xml_position = 40;

        parse_one_measure(xml, &mut state);

        assert_eq!(state.xml_position, 40);
        assert!((state.time_position - 10.0).abs() < 1e-12);
    }

    #[test]
    fn transpose_whole_step_up_from_c_major_is_d_major() {
        assert_eq!(transpose_key(0, 2), 2);
    }

    #[test]
    fn transpose_wraps_past_six_sharps_into_flats() {
        // Up a half step from C major: 7 sharps becomes 5 flats
        assert_eq!(transpose_key(0, 1), -5);
    }

    #[test]
    fn whole_measure_normalizes_to_global_denominator() {
        assert_eq!(synthesize_pair(8, 8, Ratio::new(8, 8), 4, false), (4, 4));
    }

    #[test]
    fn partial_measure_keeps_reduced_fraction() {
        assert_eq!(synthesize_pair(3, 8, Ratio::new(3, 8), 4, false), (3, 8));
        assert_eq!(synthesize_pair(2, 8, Ratio::new(2, 8), 4, true), (1, 4));
    }
}
