//! Data model for the time-annotated score.
//!
//! Every timed entity carries two positions: `time_position` in real
//! seconds and `xml_position` in ticks since the start of its part.
//! Leaf entities are decoded from their elements against the parser
//! state in effect at their point in the document.

use roxmltree::Node;
use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::state::{ParserState, STANDARD_PPQ};

/// A time signature and the point at which it takes effect.
///
/// May come from an explicit <time> element or be synthesized by the
/// inference pass for pickup and senza-misura measures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSignature {
    /// Beats per measure (e.g. 3 in 3/4)
    pub numerator: i64,
    /// Beat unit (e.g. 4 in 3/4)
    pub denominator: i64,
    /// Start time in seconds
    pub time_position: f64,
    /// Start position in ticks
    pub xml_position: i64,
}

impl TimeSignature {
    /// Decode a <time> element. Returns `None` for senza-misura markings;
    /// fails if <beats> or <beat-type> is missing or non-numeric.
    pub fn from_element(node: &Node, state: &ParserState) -> Result<Option<Self>, ParseError> {
        if child_element(node, "senza-misura").is_some() {
            return Ok(None);
        }
        let numerator = required_i64(node, "beats", "time")?;
        let denominator = required_i64(node, "beat-type", "time")?;
        Ok(Some(Self {
            numerator,
            denominator,
            time_position: state.time_position,
            xml_position: state.xml_position,
        }))
    }
}

/// A tempo-change event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tempo {
    /// Quarter notes per minute
    pub qpm: f64,
    /// Start time in seconds
    pub time_position: f64,
    /// Start position in ticks
    pub xml_position: i64,
    /// Divisions per quarter note in effect when this tempo appeared.
    /// Captured here so the timeline recalculation can convert this
    /// segment's ticks without consulting parser state.
    pub divisions: i64,
}

impl Tempo {
    /// Decode a <sound tempo="..."> element at the current state position.
    pub fn from_element(node: &Node, state: &ParserState) -> Result<Self, ParseError> {
        let qpm = node
            .attribute("tempo")
            .ok_or_else(|| ParseError::malformed("sound", "missing tempo attribute"))?
            .trim()
            .parse::<f64>()
            .map_err(|e| ParseError::malformed("sound", format!("bad tempo attribute: {e}")))?;
        if qpm <= 0.0 {
            return Err(ParseError::malformed(
                "sound",
                format!("tempo must be positive, got {qpm}"),
            ));
        }
        Ok(Self {
            qpm,
            time_position: state.time_position,
            xml_position: state.xml_position,
            divisions: state.divisions,
        })
    }
}

/// A key signature in circle-of-fifths units: positive = sharps,
/// negative = flats, 0 = C major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeySignature {
    pub key: i32,
    /// Mode text ("major", "minor") when present
    pub mode: Option<String>,
    pub time_position: f64,
    pub xml_position: i64,
}

impl KeySignature {
    /// Decode a <key> element; fails if <fifths> is missing or non-numeric.
    pub fn from_element(node: &Node, state: &ParserState) -> Result<Self, ParseError> {
        let key = required_i64(node, "fifths", "key")? as i32;
        let mode = child_element(node, "mode")
            .and_then(|n| n.text())
            .map(|t| t.trim().to_string());
        Ok(Self {
            key,
            mode,
            time_position: state.time_position,
            xml_position: state.xml_position,
        })
    }
}

/// A chord symbol (harmony annotation) at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChordSymbol {
    /// Root note name including alteration, e.g. "C", "F#", "Bb"
    pub root: String,
    /// Chord quality: "major", "minor", "dominant", ...
    pub kind: String,
    /// Bass note for slash chords
    pub bass: Option<String>,
    pub time_position: f64,
    pub xml_position: i64,
}

impl ChordSymbol {
    /// Decode a <harmony> element at the current state position.
    pub fn from_element(node: &Node, state: &ParserState) -> Self {
        let mut root = String::from("C");
        let mut kind = String::from("major");
        let mut bass = None;

        for child in node.children().filter(|n| n.is_element()) {
            match child.tag_name().name() {
                "root" => root = harmony_step(&child, "root-step", "root-alter"),
                "kind" => {
                    if let Some(t) = child.text() {
                        kind = t.trim().to_string();
                    }
                }
                "bass" => bass = Some(harmony_step(&child, "bass-step", "bass-alter")),
                _ => {}
            }
        }

        Self {
            root,
            kind,
            bass,
            time_position: state.time_position,
            xml_position: state.xml_position,
        }
    }
}

/// Combine a step child and an alter child into a root/bass name.
fn harmony_step(node: &Node, step_tag: &str, alter_tag: &str) -> String {
    let step = child_element(node, step_tag)
        .and_then(|n| n.text())
        .map(|t| t.trim().to_string())
        .unwrap_or_else(|| "C".to_string());
    let alter = child_element(node, alter_tag)
        .and_then(|n| n.text())
        .and_then(|t| t.trim().parse::<f64>().ok())
        .unwrap_or(0.0) as i32;
    let suffix = match alter {
        a if a > 0 => "#".repeat(a as usize),
        a if a < 0 => "b".repeat(-a as usize),
        _ => String::new(),
    };
    format!("{step}{suffix}")
}

/// A <direction> element queued ahead of a note: words text and any
/// sound tempo/dynamics it carried, stamped with the state position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Direction {
    pub words: Option<String>,
    pub tempo: Option<f64>,
    pub dynamics: Option<i32>,
    pub time_position: f64,
    pub xml_position: i64,
}

/// Pitch of a note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pitch {
    /// Note name: A-G
    pub step: String,
    /// Chromatic alteration: -1 = flat, 1 = sharp
    pub alter: i32,
    /// Octave number (middle C = C4)
    pub octave: i32,
}

impl Pitch {
    /// MIDI note number before transposition. Middle C (C4) = 60.
    pub fn midi(&self) -> i32 {
        let step_semitone = match self.step.as_str() {
            "C" => 0,
            "D" => 2,
            "E" => 4,
            "F" => 5,
            "G" => 7,
            "A" => 9,
            "B" => 11,
            _ => 0,
        };
        (self.octave + 1) * 12 + step_semitone + self.alter
    }
}

/// Timing of one note on both clocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteDuration {
    /// Duration in ticks (MusicXML divisions units)
    pub ticks: i64,
    /// Duration scaled to the standard output resolution
    pub midi_ticks: f64,
    /// Duration in seconds at the tempo in effect
    pub seconds: f64,
    /// Start time in seconds
    pub time_position: f64,
    /// Start position in ticks
    pub xml_position: i64,
}

/// A single note or rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    /// Pitch, absent for rests
    pub pitch: Option<Pitch>,
    /// Transposed MIDI note number, absent for rests
    pub midi_pitch: Option<i32>,
    pub duration: NoteDuration,
    /// Voice number, default 1
    pub voice: i32,
    /// MIDI velocity captured from state
    pub velocity: i32,
    pub rest: bool,
    /// Part of a chord with the previous note
    pub chord: bool,
    pub grace: bool,
    /// Directions that immediately preceded this note
    pub directions: Vec<Direction>,
}

/// Barline style of a measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BarlineKind {
    /// light-light
    Double,
    /// light-heavy
    Final,
}

/// Repeat marker on a barline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepeatKind {
    Start,
    End,
}

/// One measure of one part.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Measure {
    /// Measure number attribute, kept verbatim for diagnostics
    pub number: String,
    pub notes: Vec<Note>,
    pub chord_symbols: Vec<ChordSymbol>,
    pub tempos: Vec<Tempo>,
    /// Resolved time signature, possibly synthesized by inference
    pub time_signature: Option<TimeSignature>,
    pub key_signature: Option<KeySignature>,
    pub barline: Option<BarlineKind>,
    pub repeat: Option<RepeatKind>,
    /// Cumulative voice-1 duration in ticks, input to time-signature
    /// inference
    pub duration: i64,
    /// Position of the measure start, frozen before any child element
    /// mutates the parser state
    pub start_time_position: f64,
    pub start_xml_position: i64,
}

/// A part entry from the <part-list> directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorePart {
    /// Part identifier (e.g. "P1")
    pub id: String,
    pub name: String,
    pub midi_channel: Option<i32>,
    pub midi_program: Option<i32>,
}

impl ScorePart {
    /// Decode a <score-part> element.
    pub fn from_element(node: &Node) -> Self {
        let id = node.attribute("id").unwrap_or("").to_string();
        let mut part = Self {
            id,
            name: String::new(),
            midi_channel: None,
            midi_program: None,
        };

        for child in node.children().filter(|n| n.is_element()) {
            match child.tag_name().name() {
                "part-name" => {
                    part.name = child.text().unwrap_or("").trim().to_string();
                }
                "midi-instrument" => {
                    for midi in child.children().filter(|n| n.is_element()) {
                        match midi.tag_name().name() {
                            "midi-channel" => part.midi_channel = element_i32(&midi),
                            "midi-program" => part.midi_program = element_i32(&midi),
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
        }

        part
    }
}

/// An ordered sequence of measures belonging to one instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Part {
    pub id: String,
    pub name: String,
    pub measures: Vec<Measure>,
}

// ─── Element helpers ─────────────────────────────────────────────────

pub(crate) fn child_element<'a, 'i>(node: &Node<'a, 'i>, tag: &str) -> Option<Node<'a, 'i>> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == tag)
}

pub(crate) fn element_i32(node: &Node) -> Option<i32> {
    node.text()?.trim().parse().ok()
}

/// Read a required numeric child, failing with a malformed-element error
/// when it is missing or not an integer.
pub(crate) fn required_i64(
    node: &Node,
    tag: &str,
    element: &'static str,
) -> Result<i64, ParseError> {
    let child = child_element(node, tag)
        .ok_or_else(|| ParseError::malformed(element, format!("missing <{tag}>")))?;
    child
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ParseError::malformed(element, format!("empty <{tag}>")))?
        .parse::<i64>()
        .map_err(|e| ParseError::malformed(element, format!("bad <{tag}>: {e}")))
}

/// Scale a tick duration to the standard output resolution.
pub(crate) fn to_midi_ticks(duration: i64, divisions: i64) -> f64 {
    duration as f64 * (STANDARD_PPQ as f64 / divisions as f64)
}
