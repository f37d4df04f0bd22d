//! Document assembly: walks the score's parts, aggregates the
//! cross-part collections, and tracks the running time totals.

use std::collections::{HashMap, HashSet};

use roxmltree::Node;
use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::model::{
    child_element, ChordSymbol, KeySignature, Part, ScorePart, Tempo, TimeSignature,
};
use crate::parser::parse_part;
use crate::state::{ParserState, STANDARD_PPQ};
use crate::timeline;

/// A fully parsed, time-annotated score.
///
/// Holds the ordered parts plus the score-part directory, and exposes
/// the aggregated collections with de-duplication. The parser state is
/// retained after parsing so that defaults synthesized for empty
/// collections reflect the score's final settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub parts: Vec<Part>,
    score_parts: HashMap<String, ScorePart>,
    /// Ticks per quarter note of the output timeline
    pub midi_resolution: i64,
    /// Maximum final time position across all parts, in seconds
    pub total_time_secs: f64,
    /// Maximum final tick position across all parts
    pub total_time_duration: i64,
    #[serde(skip)]
    state: ParserState,
}

impl Document {
    /// Parse a score-partwise root element into a Document.
    pub fn from_root(root: &Node) -> Result<Self, ParseError> {
        if root.tag_name().name() != "score-partwise" {
            return Err(ParseError::Load(format!(
                "unsupported root element <{}>, only <score-partwise> is supported",
                root.tag_name().name()
            )));
        }

        let mut state = ParserState::new();

        // The <part-list> directory maps part ids to names and MIDI setup
        let mut score_parts = HashMap::new();
        if let Some(part_list) = child_element(root, "part-list") {
            for child in part_list.children().filter(|n| n.is_element()) {
                if child.tag_name().name() == "score-part" {
                    let score_part = ScorePart::from_element(&child);
                    score_parts.insert(score_part.id.clone(), score_part);
                }
            }
        }

        let mut parts = Vec::new();
        let mut total_time_secs: f64 = 0.0;
        let mut total_time_duration: i64 = 0;

        for child in root.children().filter(|n| n.is_element()) {
            if child.tag_name().name() == "part" {
                parts.push(parse_part(&child, &score_parts, &mut state)?);
                if state.time_position > total_time_secs {
                    total_time_secs = state.time_position;
                }
                if state.xml_position > total_time_duration {
                    total_time_duration = state.xml_position;
                }
            }
        }

        Ok(Self {
            parts,
            score_parts,
            midi_resolution: STANDARD_PPQ,
            total_time_secs,
            total_time_duration,
            state,
        })
    }

    /// Look up a part's directory entry by id.
    pub fn score_part(&self, id: &str) -> Option<&ScorePart> {
        self.score_parts.get(id)
    }

    /// All chord symbols in the score, de-duplicated by value in
    /// first-seen order.
    pub fn get_chord_symbols(&self) -> Vec<ChordSymbol> {
        let mut chord_symbols: Vec<ChordSymbol> = Vec::new();
        for part in &self.parts {
            for measure in &part.measures {
                for chord_symbol in &measure.chord_symbols {
                    if !chord_symbols.contains(chord_symbol) {
                        chord_symbols.push(chord_symbol.clone());
                    }
                }
            }
        }
        chord_symbols
    }

    /// All time signatures in the score, de-duplicated on the
    /// numerator/denominator pair in first-seen order. Assumes all parts
    /// share one meter; polymeter is unsupported.
    pub fn get_time_signatures(&self) -> Vec<TimeSignature> {
        let mut seen: HashSet<(i64, i64)> = HashSet::new();
        let mut time_signatures = Vec::new();
        for part in &self.parts {
            for measure in &part.measures {
                if let Some(ts) = &measure.time_signature {
                    if seen.insert((ts.numerator, ts.denominator)) {
                        time_signatures.push(ts.clone());
                    }
                }
            }
        }
        time_signatures
    }

    /// All key signatures in the score, de-duplicated by value in
    /// first-seen order. Different parts may carry different keys
    /// (scores in written pitch). Synthesizes C major at position 0
    /// when the score has none.
    pub fn get_key_signatures(&self) -> Vec<KeySignature> {
        let mut key_signatures: Vec<KeySignature> = Vec::new();
        for part in &self.parts {
            for measure in &part.measures {
                if let Some(key_signature) = &measure.key_signature {
                    if !key_signatures.contains(key_signature) {
                        key_signatures.push(key_signature.clone());
                    }
                }
            }
        }

        if key_signatures.is_empty() {
            key_signatures.push(KeySignature {
                key: 0,
                mode: None,
                time_position: 0.0,
                xml_position: 0,
            });
        }

        key_signatures
    }

    /// All tempos, scanned from the first part only; the first part is
    /// the authoritative tempo track. Synthesizes the default tempo at
    /// position 0 when the score has none.
    pub fn get_tempos(&self) -> Vec<Tempo> {
        let mut tempos = Vec::new();

        if let Some(part) = self.parts.first() {
            for measure in &part.measures {
                tempos.extend(measure.tempos.iter().cloned());
            }
        }

        if tempos.is_empty() {
            tempos.push(Tempo {
                qpm: self.state.qpm,
                time_position: 0.0,
                xml_position: 0,
                divisions: self.state.divisions,
            });
        }

        tempos
    }

    /// Rewrite every note's real-time position from its tick position
    /// using the aggregated tempo list, and persist the recomputed
    /// segment start times into the measures that own the tempo events
    /// so `get_tempos` stays consistent with the rewritten notes.
    /// Idempotent: tick positions are the only input.
    pub fn recalculate_time_position(&mut self) {
        let mut tempos = self.get_tempos();
        timeline::recalculate_time_positions(&mut tempos, &mut self.parts);

        if let Some(part) = self.parts.first_mut() {
            for measure in part.measures.iter_mut() {
                for tempo in measure.tempos.iter_mut() {
                    if let Some(updated) = tempos
                        .iter()
                        .find(|t| t.xml_position == tempo.xml_position && t.qpm == tempo.qpm)
                    {
                        tempo.time_position = updated.time_position;
                    }
                }
            }
        }
    }
}
