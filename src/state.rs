//! Mutable parser state threaded through the measure walk.
//!
//! MusicXML encodes time implicitly: cumulative note durations, explicit
//! <backup>/<forward> rewind/skip markers, and scattered tempo directives.
//! One `ParserState` per document carries the two position clocks (ticks
//! and seconds) plus the current divisions/tempo/transposition so that
//! every element is interpreted against the state in effect at its point
//! in the document.

use crate::model::TimeSignature;

/// Ticks per quarter note in the output resolution.
pub const STANDARD_PPQ: i64 = 220;

/// Snapshot of the previous note's timing, kept for chord grouping.
/// A chord member starts where the previous note started and reuses
/// its duration, so only these three values are needed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreviousNote {
    /// Tick duration of the previous note
    pub duration: i64,
    /// Start time in seconds
    pub time_position: f64,
    /// Start position in ticks
    pub xml_position: i64,
}

/// Internal state of one in-progress parse. Created once per document
/// and lent by `&mut` to every part- and measure-level parsing function.
#[derive(Debug, Clone)]
pub struct ParserState {
    /// Divisions per quarter note, per the <divisions> element.
    /// "If duration = 1 and divisions = 2, this is an eighth note."
    pub divisions: i64,
    /// Current tempo in quarter notes per minute. 120 qpm is the default
    /// tempo per the Standard MIDI Files 1.0 specification.
    pub qpm: f64,
    /// Duration of a single quarter note in seconds (60 / qpm)
    pub seconds_per_quarter: f64,
    /// Running time in seconds. Resets to 0 at every part boundary;
    /// moved by notes, <forward> and <backup>.
    pub time_position: f64,
    /// Running position in ticks, same rules as `time_position`
    pub xml_position: i64,
    /// Current MIDI velocity (default 64, mf)
    pub velocity: i32,
    /// Current transposition in +/- semitones
    pub transpose: i32,
    /// Current time signature. Does not support polymeter.
    pub time_signature: Option<TimeSignature>,
    /// Timing of the most recent note, for chord grouping
    pub previous_note: Option<PreviousNote>,
}

impl ParserState {
    pub fn new() -> Self {
        Self {
            divisions: 1,
            qpm: 120.0,
            seconds_per_quarter: 0.5,
            time_position: 0.0,
            xml_position: 0,
            velocity: 64,
            transpose: 0,
            time_signature: None,
            previous_note: None,
        }
    }

    /// Reset the position clocks at a part boundary. Divisions, tempo and
    /// time signature carry over between parts.
    pub fn reset_position(&mut self) {
        self.time_position = 0.0;
        self.xml_position = 0;
        self.previous_note = None;
    }

    /// Install a new tempo and refresh the derived seconds-per-quarter.
    pub fn set_qpm(&mut self, qpm: f64) {
        self.qpm = qpm;
        self.seconds_per_quarter = 60.0 / qpm;
    }

    /// Convert a tick duration to seconds at the current tempo and
    /// divisions setting.
    pub fn ticks_to_seconds(&self, duration: i64) -> f64 {
        let midi_ticks = duration as f64 * (STANDARD_PPQ as f64 / self.divisions as f64);
        (midi_ticks / STANDARD_PPQ as f64) * self.seconds_per_quarter
    }
}

impl Default for ParserState {
    fn default() -> Self {
        Self::new()
    }
}
