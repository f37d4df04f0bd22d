//! mxseq — MusicXML timeline reconstruction for music generation pipelines.
//!
//! Loads a MusicXML score (uncompressed .musicxml/.xml or compressed
//! .mxl) and reconstructs a single consistent timeline from the
//! document's scattered timing signals: cumulative note durations,
//! <backup>/<forward> clock adjustments, and <sound tempo> directives.
//! Every note, tempo, time signature, key signature and chord symbol
//! comes out annotated with both a tick position and a real-time
//! position in seconds.
//!
//! # Example
//! ```no_run
//! use mxseq::parse_file;
//!
//! let mut document = parse_file("path/to/score.musicxml").unwrap();
//! document.recalculate_time_position();
//! println!("Parts: {}", document.parts.len());
//! println!("Length: {:.2}s", document.total_time_secs);
//! for tempo in document.get_tempos() {
//!     println!("{} qpm at tick {}", tempo.qpm, tempo.xml_position);
//! }
//! ```

pub mod document;
pub mod error;
pub mod model;
pub mod mxl;
mod parser;
pub mod state;
pub mod timeline;

use std::path::Path;

pub use document::Document;
pub use error::ParseError;
pub use model::*;
pub use mxl::{extract_musicxml_from_mxl, parse_mxl};
pub use state::{ParserState, STANDARD_PPQ};

/// Parse a MusicXML file from a file path.
/// Automatically detects format based on file extension:
/// - `.musicxml` or `.xml` → uncompressed MusicXML
/// - `.mxl` → compressed MXL (ZIP archive)
pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Document, ParseError> {
    let path = path.as_ref();
    let data = std::fs::read(path)
        .map_err(|e| ParseError::Load(format!("failed to read '{}': {e}", path.display())))?;

    parse_bytes(&data, path.extension().and_then(|e| e.to_str()))
}

/// Parse MusicXML from raw bytes with an optional format hint.
/// If `extension` is None, tries to auto-detect the format.
pub fn parse_bytes(data: &[u8], extension: Option<&str>) -> Result<Document, ParseError> {
    match extension {
        Some("mxl") => parse_mxl(data),
        Some("musicxml") | Some("xml") => {
            let xml = std::str::from_utf8(data)
                .map_err(|e| ParseError::Load(format!("invalid UTF-8 in MusicXML file: {e}")))?;
            parse_musicxml(xml)
        }
        _ => {
            // Auto-detect: try as XML first, then as MXL
            if let Ok(xml) = std::str::from_utf8(data) {
                if xml.trim_start().starts_with("<?xml") || xml.trim_start().starts_with('<') {
                    return parse_musicxml(xml);
                }
            }
            parse_mxl(data)
        }
    }
}

/// Parse a MusicXML XML string into a Document.
pub fn parse_musicxml(xml: &str) -> Result<Document, ParseError> {
    // MusicXML files include a DOCTYPE declaration, so we must allow DTDs
    let options = roxmltree::ParsingOptions {
        allow_dtd: true,
        ..Default::default()
    };
    let doc = roxmltree::Document::parse_with_options(xml, options)
        .map_err(|e| ParseError::Load(format!("XML parse error: {e}")))?;

    Document::from_root(&doc.root_element())
}

/// Convert a parsed document to a JSON string.
pub fn document_to_json(document: &Document) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(document)
}
