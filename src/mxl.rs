//! MXL file handler for compressed MusicXML (.mxl) archives.
//!
//! An .mxl file is a ZIP archive containing:
//!   - META-INF/container.xml, which declares the root MusicXML file path
//!   - the actual MusicXML content (e.g. score.xml)
//!   - optionally other files (images, sounds, ...)
//!
//! An archive declaring more than one MusicXML rootfile is ambiguous and
//! rejected, as is a manifest pointing at a file the archive lacks.

use std::io::{Cursor, Read};

use zip::ZipArchive;

use crate::document::Document;
use crate::error::ParseError;
use crate::parse_musicxml;

const MUSICXML_MIME_TYPE: &str = "application/vnd.recordare.musicxml+xml";

/// Read and parse a .mxl file from raw bytes.
pub fn parse_mxl(data: &[u8]) -> Result<Document, ParseError> {
    let xml = extract_musicxml_from_mxl(data)?;
    parse_musicxml(&xml)
}

/// Extract the MusicXML content string from .mxl bytes.
pub fn extract_musicxml_from_mxl(data: &[u8]) -> Result<String, ParseError> {
    let cursor = Cursor::new(data);
    let mut archive = ZipArchive::new(cursor)
        .map_err(|e| ParseError::Load(format!("failed to open MXL archive: {e}")))?;

    let root_file_path = read_container_xml(&mut archive)?;

    let mut root_file = archive.by_name(&root_file_path).map_err(|e| {
        ParseError::Load(format!(
            "score file '{root_file_path}' not found in archive: {e}"
        ))
    })?;

    let mut xml = String::new();
    root_file
        .read_to_string(&mut xml)
        .map_err(|e| ParseError::Load(format!("failed to read '{root_file_path}': {e}")))?;

    Ok(xml)
}

/// Parse META-INF/container.xml to find the root MusicXML file path.
/// A rootfile with the MusicXML media type wins; one without a
/// media-type attribute is assumed to be MusicXML. More than one
/// candidate in either form is an error.
fn read_container_xml(archive: &mut ZipArchive<Cursor<&[u8]>>) -> Result<String, ParseError> {
    let container_xml = {
        let mut container_file = archive
            .by_name("META-INF/container.xml")
            .map_err(|e| ParseError::Load(format!("missing META-INF/container.xml: {e}")))?;
        let mut xml = String::new();
        container_file
            .read_to_string(&mut xml)
            .map_err(|e| ParseError::Load(format!("failed to read container.xml: {e}")))?;
        xml
    }; // mutable borrow of archive is released here

    let doc = roxmltree::Document::parse(&container_xml)
        .map_err(|e| ParseError::Load(format!("failed to parse container.xml: {e}")))?;

    let mut root_file_path: Option<String> = None;
    for node in doc.descendants() {
        if node.tag_name().name() != "rootfile" {
            continue;
        }
        match node.attribute("media-type") {
            Some(media_type) if media_type != MUSICXML_MIME_TYPE => continue,
            _ => {}
        }
        let Some(path) = node.attribute("full-path") else {
            continue;
        };
        if root_file_path.is_some() {
            return Err(ParseError::Load(
                "multiple MusicXML files found in compressed archive".to_string(),
            ));
        }
        root_file_path = Some(path.to_string());
    }

    root_file_path.ok_or_else(|| {
        ParseError::Load("unable to locate main .xml file in compressed archive".to_string())
    })
}
