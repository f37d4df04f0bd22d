//! MXL archive tests using in-memory ZIP files.

use std::io::Write as _;

use mxseq::{parse_bytes, parse_mxl, ParseError};
use zip::write::SimpleFileOptions;

const SCORE_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<score-partwise version="3.1">
  <part-list>
    <score-part id="P1"><part-name>Piano</part-name></score-part>
  </part-list>
  <part id="P1">
    <measure number="1">
      <attributes><divisions>1</divisions></attributes>
      <note><pitch><step>C</step><octave>4</octave></pitch>
        <duration>4</duration><voice>1</voice></note>
    </measure>
  </part>
</score-partwise>"#;

fn container(rootfiles: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<container><rootfiles>{rootfiles}</rootfiles></container>"#
    )
}

fn build_mxl(files: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for (name, content) in files {
        writer.start_file(*name, options).unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

#[test]
fn parses_a_well_formed_archive() {
    let data = build_mxl(&[
        (
            "META-INF/container.xml",
            &container(r#"<rootfile full-path="score.xml"/>"#),
        ),
        ("score.xml", SCORE_XML),
    ]);

    let document = parse_mxl(&data).unwrap();
    assert_eq!(document.parts.len(), 1);
    assert_eq!(document.total_time_duration, 4);
}

#[test]
fn auto_detection_recognizes_zip_bytes() {
    let data = build_mxl(&[
        (
            "META-INF/container.xml",
            &container(r#"<rootfile full-path="score.xml"/>"#),
        ),
        ("score.xml", SCORE_XML),
    ]);

    let document = parse_bytes(&data, None).unwrap();
    assert_eq!(document.parts.len(), 1);

    let document = parse_bytes(SCORE_XML.as_bytes(), None).unwrap();
    assert_eq!(document.parts.len(), 1);
}

#[test]
fn multiple_rootfiles_are_ambiguous() {
    let data = build_mxl(&[
        (
            "META-INF/container.xml",
            &container(
                r#"<rootfile full-path="a.xml"/><rootfile full-path="b.xml"/>"#,
            ),
        ),
        ("a.xml", SCORE_XML),
        ("b.xml", SCORE_XML),
    ]);

    assert!(matches!(parse_mxl(&data), Err(ParseError::Load(_))));
}

#[test]
fn non_musicxml_media_types_are_skipped() {
    let data = build_mxl(&[
        (
            "META-INF/container.xml",
            &container(
                r#"<rootfile full-path="cover.png" media-type="image/png"/>
                   <rootfile full-path="score.xml"
                             media-type="application/vnd.recordare.musicxml+xml"/>"#,
            ),
        ),
        ("score.xml", SCORE_XML),
    ]);

    let document = parse_mxl(&data).unwrap();
    assert_eq!(document.parts.len(), 1);
}

#[test]
fn missing_container_is_a_load_error() {
    let data = build_mxl(&[("score.xml", SCORE_XML)]);
    assert!(matches!(parse_mxl(&data), Err(ParseError::Load(_))));
}

#[test]
fn manifest_entry_missing_from_archive_is_a_load_error() {
    let data = build_mxl(&[(
        "META-INF/container.xml",
        &container(r#"<rootfile full-path="ghost.xml"/>"#),
    )]);
    assert!(matches!(parse_mxl(&data), Err(ParseError::Load(_))));
}

#[test]
fn garbage_bytes_are_a_load_error() {
    assert!(matches!(
        parse_mxl(b"not a zip archive"),
        Err(ParseError::Load(_))
    ));
}
