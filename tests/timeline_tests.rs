//! Timeline recalculation tests: tempo segment accumulation and
//! idempotence of the post-pass.

use mxseq::parse_musicxml;
use pretty_assertions::assert_eq;

fn quarter(step: &str) -> String {
    format!(
        "<note><pitch><step>{step}</step><octave>4</octave></pitch>\
         <duration>1</duration><voice>1</voice></note>"
    )
}

fn two_tempo_score() -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<score-partwise version="3.1">
  <part-list>
    <score-part id="P1"><part-name>Piano</part-name></score-part>
  </part-list>
  <part id="P1">
    <measure number="1">
      <attributes><divisions>1</divisions></attributes>
      <direction><sound tempo="120"/></direction>
      {n}{n}{n}{n}
    </measure>
    <measure number="2">
      <direction><sound tempo="60"/></direction>
      {n}{n}{n}{n}
    </measure>
  </part>
</score-partwise>"#,
        n = quarter("C")
    )
}

#[test]
fn notes_land_on_their_tempo_segment_start() {
    let mut document = parse_musicxml(&two_tempo_score()).unwrap();
    document.recalculate_time_position();

    let part = &document.parts[0];
    // First note of the piece sits at the timeline origin
    assert_eq!(part.measures[0].notes[0].duration.time_position, 0.0);

    // The second measure starts exactly where the first segment ends:
    // 4 ticks at 120 qpm with 1 division per quarter is 2 seconds
    let first_of_m2 = &part.measures[1].notes[0];
    assert_eq!(first_of_m2.duration.xml_position, 4);
    assert!((first_of_m2.duration.time_position - 2.0).abs() < 1e-9);
}

#[test]
fn recalculation_is_idempotent() {
    let mut document = parse_musicxml(&two_tempo_score()).unwrap();

    document.recalculate_time_position();
    let first_pass: Vec<f64> = document.parts[0]
        .measures
        .iter()
        .flat_map(|m| m.notes.iter().map(|n| n.duration.time_position))
        .collect();

    document.recalculate_time_position();
    let second_pass: Vec<f64> = document.parts[0]
        .measures
        .iter()
        .flat_map(|m| m.notes.iter().map(|n| n.duration.time_position))
        .collect();

    assert_eq!(first_pass, second_pass);
}

#[test]
fn recalculation_with_a_single_synthesized_tempo() {
    let xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<score-partwise version="3.1">
  <part-list>
    <score-part id="P1"><part-name>Piano</part-name></score-part>
  </part-list>
  <part id="P1">
    <measure number="1">
      <attributes><divisions>1</divisions></attributes>
      {n}{n}
    </measure>
  </part>
</score-partwise>"#,
        n = quarter("A")
    );
    let mut document = parse_musicxml(&xml).unwrap();
    document.recalculate_time_position();

    // Every note falls in the single default-tempo segment and positions
    // stay monotone
    let notes = &document.parts[0].measures[0].notes;
    assert_eq!(notes[0].duration.time_position, 0.0);
    assert!(notes[1].duration.time_position > notes[0].duration.time_position);
}

#[test]
fn recomputed_segment_starts_are_written_back() {
    // The only tempo event sits at tick 4, so it becomes the timeline
    // origin after recalculation
    let xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<score-partwise version="3.1">
  <part-list>
    <score-part id="P1"><part-name>Piano</part-name></score-part>
  </part-list>
  <part id="P1">
    <measure number="1">
      <attributes><divisions>1</divisions></attributes>
      {n}{n}{n}{n}
    </measure>
    <measure number="2">
      <direction><sound tempo="90"/></direction>
      {n}{n}
    </measure>
  </part>
</score-partwise>"#,
        n = quarter("C")
    );
    let mut document = parse_musicxml(&xml).unwrap();
    // As parsed, the event lies two seconds in at the default 120 qpm
    assert!((document.get_tempos()[0].time_position - 2.0).abs() < 1e-9);

    document.recalculate_time_position();

    let tempos = document.get_tempos();
    assert_eq!(tempos[0].time_position, 0.0);
    // The stored tempo agrees with the note rewritten onto its segment
    let first_of_m2 = &document.parts[0].measures[1].notes[0];
    assert_eq!(first_of_m2.duration.xml_position, 4);
    assert_eq!(first_of_m2.duration.time_position, tempos[0].time_position);
}

#[test]
fn tempos_in_later_parts_are_not_authoritative() {
    // Tempo changes outside the first part do not enter the tempo track
    let xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<score-partwise version="3.1">
  <part-list>
    <score-part id="P1"><part-name>A</part-name></score-part>
    <score-part id="P2"><part-name>B</part-name></score-part>
  </part-list>
  <part id="P1">
    <measure number="1">
      <attributes><divisions>1</divisions></attributes>
      {n}
    </measure>
  </part>
  <part id="P2">
    <measure number="1">
      <direction><sound tempo="90"/></direction>
      {n}
    </measure>
  </part>
</score-partwise>"#,
        n = quarter("C")
    );
    let document = parse_musicxml(&xml).unwrap();

    let tempos = document.get_tempos();
    assert_eq!(tempos.len(), 1);
    // The synthesized default reflects the final state tempo
    assert_eq!(tempos[0].qpm, 90.0);
    assert_eq!(tempos[0].xml_position, 0);
}
