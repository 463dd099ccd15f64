//! End-to-end tests for the extraction path: MusicXML document in,
//! canonical IR out, with stable ids, quarter-note timing and a cache
//! that round-trips unchanged.

use std::collections::HashSet;

use pretty_assertions::assert_eq;

use lyricset::backend::{MusicXmlBackend, ScoreBackend};
use lyricset::extract::{extract_file, score_to_ir};
use lyricset::ir::{ScoreIR, Syllabic};

const TWO_VOICE_HYMN: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<score-partwise version="3.1">
  <work><work-title>Morning Hymn</work-title></work>
  <part-list>
    <score-part id="P1"><part-name>Soprano</part-name></score-part>
    <score-part id="P2"><part-name>Alto</part-name></score-part>
  </part-list>
  <part id="P1">
    <measure number="1">
      <attributes>
        <divisions>4</divisions>
        <key><fifths>-1</fifths></key>
        <time><beats>3</beats><beat-type>4</beat-type></time>
      </attributes>
      <note><pitch><step>G</step><octave>4</octave></pitch><duration>4</duration><voice>1</voice>
        <lyric number="1"><syllabic>begin</syllabic><text>Mor</text></lyric>
      </note>
      <note><pitch><step>A</step><octave>4</octave></pitch><duration>4</duration><voice>1</voice>
        <lyric number="1"><syllabic>end</syllabic><text>ning</text></lyric>
      </note>
      <backup><duration>8</duration></backup>
      <note><pitch><step>E</step><octave>4</octave></pitch><duration>8</duration><voice>2</voice></note>
      <note><chord/><pitch><step>C</step><octave>4</octave></pitch><duration>8</duration><voice>2</voice></note>
      <note><pitch><step>B</step><octave>4</octave></pitch><duration>4</duration><voice>1</voice>
        <tie type="start"/>
        <lyric number="1"><syllabic>single</syllabic><text>sun</text></lyric>
      </note>
    </measure>
    <measure number="2">
      <note><pitch><step>B</step><octave>4</octave></pitch><duration>12</duration><voice>1</voice>
        <tie type="stop"/>
      </note>
    </measure>
  </part>
  <part id="P2">
    <measure number="1">
      <attributes><divisions>2</divisions></attributes>
      <note><pitch><step>C</step><octave>3</octave><alter>-1</alter></pitch><duration>6</duration></note>
    </measure>
  </part>
</score-partwise>"#;

fn hymn_ir() -> ScoreIR {
    let score = MusicXmlBackend.parse(TWO_VOICE_HYMN.as_bytes(), Some("musicxml")).unwrap();
    let key = MusicXmlBackend.analyze_key(&score);
    score_to_ir(&score, "fallback", key)
}

#[test]
fn header_fields_come_from_the_document() {
    let ir = hymn_ir();
    assert_eq!(ir.title, "Morning Hymn");
    assert_eq!(ir.time_signature.as_deref(), Some("3/4"));
    assert_eq!(ir.key_fifths, Some(-1));
    assert!(ir.has_lyrics);
    assert_eq!(ir.parts.len(), 2);
    assert_eq!(ir.parts[0].name, "Soprano");
    assert_eq!(ir.parts[1].name, "Alto");
}

#[test]
fn note_ids_are_unique_and_sequential_within_each_part() {
    let ir = hymn_ir();
    let mut seen: HashSet<String> = HashSet::new();
    for part in &ir.parts {
        for (seq, note) in part
            .measures
            .iter()
            .flat_map(|m| m.notes.iter())
            .enumerate()
        {
            assert!(note.id.ends_with(&format!("_n{seq}")), "id {}", note.id);
            assert!(seen.insert(note.id.clone()), "duplicate id {}", note.id);
        }
    }
    assert_eq!(ir.parts[1].measures[0].notes[0].id, "p1_n0");
}

#[test]
fn backup_and_chord_produce_overlapping_starts() {
    let ir = hymn_ir();
    let notes = &ir.parts[0].measures[0].notes;
    // voice 1: G at 0, A at 1; voice 2 after backup: E and chorded C at 0
    let starts: Vec<f64> = notes.iter().map(|n| n.start_quarter).collect();
    assert_eq!(starts, vec![0.0, 1.0, 0.0, 0.0, 2.0]);
    let voice2: Vec<&str> = notes
        .iter()
        .filter(|n| n.voice == 2)
        .map(|n| n.pitch_step.as_str())
        .collect();
    assert_eq!(voice2, vec!["E", "C"]);

    // The second measure starts after the 3-quarter measure span, and a
    // different divisions value in P2 still yields quarter units.
    assert_eq!(ir.parts[0].measures[1].notes[0].start_quarter, 3.0);
    assert_eq!(ir.parts[1].measures[0].notes[0].duration_quarter, 3.0);
    assert_eq!(ir.parts[1].measures[0].notes[0].pitch_alter, -1);
}

#[test]
fn ties_split_across_measures_keep_both_flags() {
    let ir = hymn_ir();
    let sung = &ir.parts[0].measures[0].notes[4];
    assert!(sung.tie_start && !sung.tie_stop);
    let held = &ir.parts[0].measures[1].notes[0];
    assert!(!held.tie_start && held.tie_stop);
}

#[test]
fn every_token_resolves_to_a_note() {
    let ir = hymn_ir();
    let tokens = ir.tokens();
    assert_eq!(tokens.len(), 3);
    let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
    assert_eq!(texts, vec!["Mor", "ning", "sun"]);
    assert_eq!(tokens[0].syllabic, Syllabic::Begin);
    assert_eq!(tokens[2].syllabic, Syllabic::Single);

    let ids = ir.note_ids();
    for token in &tokens {
        assert!(ids.contains(token.note_id.as_str()), "{}", token.note_id);
    }
}

#[test]
fn cache_round_trips_structurally_equal() {
    let ir = hymn_ir();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hymn.json");
    ir.write_json(&path).unwrap();
    let back = ScoreIR::read_json(&path).unwrap();
    assert_eq!(back, ir);

    // Rewriting an unchanged score is byte-stable.
    let first = std::fs::read_to_string(&path).unwrap();
    back.write_json(&path).unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), first);
}

#[test]
fn extract_file_uses_the_stem_when_untitled() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("untitled_piece.musicxml");
    std::fs::write(
        &path,
        r#"<score-partwise>
  <part-list><score-part id="P1"/></part-list>
  <part id="P1"><measure number="1">
    <note><pitch><step>C</step><octave>4</octave></pitch><duration>1</duration></note>
  </measure></part>
</score-partwise>"#,
    )
    .unwrap();

    let ir = extract_file(&MusicXmlBackend, &path).unwrap();
    assert_eq!(ir.title, "untitled_piece");
    assert!(!ir.has_lyrics);
}
