//! MusicXML parser — converts MusicXML XML into the Score data model.
//!
//! Only the subset the dataset pipeline needs is parsed: part structure,
//! measure numbers, note timing/pitch/ties, and lyric syllables. The
//! document is coerced to a score: a bare `<part>` root is lifted into a
//! one-part score, a container holding several scores contributes its
//! first `<score-partwise>`, and as a last resort any `<part>` elements
//! found anywhere are concatenated.

use roxmltree::{Document, Node};

use crate::error::{Error, Result};
use crate::model::*;

/// Parse a MusicXML XML string into a Score.
pub fn parse_musicxml(xml: &str) -> Result<Score> {
    // MusicXML files include a DOCTYPE declaration, so we must allow DTDs
    let options = roxmltree::ParsingOptions {
        allow_dtd: true,
        ..Default::default()
    };
    let doc = Document::parse_with_options(xml, options)
        .map_err(|e| Error::parse(format!("XML parse error: {e}")))?;
    let root = doc.root_element();

    if let Some(score_el) = find_score_element(&root) {
        return parse_score_partwise(&score_el);
    }

    // Fallback coercion: concatenate whatever parts we can find.
    let parts: Vec<Node> = root
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == "part")
        .filter(|n| {
            n.children()
                .any(|c| c.is_element() && c.tag_name().name() == "measure")
        })
        .collect();
    if parts.is_empty() {
        return Err(Error::parse(format!(
            "Unsupported root element: '{}'. No score content found.",
            root.tag_name().name()
        )));
    }

    let mut score = Score::default();
    for (idx, node) in parts.iter().enumerate() {
        let id = node
            .attribute("id")
            .map(String::from)
            .unwrap_or_else(|| format!("P{}", idx + 1));
        let mut part = Part {
            id,
            name: String::new(),
            measures: Vec::new(),
        };
        parse_part_measures(node, &mut part);
        score.parts.push(part);
    }
    Ok(score)
}

/// Locate the score element to parse: the root itself when it is a
/// `<score-partwise>`, otherwise the first one found in a container.
fn find_score_element<'a, 'input>(root: &Node<'a, 'input>) -> Option<Node<'a, 'input>> {
    if root.tag_name().name() == "score-partwise" {
        return Some(*root);
    }
    root.descendants()
        .find(|n| n.is_element() && n.tag_name().name() == "score-partwise")
}

fn parse_score_partwise(root: &Node) -> Result<Score> {
    let mut score = Score::default();
    let mut work_title: Option<String> = None;
    let mut movement_title: Option<String> = None;

    for child in root.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "work" => {
                for wc in child.children().filter(|n| n.is_element()) {
                    if wc.tag_name().name() == "work-title" {
                        work_title = nonempty_text(&wc);
                    }
                }
            }
            "movement-title" => movement_title = nonempty_text(&child),
            // <credit type="title"> takes priority over work-title.
            "credit" => parse_credit(&child, &mut score),
            "part-list" => parse_part_list(&child, &mut score),
            "part" => parse_part(&child, &mut score),
            _ => {}
        }
    }

    if score.title.is_none() {
        score.title = work_title.or(movement_title);
    }
    Ok(score)
}

// ─── Credits ─────────────────────────────────────────────────────────

fn parse_credit(node: &Node, score: &mut Score) {
    let mut credit_type = String::new();
    let mut credit_text = String::new();

    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "credit-type" => {
                credit_type = child.text().unwrap_or("").trim().to_string();
            }
            "credit-words" => {
                let text = child.text().unwrap_or("").trim();
                if !text.is_empty() {
                    if !credit_text.is_empty() {
                        credit_text.push('\n');
                    }
                    credit_text.push_str(text);
                }
            }
            _ => {}
        }
    }

    if credit_type == "title" && !credit_text.is_empty() {
        score.title = Some(credit_text);
    }
}

// ─── Part List ───────────────────────────────────────────────────────

fn parse_part_list(node: &Node, score: &mut Score) {
    for child in node.children().filter(|n| n.is_element()) {
        if child.tag_name().name() == "score-part" {
            let id = child.attribute("id").unwrap_or("").to_string();
            let mut part = Part {
                id,
                name: String::new(),
                measures: Vec::new(),
            };
            for sp_child in child.children().filter(|n| n.is_element()) {
                if sp_child.tag_name().name() == "part-name" {
                    part.name = sp_child.text().unwrap_or("").trim().to_string();
                }
            }
            score.parts.push(part);
        }
    }
}

// ─── Part (measures) ─────────────────────────────────────────────────

fn parse_part(node: &Node, score: &mut Score) {
    let part_id = node.attribute("id").unwrap_or("").to_string();

    // Match against the part-list; a part without a score-part entry is
    // still kept (bare-part lifting) with a synthesized entry.
    let idx = match score.parts.iter().position(|p| p.id == part_id) {
        Some(i) => i,
        None => {
            score.parts.push(Part {
                id: part_id,
                name: String::new(),
                measures: Vec::new(),
            });
            score.parts.len() - 1
        }
    };
    parse_part_measures(node, &mut score.parts[idx]);
}

fn parse_part_measures(node: &Node, part: &mut Part) {
    for child in node.children().filter(|n| n.is_element()) {
        if child.tag_name().name() == "measure" {
            part.measures.push(parse_measure(&child));
        }
    }
}

// ─── Measure ─────────────────────────────────────────────────────────

fn parse_measure(node: &Node) -> Measure {
    // Absent or non-numeric measure numbers stay None; the IR layer
    // excludes them instead of defaulting.
    let number = node.attribute("number").and_then(|n| n.trim().parse::<i32>().ok());

    let mut measure = Measure {
        number,
        attributes: None,
        notes: Vec::new(),
        span_div: 0,
    };

    // Time cursor in divisions. <backup>/<forward> move it; a <chord>
    // note reuses the previous note's start instead of advancing.
    let mut cursor: i32 = 0;
    let mut max_cursor: i32 = 0;
    let mut last_start: i32 = 0;

    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "attributes" => measure.attributes = Some(parse_attributes(&child)),
            "note" => {
                let mut note = parse_note(&child);
                if note.chord {
                    note.start = last_start;
                } else {
                    note.start = cursor;
                    cursor += note.duration;
                }
                last_start = note.start;
                max_cursor = max_cursor.max(cursor);
                measure.notes.push(note);
            }
            "backup" => {
                cursor = (cursor - element_duration(&child)).max(0);
            }
            "forward" => {
                cursor += element_duration(&child);
                max_cursor = max_cursor.max(cursor);
            }
            _ => {}
        }
    }

    measure.span_div = max_cursor;
    measure
}

fn element_duration(node: &Node) -> i32 {
    node.children()
        .filter(|n| n.is_element() && n.tag_name().name() == "duration")
        .find_map(|n| parse_i32(&n))
        .unwrap_or(0)
}

// ─── Attributes ──────────────────────────────────────────────────────

fn parse_attributes(node: &Node) -> Attributes {
    let mut attrs = Attributes::default();

    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "divisions" => attrs.divisions = parse_i32(&child),
            "key" => {
                for kc in child.children().filter(|n| n.is_element()) {
                    if kc.tag_name().name() == "fifths" {
                        attrs.key = Some(Key {
                            fifths: parse_i32(&kc).unwrap_or(0),
                        });
                    }
                }
            }
            "time" => {
                let mut ts = TimeSignature {
                    beats: 4,
                    beat_type: 4,
                };
                for tc in child.children().filter(|n| n.is_element()) {
                    match tc.tag_name().name() {
                        "beats" => ts.beats = parse_i32(&tc).unwrap_or(4),
                        "beat-type" => ts.beat_type = parse_i32(&tc).unwrap_or(4),
                        _ => {}
                    }
                }
                attrs.time = Some(ts);
            }
            _ => {}
        }
    }

    attrs
}

// ─── Note ────────────────────────────────────────────────────────────

fn parse_note(node: &Node) -> Note {
    let mut note = Note::default();

    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "pitch" => note.pitch = Some(parse_pitch(&child)),
            "duration" => note.duration = parse_i32(&child).unwrap_or(0),
            "voice" => note.voice = parse_i32(&child),
            "staff" => note.staff = parse_i32(&child),
            "rest" => note.rest = true,
            "chord" => note.chord = true,
            "tie" => match child.attribute("type") {
                Some("start") => note.tie_start = true,
                Some("stop") => note.tie_stop = true,
                _ => {}
            },
            "lyric" => {
                let number = child
                    .attribute("number")
                    .and_then(|n| n.parse().ok())
                    .unwrap_or(1);
                let mut text = String::new();
                let mut syllabic = None;
                for lc in child.children().filter(|n| n.is_element()) {
                    match lc.tag_name().name() {
                        "text" => {
                            text = lc.text().unwrap_or("").trim().to_string();
                        }
                        "syllabic" => {
                            syllabic = lc.text().map(|t| t.trim().to_string());
                        }
                        _ => {}
                    }
                }
                // Tokens with empty text are dropped at source.
                if !text.is_empty() {
                    note.lyrics.push(Lyric {
                        number,
                        text,
                        syllabic,
                    });
                }
            }
            _ => {}
        }
    }

    note
}

fn parse_pitch(node: &Node) -> Pitch {
    let mut pitch = Pitch {
        step: "C".to_string(),
        octave: 4,
        alter: None,
    };
    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "step" => {
                pitch.step = child.text().unwrap_or("C").trim().to_string();
            }
            "octave" => pitch.octave = parse_i32(&child).unwrap_or(4),
            "alter" => pitch.alter = parse_f64(&child),
            _ => {}
        }
    }
    pitch
}

// ─── Helpers ─────────────────────────────────────────────────────────

fn parse_i32(node: &Node) -> Option<i32> {
    node.text()?.trim().parse().ok()
}

fn parse_f64(node: &Node) -> Option<f64> {
    node.text()?.trim().parse().ok()
}

fn nonempty_text(node: &Node) -> Option<String> {
    node.text()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}
