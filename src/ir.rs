//! Canonical intermediate representation of a score.
//!
//! A `ScoreIR` is produced once per input document, cached as a JSON file
//! with stable 2-space indentation, and never mutated afterwards —
//! regeneration is idempotent. The cached schema is the serde shape of
//! these types.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Position of a syllable within its word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Syllabic {
    Single,
    Begin,
    Middle,
    End,
}

impl Syllabic {
    /// Coerce a raw source marker; unrecognized values become `Single`.
    pub fn from_source(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("begin") => Syllabic::Begin,
            Some("middle") => Syllabic::Middle,
            Some("end") => Syllabic::End,
            _ => Syllabic::Single,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Syllabic::Single => "single",
            Syllabic::Begin => "begin",
            Syllabic::Middle => "middle",
            Syllabic::End => "end",
        }
    }
}

/// One lyric syllable, linked to the note it is sung on.
///
/// `note_id` is a relation, not ownership: the referenced `NoteEvent`
/// lives in the same `ScoreIR` but possibly a different measure list
/// position. QA reports unresolved references as dangling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LyricsToken {
    /// Syllable text; non-empty after trimming by construction
    pub text: String,
    pub syllabic: Syllabic,
    /// Id of the `NoteEvent` this syllable is attached to
    pub note_id: String,
    #[serde(default)]
    pub word_index: Option<i32>,
    /// Index within the note's lyric list (verse position)
    #[serde(default)]
    pub syll_index: Option<i32>,
}

/// One pitched note event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteEvent {
    /// Stable synthetic id, unique within the score: `p<part>_n<seq>`
    pub id: String,
    pub pitch_step: String,
    pub pitch_octave: i32,
    /// Integer semitone alteration in [-2, 2]; microtonal sources are
    /// coerced (see `extract::coerce_alter`)
    pub pitch_alter: i32,
    /// Duration in quarter-note units, non-negative
    pub duration_quarter: f64,
    /// Start offset from the part's beginning in quarter-note units
    pub start_quarter: f64,
    /// Voice index, 1 when the source has none
    pub voice: i32,
    /// Staff index, 1 when the source has none
    pub staff: i32,
    #[serde(default)]
    pub tie_start: bool,
    #[serde(default)]
    pub tie_stop: bool,
}

/// One measure: notes plus the lyric tokens discovered in it.
///
/// Token order is discovery order during extraction, not guaranteed
/// temporal order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasureIR {
    /// 1-based source measure number; may be non-contiguous
    pub number: i32,
    pub notes: Vec<NoteEvent>,
    pub lyrics: Vec<LyricsToken>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartIR {
    pub id: String,
    pub name: String,
    pub measures: Vec<MeasureIR>,
}

/// The canonical score tree. Owns all descendants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreIR {
    pub title: String,
    pub parts: Vec<PartIR>,
    #[serde(default)]
    pub time_signature: Option<String>,
    #[serde(default)]
    pub key_fifths: Option<i32>,
    #[serde(default)]
    pub has_lyrics: bool,
}

impl ScoreIR {
    /// All lyric tokens in document order.
    pub fn tokens(&self) -> Vec<&LyricsToken> {
        self.parts
            .iter()
            .flat_map(|p| p.measures.iter())
            .flat_map(|m| m.lyrics.iter())
            .collect()
    }

    /// The set of note ids present anywhere in the score.
    pub fn note_ids(&self) -> HashSet<&str> {
        self.parts
            .iter()
            .flat_map(|p| p.measures.iter())
            .flat_map(|m| m.notes.iter())
            .map(|n| n.id.as_str())
            .collect()
    }

    /// Read a cached IR file.
    pub fn read_json(path: &Path) -> Result<ScoreIR> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Write the IR cache with stable 2-space indentation.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syllabic_coercion_defaults_to_single() {
        assert_eq!(Syllabic::from_source(Some("begin")), Syllabic::Begin);
        assert_eq!(Syllabic::from_source(Some("END")), Syllabic::End);
        assert_eq!(Syllabic::from_source(Some("hyphenated")), Syllabic::Single);
        assert_eq!(Syllabic::from_source(None), Syllabic::Single);
    }

    #[test]
    fn syllabic_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&Syllabic::Middle).unwrap(),
            "\"middle\""
        );
        let back: Syllabic = serde_json::from_str("\"begin\"").unwrap();
        assert_eq!(back, Syllabic::Begin);
    }
}
