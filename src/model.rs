//! Data model for a parsed MusicXML score.
//!
//! This tree is the raw parse result: measure contents stay in MusicXML
//! division units and keep their source order. Normalization into the
//! canonical IR (quarter-note units, stable note ids) happens in
//! [`crate::extract`].

/// A complete musical score parsed from MusicXML.
#[derive(Debug, Clone, Default)]
pub struct Score {
    /// Title of the piece (credit title, falling back to work-title)
    pub title: Option<String>,
    /// Musical parts in document order
    pub parts: Vec<Part>,
}

/// A musical part (one instrument or voice).
#[derive(Debug, Clone)]
pub struct Part {
    /// Part identifier (e.g., "P1")
    pub id: String,
    /// Part name from the part-list; empty when the source has none
    pub name: String,
    /// Ordered list of measures
    pub measures: Vec<Measure>,
}

/// A single measure (bar) of music.
#[derive(Debug, Clone)]
pub struct Measure {
    /// Source measure number; `None` when absent or non-numeric
    pub number: Option<i32>,
    /// Attributes (divisions, key, time) — only present when they change
    pub attributes: Option<Attributes>,
    /// Notes and rests in source order
    pub notes: Vec<Note>,
    /// Total span of the measure in division units (the furthest cursor
    /// position reached while parsing; used to accumulate absolute offsets)
    pub span_div: i32,
}

/// Musical attributes that may change at the start of a measure.
#[derive(Debug, Clone, Default)]
pub struct Attributes {
    /// Divisions per quarter note (duration resolution)
    pub divisions: Option<i32>,
    /// Key signature
    pub key: Option<Key>,
    /// Time signature
    pub time: Option<TimeSignature>,
}

/// Key signature.
#[derive(Debug, Clone)]
pub struct Key {
    /// Number of sharps (positive) or flats (negative)
    pub fifths: i32,
}

/// Time signature.
#[derive(Debug, Clone)]
pub struct TimeSignature {
    /// Numerator (e.g., 3 in 3/4)
    pub beats: i32,
    /// Denominator (e.g., 4 in 3/4)
    pub beat_type: i32,
}

/// A single note or rest.
#[derive(Debug, Clone, Default)]
pub struct Note {
    /// Pitch (None if this is a rest)
    pub pitch: Option<Pitch>,
    /// Duration in divisions
    pub duration: i32,
    /// Start offset within the measure, in divisions
    pub start: i32,
    /// Whether this is a rest
    pub rest: bool,
    /// Whether this note sounds together with the previous note
    pub chord: bool,
    /// Voice number (for multi-voice writing)
    pub voice: Option<i32>,
    /// Staff number (1-based; for multi-staff parts like piano)
    pub staff: Option<i32>,
    /// Tie begins on this note; both flags set signifies a "continue"
    pub tie_start: bool,
    /// Tie ends on this note
    pub tie_stop: bool,
    /// Lyric syllables attached to this note
    pub lyrics: Vec<Lyric>,
}

/// Pitch of a note.
#[derive(Debug, Clone)]
pub struct Pitch {
    /// Note name: A, B, C, D, E, F, G
    pub step: String,
    /// Octave number (middle C = C4)
    pub octave: i32,
    /// Chromatic alteration: -1.0 = flat, 1.0 = sharp. Kept as a float
    /// because sources occasionally carry microtonal values; the IR
    /// normalizer coerces these to integer semitones.
    pub alter: Option<f64>,
}

/// A lyric syllable as written in the source.
#[derive(Debug, Clone)]
pub struct Lyric {
    /// Verse number (1-based)
    pub number: i32,
    /// Syllable text; never empty (empty syllables are dropped at parse)
    pub text: String,
    /// Raw syllabic marker: "single", "begin", "middle", "end" or other
    pub syllabic: Option<String>,
}

impl Score {
    /// First time signature declared anywhere in the score.
    pub fn first_time_signature(&self) -> Option<&TimeSignature> {
        self.parts.iter().find_map(|p| {
            p.measures
                .iter()
                .find_map(|m| m.attributes.as_ref().and_then(|a| a.time.as_ref()))
        })
    }

    /// First key signature declared anywhere in the score.
    pub fn first_key(&self) -> Option<&Key> {
        self.parts.iter().find_map(|p| {
            p.measures
                .iter()
                .find_map(|m| m.attributes.as_ref().and_then(|a| a.key.as_ref()))
        })
    }
}
