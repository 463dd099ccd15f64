//! IR extraction — normalizes parsed scores into the canonical `ScoreIR`
//! and drives incremental, parallel batch extraction over a corpus.
//!
//! Batch mode never aborts on a bad file: each failure is logged and
//! written as a `<stem>.error.txt` sidecar next to the would-be output,
//! and the walk continues.

use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use log::{info, warn};

use crate::backend::ScoreBackend;
use crate::error::{Error, Result};
use crate::ir::{LyricsToken, MeasureIR, NoteEvent, PartIR, ScoreIR, Syllabic};
use crate::model::{Note, Part, Score};

/// Log a progress event every this many completed files, to bound log
/// volume on large corpora.
const PROGRESS_EVERY: usize = 50;

/// Fast pre-filter marker: files without this substring cannot carry
/// MusicXML lyrics, so a full parse can be skipped.
const LYRIC_MARKER: &str = "<lyric";

/// Alteration values within this distance of an integer semitone are
/// rounded to it; anything farther is microtonal and coerced to 0.
const ALTER_TOLERANCE: f64 = 0.34;

// ─── Single-file extraction ─────────────────────────────────────────

/// Parse one score document and normalize it to `ScoreIR`.
pub fn extract_file(backend: &dyn ScoreBackend, path: &Path) -> Result<ScoreIR> {
    let data = fs::read(path)
        .map_err(|e| Error::parse(format!("Failed to read '{}': {e}", path.display())))?;
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    let score = backend.parse(&data, ext.as_deref())?;
    let fallback_title = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let key_fifths = backend.analyze_key(&score);
    Ok(score_to_ir(&score, &fallback_title, key_fifths))
}

/// Normalize a parsed score into the canonical IR.
///
/// Per part: the measure stream is flattened to a single time-ordered
/// note list, distinct source measure numbers are collected (absent
/// numbers excluded, not defaulted), and note ids are assigned
/// sequentially per part in traversal order.
pub fn score_to_ir(score: &Score, fallback_title: &str, key_fifths: Option<i32>) -> ScoreIR {
    let title = score
        .title
        .clone()
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| fallback_title.to_string());
    let time_signature = score
        .first_time_signature()
        .map(|ts| format!("{}/{}", ts.beats, ts.beat_type));

    let mut parts_ir: Vec<PartIR> = Vec::with_capacity(score.parts.len());
    for (p_idx, part) in score.parts.iter().enumerate() {
        parts_ir.push(part_to_ir(part, p_idx));
    }

    let has_lyrics = parts_ir
        .iter()
        .any(|p| p.measures.iter().any(|m| !m.lyrics.is_empty()));

    ScoreIR {
        title,
        parts: parts_ir,
        time_signature,
        key_fifths,
        has_lyrics,
    }
}

/// A pitched note positioned on the part's absolute quarter-note axis.
struct FlatNote<'a> {
    measure_number: i32,
    note: &'a Note,
    start_quarter: f64,
    duration_quarter: f64,
}

fn part_to_ir(part: &Part, p_idx: usize) -> PartIR {
    // Flatten in document order, tracking the active divisions value and
    // the running offset so starts are absolute within the part.
    let mut flat: Vec<FlatNote> = Vec::new();
    let mut divisions: i32 = 1;
    let mut measure_start_q = 0.0f64;

    for measure in &part.measures {
        if let Some(d) = measure.attributes.as_ref().and_then(|a| a.divisions) {
            divisions = d.max(1);
        }
        let div = divisions as f64;
        if let Some(number) = measure.number {
            for note in &measure.notes {
                if note.rest || note.pitch.is_none() {
                    continue;
                }
                flat.push(FlatNote {
                    measure_number: number,
                    note,
                    start_quarter: (measure_start_q + note.start as f64 / div).max(0.0),
                    duration_quarter: (note.duration as f64 / div).max(0.0),
                });
            }
        }
        measure_start_q += measure.span_div as f64 / div;
    }

    // Distinct measure numbers actually present, ascending.
    let mut numbers: Vec<i32> = flat.iter().map(|f| f.measure_number).collect();
    numbers.sort_unstable();
    numbers.dedup();

    let mut measures_ir: Vec<MeasureIR> = Vec::with_capacity(numbers.len());
    let mut note_seq = 0usize;

    for number in numbers {
        let mut notes_ir: Vec<NoteEvent> = Vec::new();
        let mut lyrics_ir: Vec<LyricsToken> = Vec::new();

        for fnote in flat.iter().filter(|f| f.measure_number == number) {
            let note = fnote.note;
            let Some(pitch) = note.pitch.as_ref() else {
                continue;
            };
            let id = format!("p{p_idx}_n{note_seq}");
            note_seq += 1;

            let alter = coerce_alter(pitch.alter.unwrap_or(0.0), &id);

            notes_ir.push(NoteEvent {
                id: id.clone(),
                pitch_step: pitch.step.clone(),
                pitch_octave: pitch.octave,
                pitch_alter: alter,
                duration_quarter: fnote.duration_quarter,
                start_quarter: fnote.start_quarter,
                voice: note.voice.unwrap_or(1),
                staff: note.staff.unwrap_or(1),
                tie_start: note.tie_start,
                tie_stop: note.tie_stop,
            });

            for (li, lyric) in note.lyrics.iter().enumerate() {
                let text = lyric.text.trim();
                if text.is_empty() {
                    continue;
                }
                lyrics_ir.push(LyricsToken {
                    text: text.to_string(),
                    syllabic: Syllabic::from_source(lyric.syllabic.as_deref()),
                    note_id: id.clone(),
                    word_index: None,
                    syll_index: Some(li as i32),
                });
            }
        }

        measures_ir.push(MeasureIR {
            number,
            notes: notes_ir,
            lyrics: lyrics_ir,
        });
    }

    PartIR {
        id: format!("P{}", p_idx + 1),
        name: if part.name.is_empty() {
            format!("Part {}", p_idx + 1)
        } else {
            part.name.clone()
        },
        measures: measures_ir,
    }
}

/// Coerce a source alteration to an integer semitone in [-2, 2].
///
/// Values within `ALTER_TOLERANCE` of an integer round to it; values
/// farther from an integer, or with magnitude beyond 2.5, become 0 and
/// are logged as microtonal loss.
fn coerce_alter(alter: f64, note_id: &str) -> i32 {
    let rounded = alter.round();
    if alter.abs() <= 2.5 && (alter - rounded).abs() <= ALTER_TOLERANCE {
        rounded.clamp(-2.0, 2.0) as i32
    } else {
        if alter != 0.0 {
            warn!("microtonal_alter_coerced: note={note_id} alter={alter}");
        }
        0
    }
}

// ─── Batch extraction ───────────────────────────────────────────────

/// Options for batch IR extraction.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub input_dir: PathBuf,
    pub out_dir: PathBuf,
    /// Worker pool size; 1 means fully sequential
    pub jobs: usize,
    /// Pre-filter inputs by a fast substring scan for the lyric marker
    pub lyrics_only: bool,
    /// Skip files whose cached IR is not older than the source
    pub skip_up_to_date: bool,
}

impl ExtractOptions {
    pub fn new(input_dir: impl Into<PathBuf>, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            out_dir: out_dir.into(),
            jobs: 1,
            lyrics_only: false,
            skip_up_to_date: true,
        }
    }
}

/// Tallies for one batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub written: usize,
    pub skipped: usize,
    pub failed: usize,
}

enum FileOutcome {
    Written,
    Skipped,
    Failed,
}

/// Extract IR for every supported score file under `input_dir`.
///
/// Failures never abort the batch; each is recorded as a sidecar and in
/// the returned summary.
pub fn extract_batch(backend: &dyn ScoreBackend, opts: &ExtractOptions) -> Result<BatchSummary> {
    fs::create_dir_all(&opts.out_dir)?;

    let mut candidates = discover_score_files(&opts.input_dir);
    if opts.lyrics_only {
        candidates.retain(|p| passes_lyrics_filter(p));
    }

    if candidates.is_empty() {
        warn!("extract_no_candidates: dir={}", opts.input_dir.display());
        return Ok(BatchSummary::default());
    }

    let total = candidates.len();
    info!(
        "extract_start: files={total} jobs={} lyrics_only={} skip_up_to_date={}",
        opts.jobs, opts.lyrics_only, opts.skip_up_to_date
    );

    let done = AtomicUsize::new(0);
    let run_one = |path: &PathBuf| -> FileOutcome {
        let outcome = process_one(backend, path, opts);
        let n = done.fetch_add(1, Ordering::Relaxed) + 1;
        if n % PROGRESS_EVERY == 0 {
            info!("extract_progress: done={n} total={total}");
        }
        outcome
    };

    let outcomes: Vec<FileOutcome> = if opts.jobs <= 1 {
        candidates.iter().map(run_one).collect()
    } else {
        use rayon::prelude::*;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(opts.jobs)
            .build()
            .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;
        pool.install(|| candidates.par_iter().map(run_one).collect())
    };

    let mut summary = BatchSummary {
        total,
        ..Default::default()
    };
    for outcome in outcomes {
        match outcome {
            FileOutcome::Written => summary.written += 1,
            FileOutcome::Skipped => summary.skipped += 1,
            FileOutcome::Failed => summary.failed += 1,
        }
    }
    info!(
        "extract_done: written={} skipped={} failed={} total={}",
        summary.written, summary.skipped, summary.failed, summary.total
    );
    Ok(summary)
}

fn process_one(backend: &dyn ScoreBackend, path: &Path, opts: &ExtractOptions) -> FileOutcome {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let out_path = opts.out_dir.join(format!("{stem}.json"));

    if opts.skip_up_to_date && is_up_to_date(&out_path, path) {
        return FileOutcome::Skipped;
    }

    // A panicking parser must take down one file, not the batch.
    let extracted = panic::catch_unwind(AssertUnwindSafe(|| extract_file(backend, path)));
    let result = match extracted {
        Ok(r) => r,
        Err(payload) => Err(Error::parse(panic_message(payload))),
    };

    match result.and_then(|ir| ir.write_json(&out_path)) {
        Ok(()) => FileOutcome::Written,
        Err(err) => {
            let message = err.to_string();
            warn!("extract_failed: file={} error={message}", path.display());
            let sidecar = opts.out_dir.join(format!("{stem}.error.txt"));
            if let Err(e) = fs::write(&sidecar, &message) {
                warn!("sidecar_write_failed: file={} error={e}", sidecar.display());
            }
            FileOutcome::Failed
        }
    }
}

/// True when `out` exists and is not older than `src`.
fn is_up_to_date(out: &Path, src: &Path) -> bool {
    let (Ok(out_meta), Ok(src_meta)) = (fs::metadata(out), fs::metadata(src)) else {
        return false;
    };
    match (out_meta.modified(), src_meta.modified()) {
        (Ok(out_m), Ok(src_m)) => out_m >= src_m,
        _ => false,
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("parser panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("parser panicked: {s}")
    } else {
        "parser panicked".to_string()
    }
}

// ─── Discovery ──────────────────────────────────────────────────────

/// Recursively discover supported score files, sorted by path.
pub fn discover_score_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    collect_score_files(dir, &mut files);
    files.sort();
    files
}

fn collect_score_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_score_files(&path, out);
        } else if is_supported_score(&path) {
            out.push(path);
        }
    }
}

fn is_supported_score(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref(),
        Some("musicxml") | Some("xml") | Some("mxl")
    )
}

/// Substring scan for the lyric marker. Compressed `.mxl` archives
/// cannot be scanned cheaply and always pass.
fn passes_lyrics_filter(path: &Path) -> bool {
    if path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("mxl"))
    {
        return true;
    }
    match fs::read(path) {
        Ok(data) => String::from_utf8_lossy(&data).contains(LYRIC_MARKER),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_musicxml;
    use pretty_assertions::assert_eq;

    fn lyric_score() -> Score {
        parse_musicxml(
            r#"<score-partwise>
  <part-list><score-part id="P1"><part-name>Voice</part-name></score-part></part-list>
  <part id="P1">
    <measure number="1">
      <attributes><divisions>2</divisions>
        <time><beats>4</beats><beat-type>4</beat-type></time>
        <key><fifths>2</fifths></key>
      </attributes>
      <note><pitch><step>C</step><octave>4</octave></pitch><duration>2</duration>
        <lyric number="1"><syllabic>begin</syllabic><text>Sun</text></lyric>
      </note>
      <note><pitch><step>D</step><octave>4</octave><alter>1</alter></pitch><duration>2</duration>
        <tie type="start"/><tie type="stop"/>
        <lyric number="1"><syllabic>end</syllabic><text>rise</text></lyric>
      </note>
    </measure>
    <measure number="3">
      <note><pitch><step>E</step><octave>4</octave></pitch><duration>4</duration></note>
    </measure>
  </part>
</score-partwise>"#,
        )
        .unwrap()
    }

    #[test]
    fn ids_are_sequential_per_part_across_measures() {
        let ir = score_to_ir(&lyric_score(), "fallback", None);
        let part = &ir.parts[0];
        assert_eq!(part.id, "P1");
        assert_eq!(part.name, "Voice");
        let ids: Vec<&str> = part
            .measures
            .iter()
            .flat_map(|m| m.notes.iter())
            .map(|n| n.id.as_str())
            .collect();
        assert_eq!(ids, vec!["p0_n0", "p0_n1", "p0_n2"]);
    }

    #[test]
    fn measure_numbers_are_source_defined_and_non_contiguous() {
        let ir = score_to_ir(&lyric_score(), "fallback", None);
        let numbers: Vec<i32> = ir.parts[0].measures.iter().map(|m| m.number).collect();
        assert_eq!(numbers, vec![1, 3]);
    }

    #[test]
    fn quarter_units_voice_staff_defaults_and_ties() {
        let ir = score_to_ir(&lyric_score(), "fallback", Some(2));
        let m1 = &ir.parts[0].measures[0];
        let n0 = &m1.notes[0];
        assert_eq!(n0.duration_quarter, 1.0);
        assert_eq!(n0.start_quarter, 0.0);
        assert_eq!(n0.voice, 1);
        assert_eq!(n0.staff, 1);

        // Both tie flags set signifies a "continue" tie.
        let n1 = &m1.notes[1];
        assert!(n1.tie_start && n1.tie_stop);
        assert_eq!(n1.pitch_alter, 1);
        assert_eq!(n1.start_quarter, 1.0);

        // Second measure starts after the first measure's span.
        let n2 = &ir.parts[0].measures[1].notes[0];
        assert_eq!(n2.start_quarter, 2.0);

        assert_eq!(ir.time_signature.as_deref(), Some("4/4"));
        assert_eq!(ir.key_fifths, Some(2));
        assert!(ir.has_lyrics);
    }

    #[test]
    fn lyric_tokens_reference_their_note() {
        let ir = score_to_ir(&lyric_score(), "fallback", None);
        let tokens = ir.tokens();
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].text, "Sun");
        assert_eq!(tokens[0].syllabic, Syllabic::Begin);
        assert_eq!(tokens[0].note_id, "p0_n0");
        assert_eq!(tokens[0].syll_index, Some(0));
        assert_eq!(tokens[1].note_id, "p0_n1");
        let ids = ir.note_ids();
        assert!(tokens.iter().all(|t| ids.contains(t.note_id.as_str())));
    }

    #[test]
    fn alter_coercion_rounds_clamps_and_zeroes_microtones() {
        assert_eq!(coerce_alter(0.0, "n"), 0);
        assert_eq!(coerce_alter(1.0, "n"), 1);
        assert_eq!(coerce_alter(-2.2, "n"), -2);
        assert_eq!(coerce_alter(1.34, "n"), 1);
        // Quarter tones are farther than the tolerance from any integer.
        assert_eq!(coerce_alter(0.5, "n"), 0);
        assert_eq!(coerce_alter(-1.5, "n"), 0);
        // Magnitude beyond 2.5 is always lossy.
        assert_eq!(coerce_alter(3.0, "n"), 0);
        assert_eq!(coerce_alter(-7.0, "n"), 0);
    }

    #[test]
    fn title_falls_back_to_stem() {
        let score = Score::default();
        let ir = score_to_ir(&score, "my_song", None);
        assert_eq!(ir.title, "my_song");
        assert!(!ir.has_lyrics);
    }
}
