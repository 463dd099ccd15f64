//! Corpus QA over a directory of cached IR files.
//!
//! Re-reads every extracted `ScoreIR`, checks referential integrity
//! (every lyric token must point at a note that exists), tallies the
//! syllabic histogram, and counts the failure artifacts the extraction
//! pass left behind.

use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::Serialize;

use crate::error::Result;
use crate::ir::{ScoreIR, Syllabic};

/// Per-file tallies of the syllabic classes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyllabicCounts {
    pub single: usize,
    pub begin: usize,
    pub middle: usize,
    pub end: usize,
}

impl SyllabicCounts {
    fn bump(&mut self, syllabic: Syllabic) {
        match syllabic {
            Syllabic::Single => self.single += 1,
            Syllabic::Begin => self.begin += 1,
            Syllabic::Middle => self.middle += 1,
            Syllabic::End => self.end += 1,
        }
    }

    fn add(&mut self, other: &SyllabicCounts) {
        self.single += other.single;
        self.begin += other.begin;
        self.middle += other.middle;
        self.end += other.end;
    }
}

/// QA row for one IR file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IrFileRow {
    pub work_id: String,
    pub has_lyrics: bool,
    pub parts: usize,
    pub measures: usize,
    pub notes: usize,
    pub lyrics: usize,
    /// Tokens whose text is empty after trimming
    pub empty_lyrics: usize,
    /// Tokens referencing a note id absent from the file
    pub dangling_lyrics: usize,
    pub syllabic: SyllabicCounts,
}

/// Aggregate QA tallies for a corpus.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IrSummary {
    /// IR files successfully loaded; unparseable ones count only in
    /// `failed_json`
    pub files_total: usize,
    pub files_with_lyrics: usize,
    /// IR files that exist but could not be deserialized
    pub failed_json: usize,
    /// Extraction failure sidecars present in the directory
    pub error_txt_files: usize,
    pub parts: usize,
    pub measures: usize,
    pub notes: usize,
    pub lyrics: usize,
    pub empty_lyrics: usize,
    pub dangling_lyrics: usize,
    pub syllabic: SyllabicCounts,
}

/// Run QA over every `.json` IR file under `dir`, recursively — the
/// cache may mirror the input corpus's directory layout.
pub fn qa_ir_dir(dir: &Path) -> Result<(IrSummary, Vec<IrFileRow>)> {
    let mut json_files: Vec<PathBuf> = Vec::new();
    let mut error_txt_files = 0usize;
    collect_cache_files(dir, &mut json_files, &mut error_txt_files)?;
    json_files.sort();

    let mut summary = IrSummary {
        error_txt_files,
        ..Default::default()
    };
    let mut rows: Vec<IrFileRow> = Vec::with_capacity(json_files.len());

    for path in &json_files {
        let ir = match ScoreIR::read_json(path) {
            Ok(ir) => ir,
            Err(err) => {
                warn!("qa_unreadable_ir: file={} error={err}", path.display());
                summary.failed_json += 1;
                continue;
            }
        };
        summary.files_total += 1;
        let row = qa_one(path, &ir);

        summary.parts += row.parts;
        summary.measures += row.measures;
        summary.notes += row.notes;
        summary.lyrics += row.lyrics;
        summary.empty_lyrics += row.empty_lyrics;
        summary.dangling_lyrics += row.dangling_lyrics;
        summary.syllabic.add(&row.syllabic);
        if row.has_lyrics {
            summary.files_with_lyrics += 1;
        }
        rows.push(row);
    }

    info!(
        "qa_done: files={} with_lyrics={} dangling={} failed_json={} error_sidecars={}",
        summary.files_total,
        summary.files_with_lyrics,
        summary.dangling_lyrics,
        summary.failed_json,
        summary.error_txt_files
    );
    Ok((summary, rows))
}

fn collect_cache_files(
    dir: &Path,
    json: &mut Vec<PathBuf>,
    sidecars: &mut usize,
) -> Result<()> {
    for entry in fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_cache_files(&path, json, sidecars)?;
            continue;
        }
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
        let Some(name) = name else { continue };
        if name.ends_with(".error.txt") {
            *sidecars += 1;
        } else if name.ends_with(".json") {
            json.push(path);
        }
    }
    Ok(())
}

fn qa_one(path: &Path, ir: &ScoreIR) -> IrFileRow {
    let work_id = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let note_ids = ir.note_ids();
    let mut syllabic = SyllabicCounts::default();
    let mut lyrics = 0usize;
    let mut empty_lyrics = 0usize;
    let mut dangling_lyrics = 0usize;

    for token in ir.tokens() {
        lyrics += 1;
        syllabic.bump(token.syllabic);
        if token.text.trim().is_empty() {
            empty_lyrics += 1;
        }
        if !note_ids.contains(token.note_id.as_str()) {
            dangling_lyrics += 1;
            warn!(
                "qa_dangling_lyric: file={} note_id={} text={:?}",
                path.display(),
                token.note_id,
                token.text
            );
        }
    }

    IrFileRow {
        work_id,
        has_lyrics: ir.has_lyrics,
        parts: ir.parts.len(),
        measures: ir.parts.iter().map(|p| p.measures.len()).sum(),
        notes: ir
            .parts
            .iter()
            .flat_map(|p| p.measures.iter())
            .map(|m| m.notes.len())
            .sum(),
        lyrics,
        empty_lyrics,
        dangling_lyrics,
        syllabic,
    }
}

/// Write the per-file QA rows as a CSV report.
pub fn write_qa_csv(path: &Path, rows: &[IrFileRow]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record([
        "work_id",
        "has_lyrics",
        "parts",
        "measures",
        "notes",
        "lyrics",
        "empty_lyrics",
        "dangling_lyrics",
        "single",
        "begin",
        "middle",
        "end",
    ])?;
    for row in rows {
        writer.write_record([
            row.work_id.clone(),
            (row.has_lyrics as u8).to_string(),
            row.parts.to_string(),
            row.measures.to_string(),
            row.notes.to_string(),
            row.lyrics.to_string(),
            row.empty_lyrics.to_string(),
            row.dangling_lyrics.to_string(),
            row.syllabic.single.to_string(),
            row.syllabic.begin.to_string(),
            row.syllabic.middle.to_string(),
            row.syllabic.end.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}
