//! lyricset — builds lyric-detection datasets from engraved music scores.
//!
//! The pipeline: parse MusicXML (.musicxml/.xml) or compressed MXL
//! (.mxl) documents, normalize them to a canonical score IR with stable
//! note ids, rasterize pages and render vector layouts through external
//! tools, align lyric syllables to layout bounding boxes, and emit a
//! COCO-style detection dataset plus corpus QA reports.
//!
//! # Example
//! ```no_run
//! use lyricset::backend::MusicXmlBackend;
//! use lyricset::extract::{extract_batch, ExtractOptions};
//!
//! let backend = MusicXmlBackend;
//! let mut opts = ExtractOptions::new("corpus/", "ir/");
//! opts.jobs = 4;
//! opts.lyrics_only = true;
//! let summary = extract_batch(&backend, &opts).unwrap();
//! println!("written: {}, failed: {}", summary.written, summary.failed);
//! ```

pub mod align;
pub mod backend;
pub mod dataset;
pub mod error;
pub mod extract;
pub mod ir;
pub mod layout;
pub mod model;
pub mod mxl;
pub mod parser;
pub mod qa;
pub mod render;

use std::path::Path;

pub use backend::{MusicXmlBackend, ScoreBackend};
pub use error::{Error, Result};
pub use ir::ScoreIR;
pub use model::Score;
pub use mxl::parse_mxl;
pub use parser::parse_musicxml;

/// Parse a score document from a file path.
/// Format is detected from the file extension:
/// - `.musicxml` or `.xml` → uncompressed MusicXML
/// - `.mxl` → compressed MXL (ZIP archive)
/// - anything else → auto-detect from the content
pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Score> {
    let path = path.as_ref();
    let data = std::fs::read(path)
        .map_err(|e| Error::parse(format!("Failed to read file '{}': {e}", path.display())))?;
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    parse_bytes(&data, ext.as_deref())
}

/// Parse a score document from raw bytes with an optional format hint.
pub fn parse_bytes(data: &[u8], extension: Option<&str>) -> Result<Score> {
    MusicXmlBackend.parse(data, extension)
}
