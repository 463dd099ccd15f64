//! Score-parsing capability interface.
//!
//! The extraction pipeline consumes notation parsing only through this
//! trait, so any compliant backend can be substituted (a different
//! interchange format, a test double, ...). The default backend handles
//! uncompressed MusicXML and compressed MXL.

use crate::error::{Error, Result};
use crate::model::Score;
use crate::{mxl, parser};

/// Capability interface for notation parsing and analysis.
///
/// `Sync` is required so a shared backend reference can be handed to the
/// batch extraction worker pool.
pub trait ScoreBackend: Sync {
    /// Parse raw document bytes into a score tree.
    /// `extension` is a lowercase format hint; `None` means auto-detect.
    fn parse(&self, data: &[u8], extension: Option<&str>) -> Result<Score>;

    /// Best-effort key analysis, as fifths on the circle of fifths.
    /// `None` when the score carries no usable key information.
    fn analyze_key(&self, score: &Score) -> Option<i32>;
}

/// Default backend: MusicXML (.musicxml/.xml) and MXL (.mxl).
#[derive(Debug, Default)]
pub struct MusicXmlBackend;

impl ScoreBackend for MusicXmlBackend {
    fn parse(&self, data: &[u8], extension: Option<&str>) -> Result<Score> {
        match extension {
            Some(ext) if ext.eq_ignore_ascii_case("mxl") => mxl::parse_mxl(data),
            Some(ext)
                if ext.eq_ignore_ascii_case("musicxml") || ext.eq_ignore_ascii_case("xml") =>
            {
                let xml = std::str::from_utf8(data)
                    .map_err(|e| Error::parse(format!("Invalid UTF-8 in MusicXML file: {e}")))?;
                parser::parse_musicxml(xml)
            }
            _ => {
                // Auto-detect: try as XML first, then as MXL (ZIP)
                if let Ok(xml) = std::str::from_utf8(data) {
                    let head = xml.trim_start();
                    if head.starts_with("<?xml") || head.starts_with('<') {
                        return parser::parse_musicxml(xml);
                    }
                }
                mxl::parse_mxl(data)
            }
        }
    }

    fn analyze_key(&self, score: &Score) -> Option<i32> {
        // The first declared key signature. A pitch-histogram estimate
        // for unsigned scores is left to specialized backends.
        score.first_key().map(|k| k.fifths)
    }
}
