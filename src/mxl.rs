//! Compressed MusicXML (.mxl) input.
//!
//! An .mxl file is a ZIP archive whose `META-INF/container.xml` names
//! the root MusicXML document. Archives without a container fall back
//! to the first non-META-INF `.xml`/`.musicxml` member.

use std::io::{Cursor, Read};

use zip::ZipArchive;

use crate::error::{Error, Result};
use crate::model::Score;
use crate::parser;

/// Parse a .mxl archive from raw bytes.
pub fn parse_mxl(data: &[u8]) -> Result<Score> {
    let xml = extract_musicxml_from_mxl(data)?;
    parser::parse_musicxml(&xml)
}

/// Extract the root MusicXML document from .mxl bytes.
pub fn extract_musicxml_from_mxl(data: &[u8]) -> Result<String> {
    let cursor = Cursor::new(data);
    let mut archive = ZipArchive::new(cursor)
        .map_err(|e| Error::parse(format!("Failed to open MXL archive: {e}")))?;

    let root_path = locate_root_file(&mut archive)?;

    let mut root_file = archive
        .by_name(&root_path)
        .map_err(|e| Error::parse(format!("Root file '{root_path}' not found in archive: {e}")))?;

    let mut xml = String::new();
    root_file
        .read_to_string(&mut xml)
        .map_err(|e| Error::parse(format!("Failed to read '{root_path}': {e}")))?;

    Ok(xml)
}

/// The archive member holding the score: the container's declared
/// rootfile when present, otherwise the first plausible member.
fn locate_root_file(archive: &mut ZipArchive<Cursor<&[u8]>>) -> Result<String> {
    let container_xml = {
        match archive.by_name("META-INF/container.xml") {
            Ok(mut container_file) => {
                let mut xml = String::new();
                container_file
                    .read_to_string(&mut xml)
                    .map_err(|e| Error::parse(format!("Failed to read container.xml: {e}")))?;
                Some(xml)
            }
            Err(_) => None,
        }
    }; // mutable borrow of archive ends here

    if let Some(xml) = container_xml {
        let doc = roxmltree::Document::parse(&xml)
            .map_err(|e| Error::parse(format!("Failed to parse container.xml: {e}")))?;
        for node in doc.descendants() {
            if node.tag_name().name() == "rootfile" {
                if let Some(path) = node.attribute("full-path") {
                    return Ok(path.to_string());
                }
            }
        }
        return Err(Error::parse("No rootfile found in container.xml"));
    }

    let names: Vec<String> = (0..archive.len())
        .filter_map(|i| archive.by_index(i).ok().map(|f| f.name().to_string()))
        .collect();
    for name in &names {
        if !name.starts_with("META-INF/") && (name.ends_with(".xml") || name.ends_with(".musicxml"))
        {
            return Ok(name.clone());
        }
    }

    Err(Error::parse(format!(
        "No MusicXML file found in archive. Files: {names:?}"
    )))
}
