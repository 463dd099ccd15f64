//! Vector-layout scanning — locates lyric-tagged shapes and text in a
//! rendered SVG document.
//!
//! The vector renderer tags lyric glyphs with a class containing
//! "lyric". Rect nodes carry geometry and no text; text nodes carry
//! text and intentionally zero-size geometry, so a text candidate is
//! never confused with a real zero-area rectangle.

use std::fs;
use std::path::Path;

use roxmltree::{Document, Node};

use crate::error::{Error, Result};

const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

/// A bounding-box candidate not yet attributed to any syllable.
#[derive(Debug, Clone, PartialEq)]
pub struct BBoxCandidate {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
    /// Concatenated text content; `None` for shape nodes
    pub text: Option<String>,
    /// Source element id (`xml:id`, falling back to `id`)
    pub element_id: Option<String>,
}

/// Scan an SVG document for lyric candidates, in document order.
///
/// Malformed markup fails with `Error::LayoutParse`; callers treat that
/// as "zero candidates" rather than fatal.
pub fn extract_lyric_bboxes(svg_path: &Path) -> Result<Vec<BBoxCandidate>> {
    let xml = fs::read_to_string(svg_path).map_err(|e| Error::LayoutParse {
        path: svg_path.to_path_buf(),
        message: e.to_string(),
    })?;
    let options = roxmltree::ParsingOptions {
        allow_dtd: true,
        ..Default::default()
    };
    let doc = Document::parse_with_options(&xml, options).map_err(|e| Error::LayoutParse {
        path: svg_path.to_path_buf(),
        message: e.to_string(),
    })?;

    let mut out = Vec::new();
    for node in doc.descendants().filter(|n| n.is_element()) {
        if !has_lyric_class(&node) {
            continue;
        }
        match node.tag_name().name() {
            "rect" => out.push(BBoxCandidate {
                x: attr_f64(&node, "x"),
                y: attr_f64(&node, "y"),
                w: attr_f64(&node, "width"),
                h: attr_f64(&node, "height"),
                text: None,
                element_id: element_id(&node),
            }),
            "text" => {
                let text = collect_text(&node);
                out.push(BBoxCandidate {
                    x: attr_f64(&node, "x"),
                    y: attr_f64(&node, "y"),
                    // Text nodes carry no box geometry.
                    w: 0.0,
                    h: 0.0,
                    text: if text.is_empty() { None } else { Some(text) },
                    element_id: element_id(&node),
                });
            }
            _ => {}
        }
    }
    Ok(out)
}

fn has_lyric_class(node: &Node) -> bool {
    node.attribute("class")
        .is_some_and(|c| c.to_ascii_lowercase().contains("lyric"))
}

fn attr_f64(node: &Node, name: &str) -> f64 {
    node.attribute(name)
        .and_then(|v| v.trim().parse::<f64>().ok())
        .unwrap_or(0.0)
}

fn element_id(node: &Node) -> Option<String> {
    node.attribute((XML_NS, "id"))
        .or_else(|| node.attribute("id"))
        .map(String::from)
}

fn collect_text(node: &Node) -> String {
    let mut text = String::new();
    for desc in node.descendants() {
        if desc.is_text() {
            if let Some(t) = desc.text() {
                text.push_str(t);
            }
        }
    }
    text.trim().to_string()
}
