//! Render orchestration — invokes the two external renderers and
//! manages idempotent re-use of their outputs.
//!
//! Both tools are opaque subprocesses: a rasterizer producing one PNG
//! per page and a vector-layout renderer producing one SVG. Each
//! invocation is synchronous with its calling worker and bounded only
//! by the tool's own exit; failures surface captured stdout/stderr and
//! are never retried.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::SystemTime;

use log::info;

use crate::error::{Error, Result};

/// Render a score to page image(s): `<tool> -s [-T trim] -r <dpi> -o <out.png> <in>`.
///
/// Returns the produced files — either the exact output path or the
/// numbered multi-page series `<stem>-<n>.png`.
pub fn rasterize_pages(
    tool: &Path,
    input: &Path,
    out_png: &Path,
    dpi: u32,
    trim_px: u32,
) -> Result<Vec<PathBuf>> {
    if let Some(parent) = out_png.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut cmd = Command::new(tool);
    cmd.arg("-s");
    if trim_px > 0 {
        // Optional: not all rasterizer versions support -T
        cmd.arg("-T").arg(trim_px.to_string());
    }
    cmd.arg("-r")
        .arg(dpi.to_string())
        .arg("-o")
        .arg(out_png)
        .arg(input);

    run_tool(cmd, "rasterizer")?;
    let produced = produced_outputs(out_png);
    if produced.is_empty() {
        return Err(Error::RenderTool {
            tool: "rasterizer".to_string(),
            message: format!("no output produced, expected '{}'", out_png.display()),
        });
    }
    info!(
        "rasterize_ok: input={} pages={}",
        input.display(),
        produced.len()
    );
    Ok(produced)
}

/// Render a score to a vector layout:
/// `<tool> [-a] -f musicxml --scale <n> <in> -o <out.svg>`.
pub fn render_layout(
    tool: &Path,
    input: &Path,
    out_svg: &Path,
    all_pages: bool,
    scale: u32,
) -> Result<Vec<PathBuf>> {
    if let Some(parent) = out_svg.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut cmd = Command::new(tool);
    if all_pages {
        cmd.arg("-a");
    }
    cmd.arg("-f")
        .arg("musicxml")
        .arg("--scale")
        .arg(scale.to_string())
        .arg(input)
        .arg("-o")
        .arg(out_svg);

    run_tool(cmd, "vector renderer")?;
    let produced = produced_outputs(out_svg);
    if produced.is_empty() {
        return Err(Error::RenderTool {
            tool: "vector renderer".to_string(),
            message: format!("no output produced, expected '{}'", out_svg.display()),
        });
    }
    info!(
        "layout_render_ok: input={} files={}",
        input.display(),
        produced.len()
    );
    Ok(produced)
}

/// Run an external tool, mapping a missing binary or non-zero exit to
/// `Error::RenderTool` with captured stdout/stderr.
fn run_tool(mut cmd: Command, tool_name: &str) -> Result<()> {
    let output = cmd.output().map_err(|e| Error::RenderTool {
        tool: tool_name.to_string(),
        message: format!("failed to launch: {e}"),
    })?;
    if !output.status.success() {
        return Err(Error::RenderTool {
            tool: tool_name.to_string(),
            message: format!(
                "exit {:?}.\nSTDOUT:\n{}\nSTDERR:\n{}",
                output.status.code(),
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            ),
        });
    }
    Ok(())
}

/// The exact expected output if present, else the numbered variants.
fn produced_outputs(expected: &Path) -> Vec<PathBuf> {
    if expected.exists() {
        return vec![expected.to_path_buf()];
    }
    numbered_variants(expected)
}

/// Pre-existing page images for a score: the exact expected path plus
/// any numbered variants, in page order.
pub fn find_existing_pages(expected: &Path) -> Vec<PathBuf> {
    let mut pages = Vec::new();
    if expected.exists() {
        pages.push(expected.to_path_buf());
    }
    pages.extend(numbered_variants(expected));
    pages
}

/// All `<stem>-<n>.<ext>` siblings of `expected`, ordered by page number.
fn numbered_variants(expected: &Path) -> Vec<PathBuf> {
    let Some(dir) = expected.parent() else {
        return Vec::new();
    };
    let Some(stem) = expected.file_stem().and_then(|s| s.to_str()) else {
        return Vec::new();
    };
    let ext = expected
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_string();
    let prefix = format!("{stem}-");
    let suffix = format!(".{ext}");

    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut variants: Vec<(u32, PathBuf)> = entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            let middle = name.strip_prefix(&prefix)?.strip_suffix(&suffix)?;
            let page: u32 = middle.parse().ok()?;
            Some((page, entry.path()))
        })
        .collect();
    variants.sort();
    variants.into_iter().map(|(_, p)| p).collect()
}

/// True when every page is at least as new as the source document.
pub fn pages_up_to_date(pages: &[PathBuf], source: &Path) -> bool {
    if pages.is_empty() {
        return false;
    }
    let Some(src_mtime) = mtime(source) else {
        return false;
    };
    pages
        .iter()
        .all(|p| mtime(p).is_some_and(|m| m >= src_mtime))
}

fn mtime(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).ok()?.modified().ok()
}
