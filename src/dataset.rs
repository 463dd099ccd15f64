//! Detection-dataset assembly.
//!
//! Consumes IR tokens, rendered pages and layout bbox candidates for a
//! corpus of scores and emits one detection dataset: a COCO-style JSON
//! (`images`/`annotations`/`categories`) plus two linking manifests,
//! `pages.csv` and `links.csv`.
//!
//! Rasterization fans out across a bounded worker-thread pool (the work
//! is external-process wait); everything downstream of it — IR
//! extraction, vector render, alignment, record emission — runs in the
//! submitting context as each result completes, so the running tallies
//! are only ever touched from one thread and no lock is needed.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::backend::ScoreBackend;
use crate::error::Result;
use crate::extract::{self, discover_score_files};
use crate::ir::Syllabic;
use crate::layout::{self, BBoxCandidate};
use crate::{align, render};

pub const CATEGORY_SYLLABLE: u32 = 1;
pub const CATEGORY_TEXT_LINE: u32 = 2;

/// An image entry of the detection dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionImage {
    pub id: u32,
    /// Path relative to the dataset image root (absolute only when
    /// relativization fails)
    pub file_name: String,
    pub width: u32,
    pub height: u32,
}

/// An annotation entry of the detection dataset.
///
/// `bbox` is `None` when alignment found no location for the syllable —
/// an explicit absence marker, serialized as `null`, so it can never be
/// mistaken for a legitimately zero-sized box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionAnnotation {
    pub id: u32,
    pub image_id: u32,
    pub category_id: u32,
    pub bbox: Option<[f64; 4]>,
    #[serde(default)]
    pub iscrowd: u32,
    pub text: Option<String>,
    pub syllabic: Option<Syllabic>,
    /// Link to the note event in the cached IR
    pub note_id: Option<String>,
    /// Source element id from the vector layout, when matched
    pub source_element_id: Option<String>,
}

/// A category entry of the detection dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionCategory {
    pub id: u32,
    pub name: String,
    pub supercategory: String,
}

/// The static category table for lyric detection.
pub fn default_categories() -> Vec<DetectionCategory> {
    vec![
        DetectionCategory {
            id: CATEGORY_SYLLABLE,
            name: "syllable".to_string(),
            supercategory: "lyrics".to_string(),
        },
        DetectionCategory {
            id: CATEGORY_TEXT_LINE,
            name: "text_line".to_string(),
            supercategory: "lyrics".to_string(),
        },
    ]
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DetectionDataset {
    pub images: Vec<DetectionImage>,
    pub annotations: Vec<DetectionAnnotation>,
    pub categories: Vec<DetectionCategory>,
}

/// Write the dataset JSON with stable 2-space indentation.
pub fn write_detection_json(path: &Path, dataset: &DetectionDataset) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(dataset)?)?;
    Ok(())
}

// ─── Assembly pipeline ──────────────────────────────────────────────

/// Options for one dataset assembly run.
#[derive(Debug, Clone)]
pub struct DatasetOptions {
    pub input_dir: PathBuf,
    /// Root directory for page images; manifest paths are relative to it
    pub out_images: PathBuf,
    /// Directory for the dataset JSON, manifests and SVG layouts
    pub out_ann_dir: PathBuf,
    /// Rasterizer binary; `None` means only pre-existing pages are used
    pub rasterizer: Option<PathBuf>,
    /// Vector-layout renderer binary; `None` disables bbox extraction
    pub layout_renderer: Option<PathBuf>,
    pub dpi: u32,
    pub layout_scale: u32,
    pub jobs: usize,
    /// Reuse page images that are not older than their source
    pub skip_existing: bool,
}

impl DatasetOptions {
    pub fn new(
        input_dir: impl Into<PathBuf>,
        out_images: impl Into<PathBuf>,
        out_ann_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            input_dir: input_dir.into(),
            out_images: out_images.into(),
            out_ann_dir: out_ann_dir.into(),
            rasterizer: None,
            layout_renderer: None,
            dpi: 300,
            layout_scale: 40,
            jobs: 1,
            skip_existing: true,
        }
    }
}

/// Running tallies, mutated only from the submitting context.
struct AssemblyState {
    next_image_id: u32,
    next_ann_id: u32,
    images: Vec<DetectionImage>,
    annotations: Vec<DetectionAnnotation>,
    pages_csv: csv::Writer<fs::File>,
    links_csv: csv::Writer<fs::File>,
}

/// Build the detection dataset for every score under `input_dir`.
///
/// Returns the paths of the dataset JSON and the pages manifest.
pub fn build_dataset(
    backend: &dyn ScoreBackend,
    opts: &DatasetOptions,
) -> Result<(PathBuf, PathBuf)> {
    fs::create_dir_all(&opts.out_images)?;
    fs::create_dir_all(&opts.out_ann_dir)?;
    let coco_path = opts.out_ann_dir.join("coco_lyrics.json");
    let pages_path = opts.out_ann_dir.join("pages.csv");
    let links_path = opts.out_ann_dir.join("links.csv");

    let files = discover_score_files(&opts.input_dir);
    info!(
        "render_start: files={} jobs={} skip_existing={} rasterizer={} layout={}",
        files.len(),
        opts.jobs,
        opts.skip_existing,
        opts.rasterizer.is_some(),
        opts.layout_renderer.is_some()
    );
    if files.is_empty() {
        warn!("render_no_candidates: dir={}", opts.input_dir.display());
    }

    let mut pages_csv = csv::Writer::from_path(&pages_path)?;
    pages_csv.write_record([
        "page_id",
        "work_id",
        "image_path",
        "width",
        "height",
        "has_lyrics",
        "n_syllables",
    ])?;
    let mut links_csv = csv::Writer::from_path(&links_path)?;
    links_csv.write_record(["annotation_id", "note_id"])?;

    let mut state = AssemblyState {
        next_image_id: 1,
        next_ann_id: 1,
        images: Vec::new(),
        annotations: Vec::new(),
        pages_csv,
        links_csv,
    };

    // Scores whose pages can be reused are processed immediately; the
    // rest queue for the rasterizer pool.
    let mut queued: Vec<(PathBuf, PathBuf)> = Vec::new();
    for xml in &files {
        let stem = file_stem(xml);
        let out_png = opts.out_images.join(format!("{stem}.png"));
        let existing = render::find_existing_pages(&out_png);

        if opts.rasterizer.is_none() {
            // Never fail solely for a missing renderer: proceed with
            // whatever pages already exist.
            if existing.is_empty() {
                warn!("no_renderer_and_no_pages: file={}", xml.display());
            } else {
                info!(
                    "use_existing_pages: file={} pages={}",
                    xml.display(),
                    existing.len()
                );
                assemble_score(backend, opts, &mut state, xml, &existing);
            }
            continue;
        }

        if opts.skip_existing && !existing.is_empty() && render::pages_up_to_date(&existing, xml) {
            info!(
                "skip_existing: file={} pages={}",
                xml.display(),
                existing.len()
            );
            assemble_score(backend, opts, &mut state, xml, &existing);
            continue;
        }

        queued.push((xml.clone(), out_png));
    }

    if let Some(tool) = opts.rasterizer.as_deref() {
        if !queued.is_empty() {
            run_raster_pool(backend, opts, &mut state, tool, queued);
        }
    }

    write_detection_json(
        &coco_path,
        &DetectionDataset {
            images: std::mem::take(&mut state.images),
            annotations: std::mem::take(&mut state.annotations),
            categories: default_categories(),
        },
    )?;
    state.pages_csv.flush()?;
    state.links_csv.flush()?;

    info!(
        "render_done: images={} annotations={}",
        state.next_image_id - 1,
        state.next_ann_id - 1
    );
    Ok((coco_path, pages_path))
}

/// Fan rasterization out across a bounded thread pool and fold each
/// completed result back in on this thread.
fn run_raster_pool(
    backend: &dyn ScoreBackend,
    opts: &DatasetOptions,
    state: &mut AssemblyState,
    tool: &Path,
    queued: Vec<(PathBuf, PathBuf)>,
) {
    let workers = opts.jobs.max(1).min(queued.len());
    let (job_tx, job_rx) = mpsc::channel::<(PathBuf, PathBuf)>();
    let job_rx = Arc::new(Mutex::new(job_rx));
    let (res_tx, res_rx) = mpsc::channel();

    for job in queued {
        // Receiver outlives this loop; send cannot fail here.
        let _ = job_tx.send(job);
    }
    drop(job_tx);

    thread::scope(|s| {
        for _ in 0..workers {
            let job_rx = Arc::clone(&job_rx);
            let res_tx = res_tx.clone();
            s.spawn(move || loop {
                let job = {
                    let Ok(rx) = job_rx.lock() else { break };
                    rx.recv()
                };
                let Ok((xml, out_png)) = job else { break };
                let result = render::rasterize_pages(tool, &xml, &out_png, opts.dpi, 0);
                if res_tx.send((xml, out_png, result)).is_err() {
                    break;
                }
            });
        }
        drop(res_tx);

        for (xml, out_png, result) in res_rx.iter() {
            let pages = match result {
                Ok(pages) => pages,
                Err(err) => {
                    error!("rasterize_failed: file={} error={err}", xml.display());
                    // Partial-result recovery: the tool may still have
                    // left usable page files behind.
                    render::find_existing_pages(&out_png)
                }
            };
            if pages.is_empty() {
                warn!("no_pages: file={}", xml.display());
                continue;
            }
            assemble_score(backend, opts, state, &xml, &pages);
        }
    });
}

/// Full post-rasterization processing of one score. Per-score failures
/// are logged and skipped; nothing escapes the batch loop.
fn assemble_score(
    backend: &dyn ScoreBackend,
    opts: &DatasetOptions,
    state: &mut AssemblyState,
    xml: &Path,
    pages: &[PathBuf],
) {
    if let Err(err) = try_assemble_score(backend, opts, state, xml, pages) {
        error!("assemble_failed: file={} error={err}", xml.display());
    }
}

fn try_assemble_score(
    backend: &dyn ScoreBackend,
    opts: &DatasetOptions,
    state: &mut AssemblyState,
    xml: &Path,
    pages: &[PathBuf],
) -> Result<()> {
    let stem = file_stem(xml);
    let ir = extract::extract_file(backend, xml)?;
    let tokens = ir.tokens();

    let candidates = collect_candidates(opts, xml, &stem);
    let matched = align::align(&tokens, &candidates);

    // The same alignment is reused on every page of a multi-page score;
    // candidates carry no page attribution. Flag it rather than let it
    // pass silently.
    if pages.len() > 1 && matched.iter().any(Option::is_some) {
        warn!(
            "alignment_replicated_across_pages: file={} pages={}",
            xml.display(),
            pages.len()
        );
    }

    for (page_idx, png) in pages.iter().enumerate() {
        let page_no = page_idx + 1;
        let (width, height) = match image::image_dimensions(png) {
            Ok(dims) => dims,
            Err(err) => {
                warn!("read_page_failed: file={} error={err}", png.display());
                continue;
            }
        };

        let image_id = state.next_image_id;
        state.next_image_id += 1;
        let image_path = rel_or_abs(png, &opts.out_images);
        state.images.push(DetectionImage {
            id: image_id,
            file_name: image_path.clone(),
            width,
            height,
        });

        let mut n_syllables = 0usize;
        for (k, token) in tokens.iter().enumerate() {
            let cand: Option<&BBoxCandidate> = matched[k].map(|i| &candidates[i]);
            let ann_id = state.next_ann_id;
            state.next_ann_id += 1;
            state.annotations.push(DetectionAnnotation {
                id: ann_id,
                image_id,
                category_id: CATEGORY_SYLLABLE,
                bbox: cand.map(|c| [c.x, c.y, c.w, c.h]),
                iscrowd: 0,
                text: Some(token.text.clone()),
                syllabic: Some(token.syllabic),
                note_id: Some(token.note_id.clone()),
                source_element_id: cand.and_then(|c| c.element_id.clone()),
            });
            state
                .links_csv
                .write_record([ann_id.to_string(), token.note_id.clone()])?;
            n_syllables += 1;
        }

        state.pages_csv.write_record([
            format!("{stem}_p{page_no:03}"),
            stem.clone(),
            image_path,
            width.to_string(),
            height.to_string(),
            (ir.has_lyrics as u8).to_string(),
            n_syllables.to_string(),
        ])?;
    }

    info!("score_done: file={} pages={}", xml.display(), pages.len());
    Ok(())
}

/// Vector render + bbox extraction, degrading every failure to zero
/// candidates.
fn collect_candidates(opts: &DatasetOptions, xml: &Path, stem: &str) -> Vec<BBoxCandidate> {
    let Some(tool) = opts.layout_renderer.as_deref() else {
        return Vec::new();
    };
    let out_svg = opts.out_ann_dir.join(format!("{stem}.svg"));
    let svgs = match render::render_layout(tool, xml, &out_svg, false, opts.layout_scale) {
        Ok(svgs) => svgs,
        Err(err) => {
            warn!("layout_render_failed: file={} error={err}", xml.display());
            return Vec::new();
        }
    };

    let mut candidates = Vec::new();
    for svg in svgs {
        match layout::extract_lyric_bboxes(&svg) {
            Ok(mut boxes) => candidates.append(&mut boxes),
            Err(err) => warn!("layout_parse_failed: file={} error={err}", svg.display()),
        }
    }
    candidates
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Relative to `base` when possible, absolute otherwise.
fn rel_or_abs(path: &Path, base: &Path) -> String {
    match path.strip_prefix(base) {
        Ok(rel) => rel.to_string_lossy().into_owned(),
        Err(_) => path.to_string_lossy().into_owned(),
    }
}
