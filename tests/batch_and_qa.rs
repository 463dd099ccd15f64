//! Batch extraction over a small on-disk corpus, then QA over the
//! resulting IR cache: filtering, incremental reruns, failure sidecars
//! and dangling-reference detection.

use std::fs;
use std::path::Path;

use pretty_assertions::assert_eq;

use lyricset::backend::MusicXmlBackend;
use lyricset::extract::{extract_batch, ExtractOptions};
use lyricset::ir::ScoreIR;
use lyricset::qa::{qa_ir_dir, write_qa_csv};

const SUNG: &str = r#"<score-partwise>
  <part-list><score-part id="P1"><part-name>Voice</part-name></score-part></part-list>
  <part id="P1"><measure number="1">
    <attributes><divisions>1</divisions></attributes>
    <note><pitch><step>C</step><octave>4</octave></pitch><duration>1</duration>
      <lyric number="1"><syllabic>single</syllabic><text>la</text></lyric>
    </note>
  </measure></part>
</score-partwise>"#;

const INSTRUMENTAL: &str = r#"<score-partwise>
  <part-list><score-part id="P1"/></part-list>
  <part id="P1"><measure number="1">
    <note><pitch><step>D</step><octave>4</octave></pitch><duration>1</duration></note>
  </measure></part>
</score-partwise>"#;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn seed_corpus(dir: &Path) {
    init_logging();
    fs::write(dir.join("sung.musicxml"), SUNG).unwrap();
    fs::write(dir.join("instrumental.musicxml"), INSTRUMENTAL).unwrap();
    // Contains the lyric marker but is not well-formed XML.
    fs::write(dir.join("broken.musicxml"), "<score-partwise><lyric").unwrap();
    // Unsupported extension, never picked up.
    fs::write(dir.join("notes.txt"), "<lyric>").unwrap();
}

#[test]
fn lyrics_filter_selects_only_marked_files() {
    let root = tempfile::tempdir().unwrap();
    let input = root.path().join("in");
    let out = root.path().join("ir");
    fs::create_dir_all(&input).unwrap();
    seed_corpus(&input);

    let mut opts = ExtractOptions::new(&input, &out);
    opts.lyrics_only = true;
    let summary = extract_batch(&MusicXmlBackend, &opts).unwrap();

    // sung + broken carry the marker; instrumental is filtered out.
    assert_eq!(summary.total, 2);
    assert_eq!(summary.written, 1);
    assert_eq!(summary.failed, 1);
    assert!(out.join("sung.json").exists());
    assert!(!out.join("instrumental.json").exists());

    // The failure leaves a sidecar, never an IR file.
    assert!(out.join("broken.error.txt").exists());
    assert!(!out.join("broken.json").exists());
}

#[test]
fn rerun_skips_up_to_date_outputs() {
    let root = tempfile::tempdir().unwrap();
    let input = root.path().join("in");
    let out = root.path().join("ir");
    fs::create_dir_all(&input).unwrap();
    fs::write(input.join("sung.musicxml"), SUNG).unwrap();

    let opts = ExtractOptions::new(&input, &out);
    let first = extract_batch(&MusicXmlBackend, &opts).unwrap();
    assert_eq!((first.written, first.skipped), (1, 0));

    let second = extract_batch(&MusicXmlBackend, &opts).unwrap();
    assert_eq!((second.written, second.skipped), (0, 1));

    // Touching the source invalidates the cache. The pause keeps the
    // new source mtime strictly ahead on coarse-granularity filesystems.
    std::thread::sleep(std::time::Duration::from_millis(50));
    fs::write(input.join("sung.musicxml"), SUNG).unwrap();
    let third = extract_batch(&MusicXmlBackend, &opts).unwrap();
    assert_eq!((third.written, third.skipped), (1, 0));
}

#[test]
fn parallel_and_sequential_runs_write_identical_caches() {
    let root = tempfile::tempdir().unwrap();
    let input = root.path().join("in");
    fs::create_dir_all(&input).unwrap();
    for n in 0..6 {
        fs::write(input.join(format!("s{n}.musicxml")), SUNG).unwrap();
    }

    let seq_out = root.path().join("seq");
    let par_out = root.path().join("par");
    let mut opts = ExtractOptions::new(&input, &seq_out);
    opts.skip_up_to_date = false;
    extract_batch(&MusicXmlBackend, &opts).unwrap();
    opts.out_dir = par_out.clone();
    opts.jobs = 4;
    let summary = extract_batch(&MusicXmlBackend, &opts).unwrap();
    assert_eq!(summary.written, 6);

    for n in 0..6 {
        let name = format!("s{n}.json");
        assert_eq!(
            fs::read_to_string(seq_out.join(&name)).unwrap(),
            fs::read_to_string(par_out.join(&name)).unwrap()
        );
    }
}

#[test]
fn qa_reports_corpus_health_and_dangling_references() {
    let root = tempfile::tempdir().unwrap();
    let input = root.path().join("in");
    let out = root.path().join("ir");
    fs::create_dir_all(&input).unwrap();
    seed_corpus(&input);

    let opts = ExtractOptions::new(&input, &out);
    extract_batch(&MusicXmlBackend, &opts).unwrap();

    let (clean, rows) = qa_ir_dir(&out).unwrap();
    assert_eq!(clean.files_total, 2);
    assert_eq!(clean.files_with_lyrics, 1);
    assert_eq!(clean.dangling_lyrics, 0);
    assert_eq!(clean.error_txt_files, 1);
    assert_eq!(clean.syllabic.single, 1);

    // Corrupt one reference: exactly one dangling token must surface.
    let ir_path = out.join("sung.json");
    let mut ir = ScoreIR::read_json(&ir_path).unwrap();
    ir.parts[0].measures[0].lyrics[0].note_id = "p9_n99".to_string();
    ir.write_json(&ir_path).unwrap();

    let (dirty, rows2) = qa_ir_dir(&out).unwrap();
    assert_eq!(dirty.dangling_lyrics, 1);
    assert_eq!(
        rows2.iter().filter(|r| r.dangling_lyrics > 0).count(),
        1
    );

    // Truncated cache files count as failed_json, not as rows.
    fs::write(out.join("sung.json"), "{").unwrap();
    let (broken, rows3) = qa_ir_dir(&out).unwrap();
    assert_eq!(broken.failed_json, 1);
    // An unreadable cache no longer counts as a loaded file.
    assert_eq!(broken.files_total, 1);
    assert_eq!(rows3.len(), rows.len() - 1);

    let report = root.path().join("qa.csv");
    write_qa_csv(&report, &rows).unwrap();
    let text = fs::read_to_string(&report).unwrap();
    assert_eq!(text.lines().count(), 1 + rows.len());
}
