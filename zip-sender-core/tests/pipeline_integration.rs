use std::fs::{self, File};
use std::path::Path;

use tempfile::tempdir;
use zip_sender_core::archive::CompressionMode;
use zip_sender_core::error::PipelineError;
use zip_sender_core::pipeline::{process_input, FolderOutcome, PipelineConfig};
use zip_sender_core::progress::Progress;

fn write_file(path: &Path, size: usize) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, vec![b'x'; size]).unwrap();
}

fn zip_names(path: &Path) -> Vec<String> {
    let archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
    let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
    names.sort();
    names
}

fn config(root: &Path, max_bin_size: u64, threads: usize) -> PipelineConfig {
    PipelineConfig {
        input_dir: root.join("input"),
        output_dir: root.join("output"),
        max_bin_size,
        threads,
        compression: CompressionMode::Stored,
    }
}

fn staging_dirs(folder: &Path) -> Vec<String> {
    fs::read_dir(folder)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with("temp_folder_"))
        .collect()
}

/// Sizes: a=60, b=50, c=30, cover=10 with a 100-byte cap gives [a] and [b, c, cover].
fn comics_fixture(root: &Path) {
    let src = root.join("input/Comics");
    write_file(&src.join("vol1/a.bin"), 60);
    write_file(&src.join("vol1/b.bin"), 50);
    write_file(&src.join("c.bin"), 30);
    write_file(&src.join("cover.jpg"), 10);
}

#[tokio::test]
async fn packs_folder_into_numbered_parts_and_removes_source() {
    let tmp = tempdir().unwrap();
    comics_fixture(tmp.path());

    let report = process_input(&config(tmp.path(), 100, 2), &Progress::hidden())
        .await
        .expect("pipeline should run");

    assert_eq!(report.folders.len(), 1);
    let folder = &report.folders[0];
    assert_eq!(folder.name, "Comics");

    let out = tmp.path().join("output/Comics");
    let part1 = out.join("Comics_parte_01.zip");
    let part2 = out.join("Comics_parte_02.zip");
    assert_eq!(
        folder.outcome,
        FolderOutcome::Archived {
            parts: vec![part1.clone(), part2.clone()],
            failed_parts: vec![],
            skipped_files: 0,
            source_removed: true,
        }
    );
    assert_eq!(folder.cover.as_deref(), Some(out.join("cover.jpg").as_path()));

    assert_eq!(zip_names(&part1), vec!["vol1/a.bin"]);
    assert_eq!(zip_names(&part2), vec!["c.bin", "cover.jpg", "vol1/b.bin"]);
    assert!(out.join("cover.jpg").is_file());
    assert!(staging_dirs(&out).is_empty());
    assert!(!tmp.path().join("input/Comics").exists());
    assert_eq!(report.archived_parts().len(), 2);
}

#[tokio::test]
async fn single_worker_produces_the_same_parts() {
    let tmp = tempdir().unwrap();
    comics_fixture(tmp.path());

    let report = process_input(&config(tmp.path(), 100, 0), &Progress::hidden())
        .await
        .unwrap();

    assert_eq!(report.archived_parts().len(), 2);
}

#[tokio::test]
async fn deflated_parts_round_trip_their_entries() {
    let tmp = tempdir().unwrap();
    comics_fixture(tmp.path());
    let mut cfg = config(tmp.path(), 1_000, 4);
    cfg.compression = CompressionMode::from_level(9);

    let report = process_input(&cfg, &Progress::hidden()).await.unwrap();

    let parts = report.archived_parts();
    assert_eq!(parts.len(), 1);
    assert_eq!(
        zip_names(parts[0]),
        vec!["c.bin", "cover.jpg", "vol1/a.bin", "vol1/b.bin"]
    );
}

#[tokio::test]
async fn empty_folder_is_skipped_and_kept() {
    let tmp = tempdir().unwrap();
    fs::create_dir_all(tmp.path().join("input/Empty/nested")).unwrap();

    let report = process_input(&config(tmp.path(), 100, 2), &Progress::hidden())
        .await
        .unwrap();

    assert_eq!(report.folders.len(), 1);
    assert_eq!(report.folders[0].outcome, FolderOutcome::Empty);
    assert!(tmp.path().join("input/Empty").is_dir());
    assert!(report.archived_parts().is_empty());
}

#[tokio::test]
async fn rerun_after_processing_is_a_no_op() {
    let tmp = tempdir().unwrap();
    comics_fixture(tmp.path());
    let cfg = config(tmp.path(), 100, 2);

    process_input(&cfg, &Progress::hidden()).await.unwrap();
    let second = process_input(&cfg, &Progress::hidden()).await.unwrap();

    assert!(second.is_empty());
    assert!(tmp.path().join("output/Comics/Comics_parte_02.zip").is_file());
}

#[tokio::test]
async fn missing_input_root_is_an_error() {
    let tmp = tempdir().unwrap();
    let result = process_input(&config(tmp.path(), 100, 2), &Progress::hidden()).await;
    assert!(matches!(result, Err(PipelineError::NotADirectory(_))));
}

#[tokio::test]
async fn failed_part_keeps_source_and_siblings_still_finish() {
    let tmp = tempdir().unwrap();
    comics_fixture(tmp.path());
    // A directory squatting on the first part's path makes that archive fail to open.
    let blocked = tmp.path().join("output/Comics/Comics_parte_01.zip");
    fs::create_dir_all(&blocked).unwrap();

    let report = process_input(&config(tmp.path(), 100, 2), &Progress::hidden())
        .await
        .unwrap();

    let out = tmp.path().join("output/Comics");
    assert_eq!(
        report.folders[0].outcome,
        FolderOutcome::Archived {
            parts: vec![out.join("Comics_parte_02.zip")],
            failed_parts: vec!["Comics_parte_01.zip".to_string()],
            skipped_files: 0,
            source_removed: false,
        }
    );
    assert!(tmp.path().join("input/Comics/vol1/a.bin").is_file());
    assert!(blocked.is_dir());
    assert!(staging_dirs(&out).is_empty());
}

#[tokio::test]
async fn one_folder_failing_does_not_stop_the_next() {
    let tmp = tempdir().unwrap();
    comics_fixture(tmp.path());
    write_file(&tmp.path().join("input/Zines/z.bin"), 5);
    // A file where the output folder should go makes "Comics" fail before archiving.
    fs::create_dir_all(tmp.path().join("output")).unwrap();
    fs::write(tmp.path().join("output/Comics"), b"not a dir").unwrap();

    let report = process_input(&config(tmp.path(), 100, 2), &Progress::hidden())
        .await
        .unwrap();

    assert_eq!(report.folders.len(), 2);
    assert!(matches!(report.folders[0].outcome, FolderOutcome::Failed(_)));
    assert!(tmp.path().join("input/Comics").is_dir());
    assert!(matches!(
        report.folders[1].outcome,
        FolderOutcome::Archived { source_removed: true, .. }
    ));
    assert!(tmp.path().join("output/Zines/Zines_parte_01.zip").is_file());
}

#[tokio::test]
async fn oversized_file_is_archived_alone() {
    let tmp = tempdir().unwrap();
    let src = tmp.path().join("input/Big");
    write_file(&src.join("huge.bin"), 500);
    write_file(&src.join("small.bin"), 20);

    let report = process_input(&config(tmp.path(), 100, 2), &Progress::hidden())
        .await
        .unwrap();

    let parts = report.archived_parts();
    assert_eq!(parts.len(), 2);
    assert_eq!(zip_names(parts[0]), vec!["huge.bin"]);
    assert_eq!(zip_names(parts[1]), vec!["small.bin"]);
}

/// A file whose staged path is too long to create never reaches a part, so the source stays.
#[cfg(target_os = "linux")]
#[tokio::test]
async fn file_that_cannot_be_staged_keeps_source() {
    let tmp = tempdir().unwrap();
    let src = tmp.path().join("input/C");
    write_file(&src.join("ok.bin"), 4);
    let mut nested = src.clone();
    for i in 0..15 {
        nested.push(format!("{i:x}").repeat(250));
    }
    let precious = nested.join("precious");
    write_file(&precious, 8);

    // The staging area lives under a much deeper output root than the source.
    let mut cfg = config(tmp.path(), 1_000, 2);
    cfg.output_dir = tmp
        .path()
        .join("o".repeat(250))
        .join("u".repeat(250))
        .join("output");

    let report = process_input(&cfg, &Progress::hidden()).await.unwrap();

    let part = cfg.output_dir.join("C/C_parte_01.zip");
    assert_eq!(
        report.folders[0].outcome,
        FolderOutcome::Archived {
            parts: vec![part.clone()],
            failed_parts: vec![],
            skipped_files: 1,
            source_removed: false,
        }
    );
    assert_eq!(zip_names(&part), vec!["ok.bin"]);
    assert!(precious.is_file());
    assert!(src.join("ok.bin").is_file());
}
