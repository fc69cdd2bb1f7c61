use crate::entry::{is_supported, ImageEntry};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{info, warn};
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("フォルダが見つかりません: {}", .0.display())]
    NotFound(PathBuf),
    #[error("指定されたパスはフォルダではありません: {}", .0.display())]
    NotADirectory(PathBuf),
    #[error("フォルダへのアクセス権限がありません: {}", .0.display())]
    PermissionDenied(PathBuf),
    #[error("フォルダを読めませんでした: {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadSource {
    Folder(PathBuf),
    Files(Vec<PathBuf>),
}

impl LoadSource {
    /// A single directory argument is folder mode; anything else is a file list.
    pub fn from_inputs(inputs: Vec<PathBuf>) -> Self {
        if inputs.len() == 1 && inputs[0].is_dir() {
            let mut inputs = inputs;
            return LoadSource::Folder(inputs.remove(0));
        }
        LoadSource::Files(inputs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadOptions {
    pub recursive: bool,
    pub include_hidden: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            recursive: false,
            include_hidden: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadStats {
    pub scanned: usize,
    pub accepted: usize,
    pub skipped_unsupported: usize,
    pub skipped_hidden: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadProgress {
    pub current: usize,
    pub total: usize,
    pub filename: String,
}

#[derive(Debug, Clone)]
pub struct Discovery {
    pub entries: Vec<ImageEntry>,
    pub stats: LoadStats,
}

pub fn discover(source: &LoadSource, options: &LoadOptions) -> Result<Discovery, LoadError> {
    discover_with_progress(source, options, |_| {})
}

/// Metadata is read in parallel; `on_progress` calls are serialised and their
/// `current` counts strictly increase.
pub fn discover_with_progress<F>(
    source: &LoadSource,
    options: &LoadOptions,
    on_progress: F,
) -> Result<Discovery, LoadError>
where
    F: Fn(LoadProgress) + Sync,
{
    let mut stats = LoadStats::default();
    let candidates = match source {
        LoadSource::Folder(root) => collect_folder(root, options, &mut stats)?,
        LoadSource::Files(paths) => collect_files(paths, options, &mut stats),
    };

    let total = candidates.len();
    let completed = Mutex::new(0usize);
    let opened: Vec<Option<ImageEntry>> = candidates
        .par_iter()
        .map(|path| {
            let entry = match ImageEntry::open(path, 0) {
                Ok(entry) => Some(entry),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "画像読み込みエラー");
                    None
                }
            };
            if let Ok(mut done) = completed.lock() {
                *done += 1;
                on_progress(LoadProgress {
                    current: *done,
                    total,
                    filename: display_name(path),
                });
            }
            entry
        })
        .collect();

    stats.failed = opened.iter().filter(|e| e.is_none()).count();
    let entries: Vec<ImageEntry> = opened
        .into_iter()
        .flatten()
        .enumerate()
        .map(|(index, entry)| entry.with_original_index(index))
        .collect();
    stats.accepted = entries.len();

    info!(
        accepted = stats.accepted,
        failed = stats.failed,
        skipped = stats.skipped_unsupported + stats.skipped_hidden,
        "画像の読み込み完了"
    );

    Ok(Discovery { entries, stats })
}

fn collect_folder(
    root: &Path,
    options: &LoadOptions,
    stats: &mut LoadStats,
) -> Result<Vec<PathBuf>, LoadError> {
    if !root.exists() {
        return Err(LoadError::NotFound(root.to_path_buf()));
    }
    if !root.is_dir() {
        return Err(LoadError::NotADirectory(root.to_path_buf()));
    }

    let mut out = Vec::new();

    if options.recursive {
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry.map_err(|err| walk_error(root, err))?;
            if entry.file_type().is_dir() {
                continue;
            }
            consider(entry.path(), options, stats, &mut out);
        }
    } else {
        let read = fs::read_dir(root).map_err(|err| io_error(root, err))?;
        for entry in read {
            let entry = entry.map_err(|err| io_error(root, err))?;
            let path = entry.path();
            if path.is_dir() {
                continue;
            }
            consider(&path, options, stats, &mut out);
        }
    }

    out.sort();
    Ok(out)
}

fn collect_files(paths: &[PathBuf], options: &LoadOptions, stats: &mut LoadStats) -> Vec<PathBuf> {
    let mut out = Vec::with_capacity(paths.len());
    for path in paths {
        consider(path, options, stats, &mut out);
    }
    out
}

fn consider(path: &Path, options: &LoadOptions, stats: &mut LoadStats, out: &mut Vec<PathBuf>) {
    stats.scanned += 1;
    if is_hidden(path) && !options.include_hidden {
        stats.skipped_hidden += 1;
        return;
    }
    if is_supported(path) {
        out.push(path.to_path_buf());
    } else {
        stats.skipped_unsupported += 1;
    }
}

fn io_error(root: &Path, err: io::Error) -> LoadError {
    if err.kind() == io::ErrorKind::PermissionDenied {
        LoadError::PermissionDenied(root.to_path_buf())
    } else {
        LoadError::Io {
            path: root.to_path_buf(),
            source: err,
        }
    }
}

fn walk_error(root: &Path, err: walkdir::Error) -> LoadError {
    let path = err.path().unwrap_or(root).to_path_buf();
    match err.into_io_error() {
        Some(io_err) if io_err.kind() == io::ErrorKind::PermissionDenied => {
            LoadError::PermissionDenied(path)
        }
        Some(io_err) => LoadError::Io {
            path,
            source: io_err,
        },
        None => LoadError::Io {
            path,
            source: io::Error::other("ディレクトリのループを検出しました"),
        },
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|v| v.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::test_support::{write_jpeg, write_png};
    use tempfile::tempdir;

    #[test]
    fn folder_mode_filters_and_sorts_by_path() {
        let temp = tempdir().expect("tempdir");
        write_png(temp.path(), "b.png", 2, 2);
        write_jpeg(temp.path(), "a.JPG");
        fs::write(temp.path().join("notes.txt"), b"x").expect("write txt");
        fs::create_dir(temp.path().join("sub.png")).expect("create dir");

        let found = discover(
            &LoadSource::Folder(temp.path().to_path_buf()),
            &LoadOptions::default(),
        )
        .expect("discover");

        let names: Vec<&str> = found.entries.iter().map(|e| e.filename()).collect();
        assert_eq!(names, vec!["a.JPG", "b.png"]);
        assert_eq!(found.entries[0].original_index(), 0);
        assert_eq!(found.entries[1].original_index(), 1);
        assert_eq!(found.stats.accepted, 2);
        assert_eq!(found.stats.skipped_unsupported, 1);
    }

    #[test]
    fn file_mode_keeps_caller_order_and_skips_unreadable() {
        let temp = tempdir().expect("tempdir");
        let z = write_png(temp.path(), "z.png", 1, 1);
        let a = write_png(temp.path(), "a.png", 1, 1);
        let broken = temp.path().join("broken.png");
        fs::write(&broken, b"garbage").expect("write broken");
        let missing = temp.path().join("missing.jpg");

        let found = discover(
            &LoadSource::Files(vec![z, broken, a, missing]),
            &LoadOptions::default(),
        )
        .expect("discover");

        let names: Vec<&str> = found.entries.iter().map(|e| e.filename()).collect();
        assert_eq!(names, vec!["z.png", "a.png"]);
        assert_eq!(found.stats.failed, 2);
        assert_eq!(found.entries[1].original_index(), 1);
    }

    #[test]
    fn missing_folder_is_a_structural_error() {
        let temp = tempdir().expect("tempdir");
        let err = discover(
            &LoadSource::Folder(temp.path().join("nope")),
            &LoadOptions::default(),
        )
        .expect_err("must fail");
        assert!(matches!(err, LoadError::NotFound(_)));
    }

    #[test]
    fn file_path_is_not_a_folder() {
        let temp = tempdir().expect("tempdir");
        let file = write_png(temp.path(), "a.png", 1, 1);
        let err = discover(&LoadSource::Folder(file), &LoadOptions::default())
            .expect_err("must fail");
        assert!(matches!(err, LoadError::NotADirectory(_)));
        assert!(err.to_string().contains("フォルダではありません"));
    }

    #[test]
    fn recursive_mode_descends_and_hidden_files_can_be_skipped() {
        let temp = tempdir().expect("tempdir");
        let nested = temp.path().join("nested");
        fs::create_dir(&nested).expect("create nested");
        write_png(temp.path(), "top.png", 1, 1);
        write_png(&nested, "inner.png", 1, 1);
        write_png(temp.path(), ".hidden.png", 1, 1);

        let options = LoadOptions {
            recursive: true,
            include_hidden: false,
        };
        let found = discover(&LoadSource::Folder(temp.path().to_path_buf()), &options)
            .expect("discover");

        let names: Vec<&str> = found.entries.iter().map(|e| e.filename()).collect();
        assert_eq!(names, vec!["inner.png", "top.png"]);
        assert_eq!(found.stats.skipped_hidden, 1);
    }

    #[test]
    fn progress_counts_strictly_increase() {
        let temp = tempdir().expect("tempdir");
        for n in 0..8 {
            write_png(temp.path(), &format!("img{n}.png"), 1, 1);
        }
        let seen = Mutex::new(Vec::new());

        discover_with_progress(
            &LoadSource::Folder(temp.path().to_path_buf()),
            &LoadOptions::default(),
            |progress| {
                assert_eq!(progress.total, 8);
                seen.lock().expect("lock").push(progress.current);
            },
        )
        .expect("discover");

        let seen = seen.into_inner().expect("into inner");
        assert_eq!(seen, (1..=8).collect::<Vec<_>>());
    }

    #[test]
    fn empty_file_list_yields_nothing() {
        let found = discover(&LoadSource::Files(Vec::new()), &LoadOptions::default())
            .expect("discover");
        assert!(found.entries.is_empty());
    }

    #[test]
    fn single_directory_input_is_folder_mode() {
        let temp = tempdir().expect("tempdir");
        let source = LoadSource::from_inputs(vec![temp.path().to_path_buf()]);
        assert_eq!(source, LoadSource::Folder(temp.path().to_path_buf()));

        let file = temp.path().join("a.png");
        let source = LoadSource::from_inputs(vec![file.clone()]);
        assert_eq!(source, LoadSource::Files(vec![file]));
    }
}
