use crate::entry::ImageEntry;
use crate::sanitize::{validate_filename, FilenameIssue};
use crate::template::RenameSettings;
use anyhow::{Context, Result};
use chrono::Local;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub const DEFAULT_JPEG_QUALITY: u8 = 95;
pub const MAX_FOLDER_ATTEMPTS: usize = 1000;

const CONVERTED_EXTENSION: &str = "jpg";
const WRITE_PROBE_NAME: &str = ".sortsnap_write_test";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    #[default]
    Overwrite,
    Suffix,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRequest {
    pub destination: PathBuf,
    pub settings: RenameSettings,
    pub convert_png_to_jpeg: bool,
    pub quality: u8,
    pub conflict: ConflictPolicy,
}

impl ExportRequest {
    pub fn new(destination: impl Into<PathBuf>, settings: RenameSettings) -> Self {
        Self {
            destination: destination.into(),
            settings,
            convert_png_to_jpeg: false,
            quality: DEFAULT_JPEG_QUALITY,
            conflict: ConflictPolicy::Overwrite,
        }
    }
}

/// Cooperative cancellation flag, checked once per item boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportOutcome {
    Completed,
    CancelledPartial,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportState {
    Idle,
    Running,
    Completed,
    CancelledPartial,
    Failed,
}

impl From<ExportOutcome> for ExportState {
    fn from(outcome: ExportOutcome) -> Self {
        match outcome {
            ExportOutcome::Completed => ExportState::Completed,
            ExportOutcome::CancelledPartial => ExportState::CancelledPartial,
            ExportOutcome::Failed => ExportState::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportProgress {
    pub current: usize,
    pub total: usize,
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportFailure {
    pub filename: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportWarning {
    pub filename: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSummary {
    pub outcome: ExportOutcome,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub not_attempted: usize,
    pub failures: Vec<ExportFailure>,
    pub warnings: Vec<ExportWarning>,
    pub written: Vec<PathBuf>,
    pub error: Option<String>,
}

impl ExportSummary {
    fn new(total: usize) -> Self {
        Self {
            outcome: ExportOutcome::Completed,
            total,
            succeeded: 0,
            failed: 0,
            not_attempted: 0,
            failures: Vec::new(),
            warnings: Vec::new(),
            written: Vec::new(),
            error: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum FolderError {
    #[error("フォルダ名が不正です: {name}")]
    InvalidName {
        name: String,
        issues: Vec<FilenameIssue>,
    },
    #[error("空いているフォルダ名が見つかりませんでした: {name}（{attempts}回試行）")]
    Exhausted { name: String, attempts: usize },
    #[error("フォルダを作成できませんでした: {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    Existing(PathBuf),
    NewFolder { parent: PathBuf, name: String },
}

impl Destination {
    pub fn resolve(&self) -> Result<PathBuf, FolderError> {
        match self {
            Destination::Existing(path) => Ok(path.clone()),
            Destination::NewFolder { parent, name } => create_unique_folder(parent, name),
        }
    }
}

struct ExportedItem {
    path: PathBuf,
    warning: Option<ExportWarning>,
}

/// Runs one batch over `entries` in order. Item failures are recorded and the
/// batch moves on; only an unusable destination fails the whole batch.
pub fn export_batch<F>(
    entries: &[ImageEntry],
    request: &ExportRequest,
    cancel: &CancelToken,
    mut on_progress: F,
) -> ExportSummary
where
    F: FnMut(ExportProgress),
{
    let total = entries.len();
    let mut summary = ExportSummary::new(total);

    if let Err(reason) = check_destination(&request.destination) {
        error!(destination = %request.destination.display(), %reason, "保存先を使用できません");
        summary.outcome = ExportOutcome::Failed;
        summary.not_attempted = total;
        summary.error = Some(reason);
        return summary;
    }

    info!(total, destination = %request.destination.display(), "保存処理開始");

    let mut reserved = HashSet::<PathBuf>::new();
    for (index, entry) in entries.iter().enumerate() {
        if cancel.is_cancelled() {
            warn!("保存処理がキャンセルされました（{}/{}枚処理済み）", index, total);
            summary.outcome = ExportOutcome::CancelledPartial;
            summary.not_attempted = total - index;
            break;
        }

        let converting = request.convert_png_to_jpeg && entry.is_convertible();
        let extension = if converting {
            CONVERTED_EXTENSION
        } else {
            request.settings.extension.resolve(entry.extension())
        };
        let (filename, result) = match request.settings.filename_for(index, extension) {
            Ok(filename) => {
                let result =
                    export_one(entry, request, index, &filename, converting, &mut reserved);
                (filename, result)
            }
            Err(err) => (entry.filename().to_string(), Err(err.into())),
        };

        match result {
            Ok(item) => {
                summary.succeeded += 1;
                summary.written.push(item.path);
                if let Some(warning) = item.warning {
                    summary.warnings.push(warning);
                }
            }
            Err(err) => {
                error!(
                    source = %entry.path().display(),
                    error = %format!("{err:#}"),
                    "ファイル保存エラー"
                );
                summary.failed += 1;
                summary.failures.push(ExportFailure {
                    filename: entry.filename().to_string(),
                    error: format!("{err:#}"),
                });
            }
        }

        on_progress(ExportProgress {
            current: index + 1,
            total,
            filename,
        });
    }

    info!(
        succeeded = summary.succeeded,
        failed = summary.failed,
        not_attempted = summary.not_attempted,
        "保存処理完了"
    );
    summary
}

fn export_one(
    entry: &ImageEntry,
    request: &ExportRequest,
    index: usize,
    filename: &str,
    converting: bool,
    reserved: &mut HashSet<PathBuf>,
) -> Result<ExportedItem> {
    let target = resolve_target(&request.destination, filename, request.conflict, reserved);

    if !converting {
        copy_preserving(entry.path(), &target)?;
        return Ok(ExportedItem {
            path: target,
            warning: None,
        });
    }

    match transcode_to_jpeg(entry.path(), &target, request.quality) {
        Ok(()) => Ok(ExportedItem {
            path: target,
            warning: None,
        }),
        Err(err) => {
            reserved.remove(&target);
            let fallback_name = request.settings.filename_for(index, entry.extension())?;
            let fallback =
                resolve_target(&request.destination, &fallback_name, request.conflict, reserved);
            copy_preserving(entry.path(), &fallback)?;
            warn!(
                file = %fallback_name,
                error = %format!("{err:#}"),
                "JPG変換失敗、元の形式で保存"
            );
            Ok(ExportedItem {
                path: fallback,
                warning: Some(ExportWarning {
                    filename: fallback_name,
                    message: format!("JPG変換失敗、元の形式で保存しました: {err:#}"),
                }),
            })
        }
    }
}

fn check_destination(destination: &Path) -> Result<(), String> {
    if !destination.exists() {
        return Err(format!("出力先フォルダが存在しません: {}", destination.display()));
    }
    if !destination.is_dir() {
        return Err(format!(
            "出力先がフォルダではありません: {}",
            destination.display()
        ));
    }
    Ok(())
}

fn resolve_target(
    dir: &Path,
    filename: &str,
    policy: ConflictPolicy,
    reserved: &mut HashSet<PathBuf>,
) -> PathBuf {
    let candidate = dir.join(filename);
    match policy {
        ConflictPolicy::Overwrite => {
            reserved.insert(candidate.clone());
            candidate
        }
        ConflictPolicy::Suffix => unique_path_with_reserved(candidate, reserved),
    }
}

fn unique_path_with_reserved(candidate: PathBuf, reserved: &mut HashSet<PathBuf>) -> PathBuf {
    if !candidate.exists() && !reserved.contains(&candidate) {
        reserved.insert(candidate.clone());
        return candidate;
    }

    let parent = candidate.parent().unwrap_or_else(|| Path::new("."));
    let stem = candidate
        .file_stem()
        .map(|v| v.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    let ext = candidate
        .extension()
        .map(|v| v.to_string_lossy().to_string())
        .unwrap_or_default();

    let mut n = 1usize;
    loop {
        let mut name = format!("{}_{:03}", stem, n);
        if !ext.is_empty() {
            name.push('.');
            name.push_str(&ext);
        }
        let next = parent.join(name);
        if !next.exists() && !reserved.contains(&next) {
            reserved.insert(next.clone());
            return next;
        }
        n += 1;
    }
}

fn copy_preserving(from: &Path, to: &Path) -> Result<()> {
    if is_same_file(from, to) {
        anyhow::bail!("出力先が元ファイルと同じです: {}", to.display());
    }

    fs::copy(from, to)
        .with_context(|| format!("コピーに失敗しました: {} -> {}", from.display(), to.display()))?;

    let modified = fs::metadata(from).and_then(|meta| meta.modified());
    if let Ok(modified) = modified {
        let applied = fs::File::options()
            .write(true)
            .open(to)
            .and_then(|file| file.set_modified(modified));
        if let Err(err) = applied {
            debug!(path = %to.display(), error = %err, "更新日時を引き継げませんでした");
        }
    }
    Ok(())
}

fn is_same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn transcode_to_jpeg(source: &Path, target: &Path, quality: u8) -> Result<()> {
    let img = image::open(source)
        .with_context(|| format!("画像をデコードできませんでした: {}", source.display()))?;
    let rgb = flatten_onto_white(&img);

    let mut buf = Vec::new();
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
        encoder
            .encode_image(&rgb)
            .with_context(|| format!("JPEGエンコードに失敗しました: {}", source.display()))?;
    }

    fs::write(target, &buf)
        .with_context(|| format!("JPEGを書き込めませんでした: {}", target.display()))?;
    Ok(())
}

fn flatten_onto_white(img: &DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }

    let rgba = img.to_rgba8();
    let mut out = RgbImage::new(rgba.width(), rgba.height());
    for (dst, src) in out.pixels_mut().zip(rgba.pixels()) {
        let [r, g, b, a] = src.0;
        let alpha = u16::from(a);
        let blend = |c: u8| -> u8 {
            ((u16::from(c) * alpha + 255 * (255 - alpha) + 127) / 255) as u8
        };
        *dst = Rgb([blend(r), blend(g), blend(b)]);
    }
    out
}

/// Creates `parent/name`, or `name_1`, `name_2`, … when taken.
/// An empty name defaults to today's date as `yymmdd`.
pub fn create_unique_folder(parent: &Path, name: &str) -> Result<PathBuf, FolderError> {
    create_unique_folder_capped(parent, name, MAX_FOLDER_ATTEMPTS)
}

fn create_unique_folder_capped(
    parent: &Path,
    name: &str,
    max_attempts: usize,
) -> Result<PathBuf, FolderError> {
    let name = match name.trim() {
        "" => Local::now().format("%y%m%d").to_string(),
        trimmed => trimmed.to_string(),
    };
    let check = validate_filename(&name);
    if !check.valid {
        return Err(FolderError::InvalidName {
            name,
            issues: check.issues,
        });
    }

    fs::create_dir_all(parent).map_err(|source| FolderError::Io {
        path: parent.to_path_buf(),
        source,
    })?;

    for attempt in 0..=max_attempts {
        let candidate = if attempt == 0 {
            parent.join(&name)
        } else {
            parent.join(format!("{}_{}", name, attempt))
        };
        match fs::create_dir(&candidate) {
            Ok(()) => {
                info!(path = %candidate.display(), "フォルダ作成");
                return Ok(candidate);
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(source) => {
                return Err(FolderError::Io {
                    path: candidate,
                    source,
                })
            }
        }
    }

    Err(FolderError::Exhausted {
        name,
        attempts: max_attempts,
    })
}

pub fn check_write_permission(dir: &Path) -> bool {
    let probe = dir.join(WRITE_PROBE_NAME);
    if fs::write(&probe, b"test").is_err() {
        return false;
    }
    fs::remove_file(&probe).is_ok()
}
