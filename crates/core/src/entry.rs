use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp"];

const CONVERTIBLE_EXTENSIONS: &[&str] = &["png"];

#[derive(Debug, Error)]
pub enum EntryError {
    #[error("ファイル情報を読み込めませんでした: {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("画像サイズを取得できませんでした: {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// One source image. The path is the entry's identity and never changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageEntry {
    path: PathBuf,
    filename: String,
    extension: String,
    dimensions: (u32, u32),
    file_size: u64,
    original_index: usize,
    pub(crate) selected: bool,
    pub(crate) position: usize,
}

impl ImageEntry {
    pub fn open(path: impl AsRef<Path>, original_index: usize) -> Result<Self, EntryError> {
        let path = absolute_path(path.as_ref());

        let meta = fs::metadata(&path).map_err(|source| EntryError::Io {
            path: path.clone(),
            source,
        })?;
        let dimensions = image::image_dimensions(&path).map_err(|source| EntryError::Image {
            path: path.clone(),
            source,
        })?;

        let filename = path
            .file_name()
            .map(|v| v.to_string_lossy().to_string())
            .unwrap_or_default();
        let extension = extension_of(&path);

        Ok(Self {
            path,
            filename,
            extension,
            dimensions,
            file_size: meta.len(),
            original_index,
            selected: false,
            position: original_index,
        })
    }

    pub(crate) fn with_original_index(mut self, index: usize) -> Self {
        self.original_index = index;
        self.position = index;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.dimensions
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn original_index(&self) -> usize {
        self.original_index
    }

    pub fn is_selected(&self) -> bool {
        self.selected
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn is_convertible(&self) -> bool {
        CONVERTIBLE_EXTENSIONS.contains(&self.extension.as_str())
    }

    pub fn file_size_label(&self) -> String {
        format_file_size(self.file_size)
    }
}

pub fn is_supported(path: &Path) -> bool {
    let ext = extension_of(path);
    SUPPORTED_EXTENSIONS.contains(&ext.as_str())
}

pub fn format_file_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if size < 1024.0 {
            return format!("{:.1} {}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.1} TB", size)
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

fn absolute_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
pub(crate) mod test_support {
    use image::{Rgb, RgbImage, Rgba, RgbaImage};
    use std::path::{Path, PathBuf};

    pub fn write_png(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
        let path = dir.join(name);
        let img = RgbImage::from_pixel(width, height, Rgb([10, 120, 200]));
        img.save_with_format(&path, image::ImageFormat::Png)
            .expect("write png fixture");
        path
    }

    pub fn write_transparent_png(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        let img = RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 0]));
        img.save_with_format(&path, image::ImageFormat::Png)
            .expect("write png fixture");
        path
    }

    pub fn write_jpeg(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        let img = RgbImage::from_pixel(3, 2, Rgb([200, 30, 30]));
        img.save_with_format(&path, image::ImageFormat::Jpeg)
            .expect("write jpeg fixture");
        path
    }
}
