use crate::export::DEFAULT_JPEG_QUALITY;
use crate::history::DEFAULT_MAX_HISTORY;
use crate::template::{RenameSettings, RenameTemplate, TargetExtension};
use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationMode {
    #[default]
    Folder,
    NewFolder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub mode: DestinationMode,
    pub last_input_folder: Option<PathBuf>,
    pub last_output_folder: Option<PathBuf>,
    pub rename_template: RenameTemplate,
    pub rename_prefix: String,
    pub rename_start_number: u64,
    pub rename_digits: usize,
    pub jpg_convert: bool,
    pub jpg_quality: u8,
    pub show_save_confirmation: bool,
    pub show_delete_confirmation: bool,
    pub max_history: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: DestinationMode::Folder,
            last_input_folder: None,
            last_output_folder: None,
            rename_template: RenameTemplate::Sequential,
            rename_prefix: String::new(),
            rename_start_number: 1,
            rename_digits: 3,
            jpg_convert: false,
            jpg_quality: DEFAULT_JPEG_QUALITY,
            show_save_confirmation: true,
            show_delete_confirmation: true,
            max_history: DEFAULT_MAX_HISTORY,
        }
    }
}

impl AppConfig {
    pub fn rename_settings(&self) -> RenameSettings {
        RenameSettings {
            template: self.rename_template,
            prefix: self.rename_prefix.clone(),
            start_number: self.rename_start_number,
            digits: self.rename_digits,
            extension: TargetExtension::KeepOriginal,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    pub config_path: PathBuf,
}

pub fn app_paths() -> Result<AppPaths> {
    let proj = ProjectDirs::from("com", "sortsnap", "sortsnap")
        .context("OS標準設定ディレクトリを取得できませんでした")?;
    let config_dir = proj.config_dir().to_path_buf();
    Ok(AppPaths {
        config_path: config_dir.join("config.toml"),
        config_dir,
    })
}

pub fn load_config() -> Result<AppConfig> {
    let paths = app_paths()?;
    Ok(load_config_from(&paths.config_path))
}

pub fn save_config(config: &AppConfig) -> Result<()> {
    let paths = app_paths()?;
    save_config_to(config, &paths.config_path)
}

/// Keys absent from the file keep their defaults. An unreadable or malformed
/// file is logged and replaced by the defaults.
pub fn load_config_from(path: &Path) -> AppConfig {
    match try_load_config_from(path) {
        Ok(config) => config,
        Err(err) => {
            warn!(
                path = %path.display(),
                error = %format!("{err:#}"),
                "設定ファイルを読み込めないため既定値を使用します"
            );
            AppConfig::default()
        }
    }
}

/// Like `load_config_from`, but read and parse failures are returned.
pub fn try_load_config_from(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }

    let raw = fs::read_to_string(path)
        .with_context(|| format!("設定ファイルを読めませんでした: {}", path.display()))?;

    let config = toml::from_str::<AppConfig>(&raw).context("設定ファイルのパースに失敗しました")?;
    Ok(config)
}

pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| {
            format!("設定ディレクトリを作成できませんでした: {}", dir.display())
        })?;
    }
    let body = toml::to_string_pretty(config).context("設定のシリアライズに失敗しました")?;
    fs::write(path, body)
        .with_context(|| format!("設定ファイルを書き込めませんでした: {}", path.display()))?;
    Ok(())
}
