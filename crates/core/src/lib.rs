mod collection;
mod config;
mod entry;
mod export;
mod history;
mod loader;
mod sanitize;
mod template;
mod worker;

pub use collection::{
    compare_natural, Action, ActionKind, ImageCollection, RemovedEntry, RestoreFailure, SortKind,
    StepReport,
};
pub use config::{
    app_paths, load_config, load_config_from, save_config, save_config_to, try_load_config_from,
    AppConfig, AppPaths, DestinationMode,
};
pub use entry::{format_file_size, is_supported, EntryError, ImageEntry, SUPPORTED_EXTENSIONS};
pub use export::{
    check_write_permission, create_unique_folder, export_batch, CancelToken, ConflictPolicy,
    Destination, ExportFailure, ExportOutcome, ExportProgress, ExportRequest, ExportState,
    ExportSummary, ExportWarning, FolderError, DEFAULT_JPEG_QUALITY, MAX_FOLDER_ATTEMPTS,
};
pub use history::{History, Recorded, DEFAULT_MAX_HISTORY};
pub use loader::{
    discover, discover_with_progress, Discovery, LoadError, LoadOptions, LoadProgress, LoadSource,
    LoadStats,
};
pub use sanitize::{
    sanitize_filename, validate_filename, validate_path_length, validate_prefix, FilenameIssue,
    FilenameValidation, MAX_FILENAME_LEN, MAX_PATH_LEN,
};
pub use template::{
    generate_filename, generate_filename_on, generate_samples, NumberOverflow, RenameSettings,
    RenameTemplate, TargetExtension,
};
pub use worker::{
    spawn_export, spawn_export_with, spawn_load, ExportEvent, ExportTask, LoadEvent, LoadTask,
    WorkerError,
};
