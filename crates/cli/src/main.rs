use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use sortsnap_core::{
    app_paths, check_write_permission, load_config, sanitize_filename, save_config, spawn_export,
    spawn_load, validate_filename, validate_prefix, AppConfig, ConflictPolicy, Destination,
    ExportEvent, ExportOutcome, ExportRequest, ImageCollection, LoadEvent, LoadOptions,
    LoadSource, RenameSettings, RenameTemplate, TargetExtension,
};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "sortsnap")]
#[command(about = "画像を並べ替えて連番ファイル名で書き出します")]
struct Cli {
    /// ログを詳しく出力します（-v: debug, -vv: trace）
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    List(ListArgs),
    Export(ExportArgs),
    Preview(PreviewArgs),
    Validate(ValidateArgs),
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
struct ConfigArgs {
    #[command(subcommand)]
    action: ConfigAction,
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    Show,
}

#[derive(Debug, Args)]
struct LoadArgs {
    /// フォルダ1つ、または画像ファイル（複数可）
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    #[arg(long, default_value_t = false)]
    recursive: bool,
    #[arg(long, default_value_t = false)]
    skip_hidden: bool,
    /// 読み込み後に順番に適用する操作（位置は0始まり）
    #[arg(long = "op", value_parser = parse_op)]
    ops: Vec<Op>,
}

#[derive(Debug, Args)]
struct ListArgs {
    #[command(flatten)]
    load: LoadArgs,
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    output: OutputFormat,
}

#[derive(Debug, Args)]
struct RenameArgs {
    /// sequential / prefixed / dated
    #[arg(long)]
    template: Option<String>,
    #[arg(long)]
    prefix: Option<String>,
    #[arg(long)]
    start: Option<u64>,
    #[arg(long)]
    digits: Option<usize>,
    /// 出力拡張子（省略時は元の拡張子）
    #[arg(long)]
    ext: Option<String>,
}

#[derive(Debug, Args)]
struct ExportArgs {
    #[command(flatten)]
    load: LoadArgs,
    #[command(flatten)]
    rename: RenameArgs,
    #[arg(long)]
    out: PathBuf,
    /// 出力先の中に新しいフォルダを作成します（空文字なら日付）
    #[arg(long)]
    new_folder: Option<String>,
    /// PNGをJPGに変換します（省略時は設定に従います）
    #[arg(long, overrides_with = "no_convert_jpg")]
    convert_jpg: bool,
    #[arg(long, overrides_with = "convert_jpg")]
    no_convert_jpg: bool,
    #[arg(long)]
    quality: Option<u8>,
    #[arg(long, default_value_t = false)]
    suffix_on_conflict: bool,
}

#[derive(Debug, Args)]
struct PreviewArgs {
    #[command(flatten)]
    rename: RenameArgs,
    #[arg(long, default_value_t = 3)]
    count: usize,
}

#[derive(Debug, Args)]
struct ValidateArgs {
    name: String,
    #[arg(long, default_value_t = false)]
    sanitize: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Op {
    SortAsc,
    SortDesc,
    Restore,
    Move { from: usize, to: usize },
    MoveMany { indices: Vec<usize>, to: usize },
    Delete(Vec<usize>),
    Select { start: usize, end: usize },
    DeleteSelected,
    Undo,
    Redo,
}

impl FromStr for Op {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (name, arg) = match raw.split_once('=') {
            Some((name, arg)) => (name.trim(), Some(arg.trim())),
            None => (raw.trim(), None),
        };
        match (name, arg) {
            ("sort-asc", None) => Ok(Op::SortAsc),
            ("sort-desc", None) => Ok(Op::SortDesc),
            ("restore", None) => Ok(Op::Restore),
            ("delete-selected", None) => Ok(Op::DeleteSelected),
            ("undo", None) => Ok(Op::Undo),
            ("redo", None) => Ok(Op::Redo),
            ("move", Some(arg)) => {
                let (from, to) = split_pair(arg)?;
                Ok(Op::Move {
                    from: parse_index(from)?,
                    to: parse_index(to)?,
                })
            }
            ("move-many", Some(arg)) => {
                let (indices, to) = split_pair(arg)?;
                Ok(Op::MoveMany {
                    indices: parse_index_list(indices)?,
                    to: parse_index(to)?,
                })
            }
            ("delete", Some(arg)) => Ok(Op::Delete(parse_index_list(arg)?)),
            ("select", Some(arg)) => {
                let (start, end) = split_pair(arg)?;
                Ok(Op::Select {
                    start: parse_index(start)?,
                    end: parse_index(end)?,
                })
            }
            _ => Err(format!("不明な操作です: {raw}")),
        }
    }
}

fn parse_op(raw: &str) -> Result<Op, String> {
    raw.parse()
}

fn split_pair(arg: &str) -> Result<(&str, &str), String> {
    arg.split_once(':')
        .ok_or_else(|| format!("'A:B' の形式で指定してください: {arg}"))
}

fn parse_index(raw: &str) -> Result<usize, String> {
    raw.trim()
        .parse()
        .map_err(|_| format!("位置は0以上の整数で指定してください: {raw}"))
}

fn parse_index_list(raw: &str) -> Result<Vec<usize>, String> {
    raw.split(',').map(parse_index).collect()
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::List(args) => cmd_list(args),
        Commands::Export(args) => cmd_export(args),
        Commands::Preview(args) => cmd_preview(args),
        Commands::Validate(args) => cmd_validate(args),
        Commands::Config(config) => match config.action {
            ConfigAction::Show => cmd_config_show(),
        },
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_collection(args: &LoadArgs, config: &AppConfig) -> Result<ImageCollection> {
    let source = LoadSource::from_inputs(args.inputs.clone());
    let options = LoadOptions {
        recursive: args.recursive,
        include_hidden: !args.skip_hidden,
    };

    let task = spawn_load(source, options)?;
    let mut discovery = None;
    for event in task.events().iter() {
        match event {
            LoadEvent::Progress(p) => {
                eprint!("\r読み込み中... {}/{}", p.current, p.total);
            }
            LoadEvent::Finished(found) => {
                discovery = Some(found);
                break;
            }
            LoadEvent::Failed(err) => {
                eprintln!();
                return Err(err.into());
            }
        }
    }
    eprintln!();
    let discovery = discovery.context("画像の読み込みが途中で終了しました")?;
    if discovery.stats.failed > 0 {
        eprintln!("読み込めなかったファイル: {}件", discovery.stats.failed);
    }

    let mut collection = ImageCollection::with_history_depth(config.max_history);
    collection.load(discovery.entries);
    apply_ops(&mut collection, &args.ops);
    Ok(collection)
}

fn apply_ops(collection: &mut ImageCollection, ops: &[Op]) {
    for op in ops {
        let applied = match op {
            Op::SortAsc => collection.sort_by_name(true),
            Op::SortDesc => collection.sort_by_name(false),
            Op::Restore => collection.restore_original_order(),
            Op::Move { from, to } => collection.reorder(*from, *to),
            Op::MoveMany { indices, to } => collection.reorder_multiple(indices, *to),
            Op::Delete(indices) => collection.delete(indices) > 0,
            Op::Select { start, end } => {
                collection.select_range(*start, *end);
                true
            }
            Op::DeleteSelected => collection.delete_selected() > 0,
            Op::Undo => match collection.undo_step() {
                Some(report) => {
                    for failure in &report.failed_restorations {
                        eprintln!(
                            "復元できませんでした: {} ({})",
                            failure.path.display(),
                            failure.error
                        );
                    }
                    true
                }
                None => false,
            },
            Op::Redo => collection.redo(),
        };
        if applied {
            info!(?op, "操作を適用しました");
        } else {
            warn!(?op, "操作は何も変更しませんでした");
        }
    }
}

impl RenameArgs {
    fn settings(&self, config: &AppConfig) -> Result<RenameSettings> {
        let mut settings = config.rename_settings();
        if let Some(template) = &self.template {
            settings.template = RenameTemplate::from_id(template);
        }
        if let Some(prefix) = &self.prefix {
            settings.prefix = prefix.clone();
        }
        if let Some(start) = self.start {
            settings.start_number = start;
        }
        if let Some(digits) = self.digits {
            settings.digits = digits;
        }
        settings.extension = TargetExtension::from_option(self.ext.as_deref());

        if settings.template == RenameTemplate::Prefixed {
            validate_prefix(&settings.prefix).context("プレフィックスが不正です")?;
        }
        Ok(settings)
    }
}

impl ExportArgs {
    fn convert_setting(&self, config: &AppConfig) -> bool {
        if self.convert_jpg {
            true
        } else if self.no_convert_jpg {
            false
        } else {
            config.jpg_convert
        }
    }
}

fn cmd_list(args: ListArgs) -> Result<()> {
    let config = load_config()?;
    let collection = load_collection(&args.load, &config)?;

    match args.output {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(collection.entries())?);
        }
        OutputFormat::Table => print_table(&collection),
    }
    Ok(())
}

fn cmd_export(args: ExportArgs) -> Result<()> {
    let mut config = load_config()?;
    let collection = load_collection(&args.load, &config)?;
    let settings = args.rename.settings(&config)?;

    let destination = match &args.new_folder {
        Some(name) => Destination::NewFolder {
            parent: args.out.clone(),
            name: name.clone(),
        },
        None => Destination::Existing(args.out.clone()),
    };
    let destination = destination.resolve()?;
    if !check_write_permission(&destination) {
        anyhow::bail!("出力先に書き込めません: {}", destination.display());
    }

    let request = ExportRequest {
        destination: destination.clone(),
        settings,
        convert_png_to_jpeg: args.convert_setting(&config),
        quality: args.quality.unwrap_or(config.jpg_quality),
        conflict: if args.suffix_on_conflict {
            ConflictPolicy::Suffix
        } else {
            ConflictPolicy::Overwrite
        },
    };

    let mut task = spawn_export(collection.snapshot(), request)?;
    while let Some(event) = task.next_event() {
        match event {
            ExportEvent::Started { total } => {
                eprintln!("保存開始: {}枚 -> {}", total, destination.display());
            }
            ExportEvent::Progress(p) => {
                eprint!("\r保存中... {}/{} {}", p.current, p.total, p.filename);
            }
            ExportEvent::Finished(_) => break,
        }
    }
    eprintln!();
    let summary = task.wait()?;

    for warning in &summary.warnings {
        eprintln!("警告: {} ({})", warning.filename, warning.message);
    }
    for failure in &summary.failures {
        eprintln!("失敗: {} ({})", failure.filename, failure.error);
    }
    println!(
        "保存完了: 成功 {}件 / 失敗 {}件 / 未処理 {}件",
        summary.succeeded, summary.failed, summary.not_attempted
    );

    if let Some(error) = &summary.error {
        anyhow::bail!("{error}");
    }

    config.last_output_folder = Some(args.out.clone());
    config.last_input_folder = args.load.inputs.first().cloned().filter(|p| p.is_dir());
    if let Err(err) = save_config(&config) {
        warn!(error = %format!("{err:#}"), "設定を保存できませんでした");
    }

    if summary.failed > 0 || summary.outcome != ExportOutcome::Completed {
        anyhow::bail!("{}件のファイルを保存できませんでした", summary.failed);
    }
    Ok(())
}

fn cmd_preview(args: PreviewArgs) -> Result<()> {
    let config = load_config()?;
    let settings = args.rename.settings(&config)?;
    let ext = settings.extension.resolve("jpg");
    for name in settings.samples(ext, args.count) {
        println!("{name}");
    }
    Ok(())
}

fn cmd_validate(args: ValidateArgs) -> Result<()> {
    let result = validate_filename(&args.name);
    if args.sanitize {
        println!("{}", sanitize_filename(&args.name));
    }
    if result.valid {
        eprintln!("有効なファイル名です");
        return Ok(());
    }
    for issue in &result.issues {
        eprintln!("- {issue}");
    }
    anyhow::bail!("無効なファイル名です: {}", args.name)
}

fn cmd_config_show() -> Result<()> {
    let config = load_config()?;
    let paths = app_paths()?;
    println!("設定ファイル: {}", paths.config_path.display());
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

fn print_table(collection: &ImageCollection) {
    println!("位置 選択 ファイル名 (サイズ, 画素数)");
    for (index, entry) in collection.entries().iter().enumerate() {
        let (w, h) = entry.dimensions();
        println!(
            "{:>4} {} {} ({}, {}x{})",
            index,
            if entry.is_selected() { "*" } else { " " },
            entry.filename(),
            entry.file_size_label(),
            w,
            h
        );
    }
    println!(
        "\n集計: {}枚 選択中 {}枚 元に戻せる操作 {}件",
        collection.len(),
        collection.selected_indices().len(),
        collection.history().undo_len()
    );
}
