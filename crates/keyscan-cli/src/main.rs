use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use keyscan_core::config::{self, KeyscanConfig};
use keyscan_core::emit::ScriptFormat;
use keyscan_core::fetch::ImageSource;
use keyscan_core::ocr::{self, EngineKind, RecognizeMode};
use keyscan_core::pipeline::{EmitOptions, Pipeline};
use keyscan_core::redact::mask_key;
use std::path::{Path, PathBuf};
use tracing::info;

mod logging;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 配置文件路径（默认位于系统配置目录）
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// 输出调试日志
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug, Default)]
struct SourceArgs {
    /// 图片地址（默认使用配置中的 imageUrl）
    #[arg(long, conflicts_with = "file")]
    url: Option<String>,

    /// 本地图片
    #[arg(long)]
    file: Option<PathBuf>,

    /// OCR 引擎，可重复指定，按顺序尝试
    #[arg(long = "engine", value_name = "ENGINE")]
    engines: Vec<EngineKind>,

    /// first | concat
    #[arg(long)]
    mode: Option<RecognizeMode>,

    /// 跳过灰度化和缩放
    #[arg(long)]
    no_preprocess: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 识别密钥并生成命令文件
    Run {
        #[command(flatten)]
        source: SourceArgs,

        /// 命令文件路径
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// batch | shell
        #[arg(long)]
        format: Option<ScriptFormat>,

        /// 直接以参数列表启动目标程序
        #[arg(long)]
        exec: bool,

        /// 不写命令文件（通常与 --exec 一起使用）
        #[arg(long)]
        no_write: bool,

        /// 输出前人工确认密钥
        #[arg(long)]
        review: bool,

        /// 覆盖配置中的密钥格式（正则，整串匹配）
        #[arg(long)]
        pattern: Option<String>,
    },
    /// 只输出 OCR 原始结果，不校验
    Recognize {
        #[command(flatten)]
        source: SourceArgs,
    },
    /// 检查各 OCR 引擎是否可用
    Engines,
    /// 配置文件管理
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// 打印配置文件路径
    Path,
    /// 打印当前配置
    Show,
    /// 写入默认配置（已存在时需要 --force）
    Init {
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().unwrap_or_else(config::default_config_path);
    let existed = config_path.exists();
    let Some(config) = load_config(&config_path, &args.command)? else {
        println!("{}", config_path.display());
        return Ok(());
    };

    let log_dir = config.log_dir.clone().unwrap_or_else(config::default_log_dir);
    logging::init(args.verbose, &log_dir);

    info!("keyscan {} 启动", env!("CARGO_PKG_VERSION"));
    if !existed && config_path.exists() {
        info!("已创建默认配置: {}", config_path.display());
    } else {
        info!("配置文件: {}", config_path.display());
    }

    match args.command {
        Command::Run {
            source,
            output,
            format,
            exec,
            no_write,
            review,
            pattern,
        } => {
            let mut config = apply_source_args(config, &source);
            if let Some(format) = format {
                config.command.format = format;
            }
            if let Some(pattern) = pattern {
                config.key.pattern = pattern;
            }

            let command_file = if no_write {
                None
            } else {
                Some(output.unwrap_or_else(|| default_output(&config)))
            };
            let options = EmitOptions {
                workdir: command_file
                    .as_ref()
                    .and_then(|p| p.parent())
                    .filter(|p| !p.as_os_str().is_empty())
                    .map(|p| p.to_path_buf()),
                command_file,
                run_direct: exec,
                review: review || config.key.review,
            };

            let image = resolve_source(&config, &source)?;
            let pipeline = Pipeline::from_config(&config).context("初始化失败")?;
            let report = pipeline.run(&image, &options).await?;

            println!("识别结果: {}", mask_key(&report.key));
            if let Some(path) = &report.command_file {
                println!("已生成 {}", path.display());
            }
            if let Some(code) = report.exit_status {
                println!("{} 退出码: {}", config.command.executable, code);
                if code != 0 {
                    anyhow::bail!("{} 执行失败，退出码 {}", config.command.executable, code);
                }
            }
        }
        Command::Recognize { source } => {
            let config = apply_source_args(config, &source);
            let image = resolve_source(&config, &source)?;
            let pipeline = Pipeline::from_config(&config).context("初始化失败")?;
            let recognition = pipeline.recognize(&image).await?;

            for (engine, texts) in recognition.by_engine() {
                println!("[{}]", engine);
                for text in texts {
                    println!("{}", text);
                }
            }
        }
        Command::Engines => {
            for kind in EngineKind::ALL {
                let engine = ocr::build_engine(kind, &config)?;
                let status = if engine.is_available().await { "可用" } else { "不可用" };
                let enabled = if config.engines.contains(&kind) { "*" } else { " " };
                println!("{} {:<10} {}", enabled, kind, status);
            }
        }
        Command::Config { action } => match action {
            ConfigAction::Path => println!("{}", config_path.display()),
            ConfigAction::Show => println!("{}", serde_json::to_string_pretty(&config)?),
            ConfigAction::Init { force } => {
                if !existed {
                    println!("已创建 {}", config_path.display());
                } else if force {
                    config::save(&config_path, &KeyscanConfig::default())?;
                    println!("已重置 {}", config_path.display());
                } else {
                    println!("配置已存在: {}（使用 --force 覆盖）", config_path.display());
                }
            }
        },
    }

    Ok(())
}

/// 按子命令加载配置
///
/// `config path` 不需要配置，返回 None；`config show` 在文件不存在时只显示默认值，
/// 其余命令在文件不存在时写入默认配置。
fn load_config(path: &Path, command: &Command) -> Result<Option<KeyscanConfig>> {
    match command {
        Command::Config {
            action: ConfigAction::Path,
        } => Ok(None),
        Command::Config {
            action: ConfigAction::Show,
        } if !path.exists() => Ok(Some(KeyscanConfig::default())),
        _ => config::load_or_init(path)
            .map(Some)
            .with_context(|| format!("读取配置失败: {}", path.display())),
    }
}

/// 命令行参数覆盖配置
fn apply_source_args(mut config: KeyscanConfig, source: &SourceArgs) -> KeyscanConfig {
    if !source.engines.is_empty() {
        config.engines = source.engines.clone();
    }
    if let Some(mode) = source.mode {
        config.recognize_mode = mode;
    }
    if source.no_preprocess {
        config.preprocess.enabled = false;
    }
    config
}

fn resolve_source(config: &KeyscanConfig, source: &SourceArgs) -> Result<ImageSource> {
    if let Some(file) = &source.file {
        return Ok(ImageSource::File(file.clone()));
    }
    let url = source.url.as_deref().unwrap_or(&config.image_url);
    Ok(ImageSource::parse(url)?)
}

/// 默认命令文件名随格式切换扩展名（getsid.bat / getsid.sh）
fn default_output(config: &KeyscanConfig) -> PathBuf {
    let output = &config.command.output;
    match config.command.format {
        ScriptFormat::Shell if output.extension().is_some_and(|e| e == "bat") => output.with_extension("sh"),
        _ => output.clone(),
    }
}
