//! 配置文件管理
//!
//! 配置以 JSON 保存。所有字段都有默认值，因此 `{}` 也是合法配置；
//! 键名使用 camelCase，同时兼容 snake_case 写法。

use crate::emit::ScriptFormat;
use crate::error::{KeyscanError, Result};
use crate::ocr::{EngineKind, RecognizeMode};
use crate::postprocess::CleanupRule;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 默认的目标图片地址
pub const DEFAULT_IMAGE_URL: &str = "https://www.stratesave.com/html/images/sidchgtrial.png";

/// 默认的密钥格式（整串匹配）
pub const DEFAULT_KEY_PATTERN: &str = r"[A-Za-z0-9@._\-]{6,128}";

const APP_DIR_NAME: &str = "keyscan";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KeyscanConfig {
    #[serde(default = "default_image_url", alias = "image_url")]
    pub image_url: String,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default = "default_engines")]
    pub engines: Vec<EngineKind>,
    #[serde(default, alias = "recognize_mode")]
    pub recognize_mode: RecognizeMode,
    #[serde(default)]
    pub tesseract: TesseractConfig,
    #[serde(default)]
    pub easyocr: EasyOcrConfig,
    #[serde(default)]
    pub paddle: PaddleConfig,
    #[serde(default)]
    pub preprocess: PreprocessConfig,
    #[serde(default)]
    pub key: KeyConfig,
    #[serde(default)]
    pub command: CommandConfig,
    #[serde(default, alias = "log_dir")]
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FetchConfig {
    #[serde(default = "default_fetch_timeout", alias = "timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_bytes", alias = "max_bytes")]
    pub max_bytes: u64,
    #[serde(default = "default_user_agent", alias = "user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TesseractConfig {
    #[serde(default = "default_tesseract_binary")]
    pub binary: String,
    #[serde(default = "default_tesseract_lang")]
    pub lang: String,
    /// 7 = 单行文本，适合只有一行密钥的图片
    #[serde(default = "default_tesseract_psm")]
    pub psm: u8,
    #[serde(default)]
    pub oem: Option<u8>,
    #[serde(default, alias = "tessdata_dir")]
    pub tessdata_dir: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EasyOcrConfig {
    #[serde(default = "default_python")]
    pub python: String,
    #[serde(default = "default_easyocr_lang")]
    pub lang: String,
    #[serde(default)]
    pub gpu: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaddleConfig {
    #[serde(default = "default_paddle_api_url", alias = "api_url")]
    pub api_url: String,
    #[serde(default = "default_paddle_timeout", alias = "timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PreprocessConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub grayscale: bool,
    #[serde(default = "default_target_width", alias = "target_width")]
    pub target_width: u32,
    #[serde(default = "default_max_pixels", alias = "max_pixels")]
    pub max_pixels: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KeyConfig {
    #[serde(default = "default_key_pattern")]
    pub pattern: String,
    #[serde(default)]
    pub cleanup: Vec<CleanupRule>,
    #[serde(default)]
    pub review: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommandConfig {
    #[serde(default = "default_executable")]
    pub executable: String,
    #[serde(default = "default_key_arg", alias = "key_arg")]
    pub key_arg: String,
    #[serde(default = "default_command_args")]
    pub args: Vec<String>,
    #[serde(default)]
    pub format: ScriptFormat,
    #[serde(default = "default_output")]
    pub output: PathBuf,
}

fn default_true() -> bool {
    true
}

fn default_image_url() -> String {
    DEFAULT_IMAGE_URL.to_string()
}

fn default_engines() -> Vec<EngineKind> {
    vec![EngineKind::Tesseract]
}

fn default_fetch_timeout() -> u64 {
    30
}

fn default_max_bytes() -> u64 {
    10 * 1024 * 1024
}

fn default_user_agent() -> String {
    format!("keyscan/{}", env!("CARGO_PKG_VERSION"))
}

fn default_tesseract_binary() -> String {
    "tesseract".to_string()
}

fn default_tesseract_lang() -> String {
    "eng".to_string()
}

fn default_tesseract_psm() -> u8 {
    7
}

fn default_python() -> String {
    if cfg!(windows) {
        "python".to_string()
    } else {
        "python3".to_string()
    }
}

fn default_easyocr_lang() -> String {
    "en".to_string()
}

fn default_paddle_api_url() -> String {
    "http://127.0.0.1:9003/ocr".to_string()
}

fn default_paddle_timeout() -> u64 {
    30
}

fn default_target_width() -> u32 {
    1280
}

fn default_max_pixels() -> u64 {
    3_000_000
}

fn default_key_pattern() -> String {
    DEFAULT_KEY_PATTERN.to_string()
}

fn default_executable() -> String {
    "sidchg64-3.0k.exe".to_string()
}

fn default_key_arg() -> String {
    "/KEY=".to_string()
}

fn default_command_args() -> Vec<String> {
    ["/F", "/R", "/OD", "/RESETALLAPPS"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_output() -> PathBuf {
    PathBuf::from("getsid.bat")
}

impl Default for KeyscanConfig {
    fn default() -> Self {
        Self {
            image_url: default_image_url(),
            fetch: FetchConfig::default(),
            engines: default_engines(),
            recognize_mode: RecognizeMode::default(),
            tesseract: TesseractConfig::default(),
            easyocr: EasyOcrConfig::default(),
            paddle: PaddleConfig::default(),
            preprocess: PreprocessConfig::default(),
            key: KeyConfig::default(),
            command: CommandConfig::default(),
            log_dir: None,
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout(),
            max_bytes: default_max_bytes(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for TesseractConfig {
    fn default() -> Self {
        Self {
            binary: default_tesseract_binary(),
            lang: default_tesseract_lang(),
            psm: default_tesseract_psm(),
            oem: None,
            tessdata_dir: None,
        }
    }
}

impl Default for EasyOcrConfig {
    fn default() -> Self {
        Self {
            python: default_python(),
            lang: default_easyocr_lang(),
            gpu: false,
        }
    }
}

impl Default for PaddleConfig {
    fn default() -> Self {
        Self {
            api_url: default_paddle_api_url(),
            timeout_secs: default_paddle_timeout(),
        }
    }
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            grayscale: true,
            target_width: default_target_width(),
            max_pixels: default_max_pixels(),
        }
    }
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            pattern: default_key_pattern(),
            cleanup: Vec::new(),
            review: false,
        }
    }
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            key_arg: default_key_arg(),
            args: default_command_args(),
            format: ScriptFormat::default(),
            output: default_output(),
        }
    }
}

impl KeyscanConfig {
    /// 检查配置是否可用
    pub fn validate(&self) -> Result<()> {
        if self.engines.is_empty() {
            return Err(KeyscanError::Config("至少需要配置一个 OCR 引擎".to_string()));
        }
        if self.fetch.max_bytes == 0 {
            return Err(KeyscanError::Config("fetch.maxBytes 不能为 0".to_string()));
        }
        if self.command.executable.trim().is_empty() {
            return Err(KeyscanError::Config("command.executable 不能为空".to_string()));
        }
        regex::Regex::new(&self.key.pattern)?;
        Ok(())
    }
}

/// 默认配置文件路径
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|p| p.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("config.json")
}

/// 默认日志目录
pub fn default_log_dir() -> PathBuf {
    dirs::data_dir()
        .map(|p| p.join(APP_DIR_NAME).join("logs"))
        .unwrap_or_else(|| std::env::temp_dir().join("keyscan-logs"))
}

/// 读取配置文件；文件不存在时写入默认配置
pub fn load_or_init(path: &Path) -> Result<KeyscanConfig> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: KeyscanConfig = serde_json::from_str(&content)?;
        tracing::debug!("已加载配置: {}", path.display());
        return Ok(config);
    }

    let config = KeyscanConfig::default();
    save(path, &config)?;
    tracing::info!("已创建默认配置: {}", path.display());
    Ok(config)
}

/// 保存配置
pub fn save(path: &Path, config: &KeyscanConfig) -> Result<()> {
    let content = serde_json::to_string_pretty(config)?;
    write_atomic(path, content.as_bytes())?;
    tracing::debug!("配置已保存到: {}", path.display());
    Ok(())
}

/// 原子性写入：先写临时文件，再重命名
pub(crate) fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let mut temp_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    temp_name.push(".tmp");
    let temp_path = path.with_file_name(temp_name);
    std::fs::write(&temp_path, content)?;

    // Windows 上 rename 不会覆盖已存在文件，需要先删除
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    std::fs::rename(&temp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_work() {
        let cfg: KeyscanConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.image_url, DEFAULT_IMAGE_URL);
        assert_eq!(cfg.engines, vec![EngineKind::Tesseract]);
        assert_eq!(cfg.recognize_mode, RecognizeMode::First);
        assert_eq!(cfg.fetch.timeout_secs, 30);
        assert_eq!(cfg.tesseract.psm, 7);
        assert_eq!(cfg.paddle.api_url, "http://127.0.0.1:9003/ocr");
        assert!(cfg.preprocess.enabled);
        assert_eq!(cfg.key.pattern, DEFAULT_KEY_PATTERN);
        assert!(cfg.key.cleanup.is_empty());
        assert!(!cfg.key.review);
        assert_eq!(cfg.command.executable, "sidchg64-3.0k.exe");
        assert_eq!(cfg.command.key_arg, "/KEY=");
        assert_eq!(cfg.command.args, vec!["/F", "/R", "/OD", "/RESETALLAPPS"]);
        assert_eq!(cfg.command.format, ScriptFormat::Batch);
        assert_eq!(cfg.command.output, PathBuf::from("getsid.bat"));
        assert_eq!(cfg.log_dir, None);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn config_accepts_snake_case_aliases() {
        let json = r#"
        {
          "image_url": "http://localhost/key.png",
          "engines": ["easyocr", "rapidocr"],
          "recognize_mode": "concat",
          "fetch": { "timeout_secs": 5, "max_bytes": 1024 },
          "paddle": { "api_url": "http://10.0.0.2:9003/ocr" },
          "preprocess": { "target_width": 800, "max_pixels": 1000 },
          "command": { "key_arg": "--key=", "format": "shell", "output": "run.sh" }
        }
        "#;
        let cfg: KeyscanConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.image_url, "http://localhost/key.png");
        assert_eq!(cfg.engines, vec![EngineKind::EasyOcr, EngineKind::Paddle]);
        assert_eq!(cfg.recognize_mode, RecognizeMode::Concat);
        assert_eq!(cfg.fetch.timeout_secs, 5);
        assert_eq!(cfg.fetch.max_bytes, 1024);
        assert_eq!(cfg.paddle.api_url, "http://10.0.0.2:9003/ocr");
        assert_eq!(cfg.preprocess.target_width, 800);
        assert_eq!(cfg.preprocess.max_pixels, 1000);
        assert_eq!(cfg.command.key_arg, "--key=");
        assert_eq!(cfg.command.format, ScriptFormat::Shell);
        assert_eq!(cfg.command.output, PathBuf::from("run.sh"));
    }

    #[test]
    fn validate_rejects_bad_config() {
        let mut cfg = KeyscanConfig::default();
        cfg.engines.clear();
        assert!(matches!(cfg.validate(), Err(KeyscanError::Config(_))));

        let mut cfg = KeyscanConfig::default();
        cfg.key.pattern = "([a-z".to_string();
        assert!(matches!(cfg.validate(), Err(KeyscanError::Regex(_))));
    }

    #[test]
    fn load_or_init_writes_defaults_then_reads_back() {
        let dir = std::env::temp_dir().join(format!("keyscan-config-{}", uuid::Uuid::new_v4()));
        let path = dir.join("config.json");

        let created = load_or_init(&path).unwrap();
        assert!(path.exists());
        assert_eq!(created, KeyscanConfig::default());

        let mut changed = created.clone();
        changed.engines = vec![EngineKind::Paddle];
        save(&path, &changed).unwrap();

        let loaded = load_or_init(&path).unwrap();
        assert_eq!(loaded.engines, vec![EngineKind::Paddle]);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
