//! 统一错误类型

use thiserror::Error;

pub type Result<T> = std::result::Result<T, KeyscanError>;

#[derive(Debug, Error)]
pub enum KeyscanError {
    #[error("下载图片失败: {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("服务器返回错误状态 {status}: {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("图片内容为空")]
    EmptyImage,

    #[error("图片过大: {size} 字节 (上限 {limit} 字节)")]
    ImageTooLarge { size: u64, limit: u64 },

    #[error("不支持的图片来源: {0}")]
    UnsupportedSource(String),

    #[error("读取图片失败: {}: {source}", path.display())]
    ReadFile {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("图片解码失败: {0}")]
    Decode(#[from] image::ImageError),

    #[error("图片编码失败: {0}")]
    Encode(#[source] image::ImageError),

    #[error("OCR 引擎 {engine} 执行失败: {message}")]
    Engine { engine: String, message: String },

    #[error("OCR 引擎不可用: {0}")]
    EngineUnavailable(String),

    #[error("所有 OCR 引擎均未识别出文本")]
    NoText,

    #[error("识别结果不符合密钥格式，候选: {0:?}")]
    KeyRejected(Vec<String>),

    #[error("密钥包含无法安全写入 {format} 文件的字符 {ch:?}")]
    UnsafeKey { ch: char, format: &'static str },

    #[error("启动 {program} 失败: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("操作已取消")]
    Aborted,

    #[error("配置错误: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("无效的正则表达式: {0}")]
    Regex(#[from] regex::Error),
}

impl KeyscanError {
    pub(crate) fn engine(engine: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Engine {
            engine: engine.into(),
            message: message.to_string(),
        }
    }
}
