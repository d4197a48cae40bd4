pub mod easyocr;
pub mod ocr_engine;
pub mod paddle;
pub mod tesseract;

pub use ocr_engine::OcrEngine;

use crate::config::KeyscanConfig;
use crate::error::{KeyscanError, Result};
use crate::preprocess::PreparedImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 支持的 OCR 引擎
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Tesseract,
    #[serde(alias = "easy_ocr")]
    EasyOcr,
    #[serde(alias = "paddleocr", alias = "rapidocr")]
    Paddle,
}

impl EngineKind {
    pub const ALL: [EngineKind; 3] = [EngineKind::Tesseract, EngineKind::EasyOcr, EngineKind::Paddle];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tesseract => "tesseract",
            Self::EasyOcr => "easyocr",
            Self::Paddle => "paddle",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = KeyscanError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tesseract" => Ok(Self::Tesseract),
            "easyocr" | "easy_ocr" => Ok(Self::EasyOcr),
            "paddle" | "paddleocr" | "rapidocr" => Ok(Self::Paddle),
            other => Err(KeyscanError::Config(format!("不支持的 OCR 引擎: {}", other))),
        }
    }
}

/// 多引擎时的识别方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecognizeMode {
    /// 按顺序尝试，第一个得到合法密钥的引擎胜出
    #[default]
    First,
    /// 运行全部引擎，按引擎顺序拼接结果
    Concat,
}

impl FromStr for RecognizeMode {
    type Err = KeyscanError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" => Ok(Self::First),
            "concat" => Ok(Self::Concat),
            other => Err(KeyscanError::Config(format!("未知的识别方式: {}", other))),
        }
    }
}

/// 根据配置创建引擎
pub fn build_engine(kind: EngineKind, config: &KeyscanConfig) -> Result<Box<dyn OcrEngine>> {
    let engine: Box<dyn OcrEngine> = match kind {
        EngineKind::Tesseract => Box::new(tesseract::TesseractEngine::new(config.tesseract.clone())),
        EngineKind::EasyOcr => Box::new(easyocr::EasyOcrEngine::new(config.easyocr.clone())),
        EngineKind::Paddle => Box::new(paddle::PaddleOcrEngine::new(&config.paddle)?),
    };
    Ok(engine)
}

/// 某个引擎识别出的一段文本
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognizedSpan {
    pub engine: String,
    pub text: String,
}

/// 一次识别的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recognition {
    pub spans: Vec<RecognizedSpan>,
}

impl Recognition {
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn lines(&self) -> Vec<&str> {
        self.spans.iter().map(|s| s.text.as_str()).collect()
    }

    pub fn text(&self) -> String {
        self.lines().join("\n")
    }

    /// 按引擎分组（保持引擎出现顺序）
    pub fn by_engine(&self) -> Vec<(&str, Vec<&str>)> {
        let mut groups: Vec<(&str, Vec<&str>)> = Vec::new();
        for span in &self.spans {
            let text = span.text.as_str();
            match groups.iter_mut().find(|(name, _)| *name == span.engine) {
                Some((_, texts)) => texts.push(text),
                None => groups.push((span.engine.as_str(), vec![text])),
            }
        }
        groups
    }
}

pub struct Recognizer {
    engines: Vec<Box<dyn OcrEngine>>,
    mode: RecognizeMode,
}

impl Recognizer {
    pub fn new(engines: Vec<Box<dyn OcrEngine>>, mode: RecognizeMode) -> Self {
        Self { engines, mode }
    }

    pub fn from_config(config: &KeyscanConfig) -> Result<Self> {
        let engines = config
            .engines
            .iter()
            .map(|kind| build_engine(*kind, config))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(engines, config.recognize_mode))
    }

    pub fn mode(&self) -> RecognizeMode {
        self.mode
    }

    pub fn engines(&self) -> &[Box<dyn OcrEngine>] {
        &self.engines
    }

    /// 用单个引擎识别；失败或无文本返回 None
    pub async fn recognize_with(&self, engine: &dyn OcrEngine, image: &PreparedImage) -> Option<Recognition> {
        match engine.recognize(image).await {
            Ok(texts) => {
                let spans: Vec<RecognizedSpan> = texts
                    .into_iter()
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .map(|text| RecognizedSpan {
                        engine: engine.name().to_string(),
                        text,
                    })
                    .collect();

                tracing::info!("{} 识别出 {} 段文本", engine.name(), spans.len());
                if spans.is_empty() {
                    None
                } else {
                    Some(Recognition { spans })
                }
            }
            Err(e) => {
                tracing::warn!("{} 识别失败: {}", engine.name(), e);
                None
            }
        }
    }

    /// 按模式识别
    ///
    /// First: 返回第一个有结果的引擎；Concat: 拼接全部引擎结果。
    pub async fn recognize(&self, image: &PreparedImage) -> Result<Recognition> {
        let mut all = Recognition::default();

        for engine in &self.engines {
            if let Some(rec) = self.recognize_with(engine.as_ref(), image).await {
                if self.mode == RecognizeMode::First {
                    return Ok(rec);
                }
                all.spans.extend(rec.spans);
            }
        }

        if all.is_empty() {
            return Err(KeyscanError::NoText);
        }
        Ok(all)
    }
}
