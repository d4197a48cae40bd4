//! EasyOCR 引擎，调用 `python -m easyocr.cli`
//!
//! easyocr 只接受文件路径，图片先写入临时文件，识别结束后删除。

use crate::config::EasyOcrConfig;
use crate::error::{KeyscanError, Result};
use crate::ocr::ocr_engine::OcrEngine;
use crate::preprocess::PreparedImage;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::process::Command;

const ENGINE_NAME: &str = "easyocr";

// ([[x, y], ...], 'text', 0.98)  或  ..., np.float64(0.98))
static RESULT_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\(\[.*\],\s*(?:'(?P<sq>(?:[^'\\]|\\.)*)'|"(?P<dq>(?:[^"\\]|\\.)*)"),\s*(?:np\.float\d*\()?(?P<conf>[0-9.eE+\-]+)\)?\)\s*$"#)
        .expect("valid easyocr line regex")
});

pub struct EasyOcrEngine {
    config: EasyOcrConfig,
}

impl EasyOcrEngine {
    pub fn new(config: EasyOcrConfig) -> Self {
        Self { config }
    }

    fn args(&self, image_path: &str) -> Vec<String> {
        vec![
            "-X".to_string(),
            "utf8".to_string(),
            "-m".to_string(),
            "easyocr.cli".to_string(),
            "-l".to_string(),
            self.config.lang.clone(),
            "-f".to_string(),
            image_path.to_string(),
            "--gpu".to_string(),
            python_bool(self.config.gpu),
            "--verbose".to_string(),
            python_bool(false),
        ]
    }
}

/// easyocr.cli 用 argparse `type=bool` 解析开关，只有空串会被当作 False
fn python_bool(value: bool) -> String {
    if value { "True" } else { "" }.to_string()
}

#[async_trait]
impl OcrEngine for EasyOcrEngine {
    async fn recognize(&self, image: &PreparedImage) -> Result<Vec<String>> {
        let temp_path = std::env::temp_dir().join(format!("keyscan_easyocr_{}.png", uuid::Uuid::new_v4()));
        tokio::fs::write(&temp_path, &image.png).await?;
        let cleanup_path = temp_path.clone();
        scopeguard::defer! {
            let _ = std::fs::remove_file(&cleanup_path);
        }

        let args = self.args(&temp_path.to_string_lossy());
        tracing::debug!("执行: {} {}", self.config.python, args.join(" "));

        let output = Command::new(&self.config.python)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| KeyscanError::engine(ENGINE_NAME, format!("启动 {} 失败: {}", self.config.python, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(KeyscanError::engine(
                ENGINE_NAME,
                format!("退出码 {}: {}", output.status, stderr.trim()),
            ));
        }

        let results = parse_output(&String::from_utf8_lossy(&output.stdout));
        for r in &results {
            tracing::debug!("easyocr: {:?} (置信度 {:?})", r.text, r.confidence);
        }
        Ok(results.into_iter().map(|r| r.text).collect())
    }

    fn name(&self) -> &str {
        ENGINE_NAME
    }

    async fn is_available(&self) -> bool {
        Command::new(&self.config.python)
            .args(["-c", "import easyocr"])
            .output()
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct EasyOcrLine {
    text: String,
    confidence: Option<f32>,
}

fn parse_output(stdout: &str) -> Vec<EasyOcrLine> {
    stdout.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<EasyOcrLine> {
    let caps = RESULT_LINE.captures(line.trim())?;
    let raw = caps.name("sq").or_else(|| caps.name("dq"))?.as_str();
    Some(EasyOcrLine {
        text: unescape_python(raw),
        confidence: caps.name("conf").and_then(|m| m.as_str().parse().ok()),
    })
}

/// 还原 Python repr 中的转义
fn unescape_python(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_result_tuples() {
        let out = "([[12, 8], [340, 8], [340, 40], [12, 40]], 'AbCd@1234-XyZ', 0.8731)\n\
                   ([[0, 50], [90, 50], [90, 70], [0, 70]], \"it's\", np.float64(0.55))\n\
                   Using CPU. Note: This module is much faster with a GPU.";
        let lines = parse_output(out);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text, "AbCd@1234-XyZ");
        assert_eq!(lines[0].confidence, Some(0.8731));
        assert_eq!(lines[1].text, "it's");
        assert_eq!(lines[1].confidence, Some(0.55));
    }

    #[test]
    fn unescapes_python_quotes() {
        let line = r"([[1, 1], [2, 2]], 'don\'t', 0.5)";
        assert_eq!(parse_line(line).unwrap().text, "don't");
    }

    #[test]
    fn ignores_noise() {
        assert!(parse_line("").is_none());
        assert!(parse_line("Downloading detection model").is_none());
    }

    #[test]
    fn builds_arguments_from_config() {
        let engine = EasyOcrEngine::new(EasyOcrConfig {
            gpu: true,
            ..EasyOcrConfig::default()
        });
        let args = engine.args("/tmp/x.png");
        assert_eq!(&args[2..8], &["-m", "easyocr.cli", "-l", "en", "-f", "/tmp/x.png"]);
        assert_eq!(&args[8..10], &["--gpu", "True"]);
        assert_eq!(&args[10..], &["--verbose", ""]);
    }

    #[test]
    fn disabled_gpu_is_passed_as_empty_string() {
        let engine = EasyOcrEngine::new(EasyOcrConfig {
            gpu: false,
            ..EasyOcrConfig::default()
        });
        let args = engine.args("/tmp/x.png");
        assert_eq!(&args[8..10], &["--gpu", ""]);
        assert!(!args.iter().any(|a| a == "False"));
    }
}
