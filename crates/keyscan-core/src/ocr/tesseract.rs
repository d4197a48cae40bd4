//! Tesseract OCR 引擎（CLI 包装）
//!
//! 图片通过 stdin 交给 `tesseract stdin stdout`，不落盘。

use crate::config::TesseractConfig;
use crate::error::{KeyscanError, Result};
use crate::ocr::ocr_engine::OcrEngine;
use crate::preprocess::PreparedImage;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

const ENGINE_NAME: &str = "tesseract";

pub struct TesseractEngine {
    config: TesseractConfig,
}

impl TesseractEngine {
    pub fn new(config: TesseractConfig) -> Self {
        Self { config }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.config.binary);
        if let Some(tessdata) = &self.config.tessdata_dir {
            cmd.env("TESSDATA_PREFIX", tessdata);
        }
        cmd
    }

    /// tesseract 的命令行参数（不含可执行文件本身）
    fn args(&self) -> Vec<String> {
        let mut args = vec![
            "stdin".to_string(),
            "stdout".to_string(),
            "-l".to_string(),
            self.config.lang.clone(),
            "--psm".to_string(),
            self.config.psm.to_string(),
        ];
        if let Some(oem) = self.config.oem {
            args.push("--oem".to_string());
            args.push(oem.to_string());
        }
        args
    }

    /// `tesseract --version` 的第一行
    pub async fn version(&self) -> Result<String> {
        let output = self
            .command()
            .arg("--version")
            .output()
            .await
            .map_err(|e| KeyscanError::EngineUnavailable(format!("{}: {}", self.config.binary, e)))?;

        // 旧版本把版本信息打印到 stderr
        let text = if output.stdout.is_empty() {
            String::from_utf8_lossy(&output.stderr).to_string()
        } else {
            String::from_utf8_lossy(&output.stdout).to_string()
        };

        text.lines()
            .next()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .ok_or_else(|| KeyscanError::EngineUnavailable(format!("{} 没有输出版本信息", self.config.binary)))
    }
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    async fn recognize(&self, image: &PreparedImage) -> Result<Vec<String>> {
        let start = Instant::now();
        let args = self.args();
        tracing::debug!("执行: {} {}", self.config.binary, args.join(" "));

        let mut child = self
            .command()
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| KeyscanError::engine(ENGINE_NAME, format!("启动 {} 失败: {}", self.config.binary, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&image.png)
                .await
                .map_err(|e| KeyscanError::engine(ENGINE_NAME, format!("写入图片失败: {}", e)))?;
            // drop 关闭 stdin，tesseract 才会开始识别
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| KeyscanError::engine(ENGINE_NAME, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(KeyscanError::engine(
                ENGINE_NAME,
                format!("退出码 {}: {}", output.status, stderr.trim()),
            ));
        }

        let texts = parse_output(&String::from_utf8_lossy(&output.stdout));
        tracing::debug!(
            "tesseract 识别完成，耗时: {} ms，结果数: {}",
            start.elapsed().as_millis(),
            texts.len()
        );
        Ok(texts)
    }

    fn name(&self) -> &str {
        ENGINE_NAME
    }

    async fn is_available(&self) -> bool {
        match self.version().await {
            Ok(v) => {
                tracing::debug!("检测到 {}", v);
                true
            }
            Err(e) => {
                tracing::debug!("{}", e);
                false
            }
        }
    }
}

/// 按行拆分 tesseract 输出，去掉空行和换页符
fn parse_output(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(|l| l.trim_matches(|c: char| c.is_whitespace() || c == '\u{c}'))
        .filter(|l| !l.is_empty())
        .map(|l| l.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lines_and_drops_form_feed() {
        let out = "  Trial key:\n\nABcd@efGH-1234  \n\u{c}";
        assert_eq!(parse_output(out), vec!["Trial key:", "ABcd@efGH-1234"]);
    }

    #[test]
    fn builds_arguments_from_config() {
        let engine = TesseractEngine::new(TesseractConfig {
            lang: "eng+chi_sim".to_string(),
            psm: 6,
            oem: Some(1),
            ..TesseractConfig::default()
        });
        assert_eq!(
            engine.args(),
            vec!["stdin", "stdout", "-l", "eng+chi_sim", "--psm", "6", "--oem", "1"]
        );
    }

    #[tokio::test]
    async fn missing_binary_is_unavailable() {
        let engine = TesseractEngine::new(TesseractConfig {
            binary: "keyscan-no-such-tesseract".to_string(),
            ..TesseractConfig::default()
        });
        assert!(!engine.is_available().await);

        let image = PreparedImage {
            png: vec![0u8; 4],
            width: 1,
            height: 1,
        };
        let err = engine.recognize(&image).await.unwrap_err();
        assert!(matches!(err, KeyscanError::Engine { .. }));
    }
}
