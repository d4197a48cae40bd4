use crate::config::PaddleConfig;
use crate::error::{KeyscanError, Result};
use crate::ocr::ocr_engine::OcrEngine;
use crate::preprocess::PreparedImage;
use async_trait::async_trait;
use reqwest::multipart;
use std::time::Duration;

const ENGINE_NAME: &str = "paddle";

/// PaddleOCR 模型的 HTTP 服务（rapidocr_api 兼容接口）
pub struct PaddleOcrEngine {
    api_url: String,
    client: reqwest::Client,
}

impl PaddleOcrEngine {
    pub fn new(config: &PaddleConfig) -> Result<Self> {
        // 环境变量优先，便于临时指向别的服务
        let api_url = std::env::var("KEYSCAN_PADDLE_API_URL").unwrap_or_else(|_| config.api_url.clone());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .no_proxy()
            .build()
            .map_err(|e| KeyscanError::Config(format!("创建 HTTP 客户端失败: {}", e)))?;

        Ok(Self { api_url, client })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn docs_url(&self) -> String {
        match self.api_url.rfind('/') {
            Some(pos) if pos > "https://".len() => format!("{}/docs", &self.api_url[..pos]),
            _ => format!("{}/docs", self.api_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl OcrEngine for PaddleOcrEngine {
    async fn recognize(&self, image: &PreparedImage) -> Result<Vec<String>> {
        let part = multipart::Part::bytes(image.png.clone())
            .file_name("image.png")
            .mime_str("image/png")
            .map_err(|e| KeyscanError::engine(ENGINE_NAME, e))?;
        let form = multipart::Form::new().part("image", part);

        tracing::debug!("发送 OCR 请求到: {}", self.api_url);

        let response = self
            .client
            .post(&self.api_url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| KeyscanError::engine(ENGINE_NAME, format!("请求失败，服务地址 {}: {}", self.api_url, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(KeyscanError::engine(
                ENGINE_NAME,
                format!("服务返回错误: {} - {}", status, body),
            ));
        }

        let result: serde_json::Value = response
            .json()
            .await
            .map_err(|e| KeyscanError::engine(ENGINE_NAME, format!("解析响应 JSON 失败: {}", e)))?;

        Ok(extract_texts(&result))
    }

    fn name(&self) -> &str {
        ENGINE_NAME
    }

    async fn is_available(&self) -> bool {
        self.client
            .get(self.docs_url())
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

/// 从响应中提取文本
///
/// 返回格式: {"0": {"rec_txt": "文本", "dt_boxes": [...], "score": "0.9"}, ...}
/// 没有识别到文字时服务返回空对象或字符串。
fn extract_texts(result: &serde_json::Value) -> Vec<String> {
    let Some(obj) = result.as_object() else {
        return Vec::new();
    };

    // 按 key 数值排序（"0", "1", ..., "10"）
    let mut keys: Vec<_> = obj.keys().collect();
    keys.sort_by_key(|k| k.parse::<u32>().unwrap_or(u32::MAX));

    keys.into_iter()
        .filter_map(|key| obj.get(key))
        .filter_map(|item| item.get("rec_txt").and_then(|v| v.as_str()))
        .map(|text| text.to_string())
        .collect()
}
