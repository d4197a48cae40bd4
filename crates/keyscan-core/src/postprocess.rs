//! 从 OCR 文本中提取密钥
//!
//! 密钥必须整串匹配配置的正则；不匹配的识别结果直接拒绝，不做猜测性修正。
//! 清理规则只在配置里显式列出时才会执行。

use crate::config::PreprocessConfig;
use crate::error::{KeyscanError, Result};
use crate::ocr::{OcrEngine, RecognizeMode, Recognizer};
use crate::preprocess;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// 可选的清理规则，按配置顺序执行
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "camelCase")]
pub enum CleanupRule {
    /// 把连续重复的字符折叠成一个，如 "a@@b" -> "a@b"
    Dedupe { ch: char },
    /// 字符串替换，用于 OCR 常混淆的字形
    Substitute { from: String, to: String },
    Lowercase,
    RemoveWhitespace,
}

impl CleanupRule {
    pub fn apply(&self, input: &str) -> String {
        match self {
            Self::Dedupe { ch } => {
                let mut out = String::with_capacity(input.len());
                let mut prev: Option<char> = None;
                for c in input.chars() {
                    if c == *ch && prev == Some(*ch) {
                        continue;
                    }
                    out.push(c);
                    prev = Some(c);
                }
                out
            }
            Self::Substitute { from, to } => {
                if from.is_empty() {
                    input.to_string()
                } else {
                    input.replace(from.as_str(), to)
                }
            }
            Self::Lowercase => input.to_lowercase(),
            Self::RemoveWhitespace => input.chars().filter(|c| !c.is_whitespace()).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct KeyPolicy {
    pattern: Regex,
    rules: Vec<CleanupRule>,
}

impl KeyPolicy {
    pub fn new(pattern: &str, rules: Vec<CleanupRule>) -> Result<Self> {
        let anchored = format!("^(?:{})$", pattern);
        Ok(Self {
            pattern: Regex::new(&anchored)?,
            rules,
        })
    }

    pub fn from_config(config: &crate::config::KeyConfig) -> Result<Self> {
        Self::new(&config.pattern, config.cleanup.clone())
    }

    pub fn is_valid(&self, key: &str) -> bool {
        self.pattern.is_match(key)
    }

    /// 规范化单个候选：去掉首尾引号/标点和内部空白，再执行清理规则
    pub fn normalize(&self, raw: &str) -> String {
        let trimmed = raw.trim_matches(|c: char| {
            c.is_whitespace() || matches!(c, '"' | '\'' | '`' | '“' | '”' | '‘' | '’' | ':' | ';' | ',')
        });
        let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
        self.rules
            .iter()
            .fold(compact, |acc, rule| rule.apply(&acc))
    }

    /// 候选顺序：每一行，然后所有行直接拼接（密钥被折成多行的情况）
    pub fn candidates(&self, lines: &[&str]) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let mut push = |c: String| {
            if !c.is_empty() && !out.contains(&c) {
                out.push(c);
            }
        };

        for line in lines {
            push(self.normalize(line));
        }
        if lines.len() > 1 {
            push(self.normalize(&lines.concat()));
        }
        out
    }

    /// 返回第一个整串匹配的候选
    pub fn extract(&self, lines: &[&str]) -> Result<String> {
        let candidates = self.candidates(lines);
        for candidate in &candidates {
            if self.is_valid(candidate) {
                return Ok(candidate.clone());
            }
            tracing::debug!("候选不匹配密钥格式: {:?}", candidate);
        }
        Err(KeyscanError::KeyRejected(candidates))
    }
}

/// 单一入口：图片字节 -> 密钥
///
/// 使用默认预处理，按顺序尝试各引擎，第一个产出合法密钥的引擎胜出。
pub async fn extract_key(
    image_bytes: &[u8],
    engines: Vec<Box<dyn OcrEngine>>,
    policy: &KeyPolicy,
) -> Result<String> {
    let image = preprocess::prepare(image_bytes, &PreprocessConfig::default())?;
    let recognizer = Recognizer::new(engines, RecognizeMode::First);
    let (key, _) = crate::pipeline::recognize_key(&recognizer, &image, policy).await?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_KEY_PATTERN;
    use crate::ocr::tests::FakeEngine;
    use crate::preprocess::tests::png_bytes;

    fn default_policy() -> KeyPolicy {
        KeyPolicy::new(DEFAULT_KEY_PATTERN, Vec::new()).unwrap()
    }

    #[test]
    fn dedupe_collapses_runs_only() {
        let rule = CleanupRule::Dedupe { ch: '@' };
        assert_eq!(rule.apply("ab@@@cd@ef"), "ab@cd@ef");
        assert_eq!(rule.apply("aa@@"), "aa@");
    }

    #[test]
    fn substitute_and_lowercase() {
        let rules = vec![
            CleanupRule::Substitute {
                from: "0".to_string(),
                to: "O".to_string(),
            },
            CleanupRule::Lowercase,
        ];
        let policy = KeyPolicy::new("[a-z]+", rules).unwrap();
        assert_eq!(policy.normalize("F00BAR"), "foobar");
    }

    #[test]
    fn rules_deserialize_from_json() {
        let json = r#"[
            {"rule": "dedupe", "ch": "@"},
            {"rule": "substitute", "from": "|", "to": "l"},
            {"rule": "lowercase"},
            {"rule": "removeWhitespace"}
        ]"#;
        let rules: Vec<CleanupRule> = serde_json::from_str(json).unwrap();
        assert_eq!(rules.len(), 4);
        assert_eq!(rules[0], CleanupRule::Dedupe { ch: '@' });
        assert_eq!(rules[3], CleanupRule::RemoveWhitespace);
    }

    #[test]
    fn pattern_must_match_whole_candidate() {
        let policy = KeyPolicy::new("[A-Z]{4}-[0-9]{4}", Vec::new()).unwrap();
        assert!(policy.is_valid("ABCD-1234"));
        assert!(!policy.is_valid("xABCD-1234"));
        assert!(!policy.is_valid("ABCD-12345"));
    }

    #[test]
    fn extracts_first_matching_line() {
        let policy = KeyPolicy::new("[A-Z]{4}-[0-9]{4}", Vec::new()).unwrap();
        let key = policy
            .extract(&["Your trial key:", " \"ABCD-1234\" ", "WXYZ-9999"])
            .unwrap();
        assert_eq!(key, "ABCD-1234");
    }

    #[test]
    fn joins_key_split_across_lines() {
        let policy = KeyPolicy::new("[A-Z]{4}-[0-9]{4}", Vec::new()).unwrap();
        assert_eq!(policy.extract(&["ABCD-", "1234"]).unwrap(), "ABCD-1234");
    }

    #[test]
    fn strips_interior_whitespace() {
        let policy = default_policy();
        assert_eq!(policy.extract(&["  ab cd@ef 12  "]).unwrap(), "abcd@ef12");
    }

    #[test]
    fn non_conforming_output_is_rejected() {
        let policy = KeyPolicy::new("[A-Z]{4}-[0-9]{4}", Vec::new()).unwrap();
        match policy.extract(&["hello", "world"]) {
            Err(KeyscanError::KeyRejected(candidates)) => {
                assert_eq!(candidates, vec!["hello", "world", "helloworld"]);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn invalid_pattern_is_an_error() {
        assert!(matches!(
            KeyPolicy::new("(unclosed", Vec::new()),
            Err(KeyscanError::Regex(_))
        ));
    }

    #[tokio::test]
    async fn extract_key_falls_back_to_next_engine() {
        let policy = KeyPolicy::new("[A-Z]{4}-[0-9]{4}", Vec::new()).unwrap();
        let engines: Vec<Box<dyn OcrEngine>> = vec![
            Box::new(FakeEngine::ok("noisy", &["ABCO-l234"])),
            Box::new(FakeEngine::ok("clean", &["ABCD-1234"])),
        ];

        let key = extract_key(&png_bytes(40, 10), engines, &policy).await.unwrap();
        assert_eq!(key, "ABCD-1234");
    }
}
