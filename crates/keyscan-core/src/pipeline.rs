//! 完整流程：获取图片 -> 预处理 -> OCR -> 校验密钥 ->（人工确认）-> 输出

use crate::config::{KeyscanConfig, PreprocessConfig};
use crate::emit::{self, CommandTemplate};
use crate::error::{KeyscanError, Result};
use crate::fetch::{Fetcher, ImageSource};
use crate::ocr::{RecognizeMode, Recognition, Recognizer};
use crate::postprocess::KeyPolicy;
use crate::preprocess::{self, PreparedImage};
use crate::redact::{mask_key, redact_key_args};
use crate::review;
use std::io::{BufRead, Write};
use std::path::PathBuf;

/// 识别出密钥之后做什么
#[derive(Debug, Clone, Default)]
pub struct EmitOptions {
    /// 写入命令文件的路径；None 表示不写
    pub command_file: Option<PathBuf>,
    /// 直接启动目标程序
    pub run_direct: bool,
    /// 直接启动时的工作目录
    pub workdir: Option<PathBuf>,
    /// 输出前人工确认
    pub review: bool,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub key: String,
    pub recognition: Recognition,
    pub command_file: Option<PathBuf>,
    pub exit_status: Option<i32>,
}

pub struct Pipeline {
    fetcher: Fetcher,
    preprocess: PreprocessConfig,
    recognizer: Recognizer,
    policy: KeyPolicy,
    template: CommandTemplate,
}

impl Pipeline {
    pub fn from_config(config: &KeyscanConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            fetcher: Fetcher::new(&config.fetch)?,
            preprocess: config.preprocess.clone(),
            recognizer: Recognizer::from_config(config)?,
            policy: KeyPolicy::from_config(&config.key)?,
            template: CommandTemplate::from_config(&config.command),
        })
    }

    pub fn new(
        fetcher: Fetcher,
        preprocess: PreprocessConfig,
        recognizer: Recognizer,
        policy: KeyPolicy,
        template: CommandTemplate,
    ) -> Self {
        Self {
            fetcher,
            preprocess,
            recognizer,
            policy,
            template,
        }
    }

    async fn prepare(&self, source: &ImageSource) -> Result<PreparedImage> {
        let bytes = self.fetcher.fetch(source).await?;
        preprocess::prepare(&bytes, &self.preprocess)
    }

    /// 只做识别，不校验密钥格式
    pub async fn recognize(&self, source: &ImageSource) -> Result<Recognition> {
        let image = self.prepare(source).await?;
        self.recognizer.recognize(&image).await
    }

    /// 识别并校验密钥
    pub async fn extract(&self, source: &ImageSource) -> Result<(String, Recognition)> {
        let image = self.prepare(source).await?;
        recognize_key(&self.recognizer, &image, &self.policy).await
    }

    /// 完整流程，人工确认走 stdin/stderr
    pub async fn run(&self, source: &ImageSource, options: &EmitOptions) -> Result<RunReport> {
        self.run_with_input(
            source,
            options,
            std::io::BufReader::new(std::io::stdin()),
            std::io::stderr(),
        )
        .await
    }

    /// 同 [`Pipeline::run`]，人工确认从 `input` 读取、提示写到 `output`
    pub async fn run_with_input<R, W>(
        &self,
        source: &ImageSource,
        options: &EmitOptions,
        input: R,
        output: W,
    ) -> Result<RunReport>
    where
        R: BufRead + Send + 'static,
        W: Write + Send + 'static,
    {
        let (mut key, recognition) = self.extract(source).await?;
        tracing::info!("识别出密钥: {}", mask_key(&key));

        if options.review {
            let policy = self.policy.clone();
            // 阻塞读取放到专门的线程，不占用 runtime 的工作线程
            key = tokio::task::spawn_blocking(move || review::review_key(&key, &policy, input, output))
                .await
                .map_err(|e| KeyscanError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;
        }

        let mut report = RunReport {
            key,
            recognition,
            command_file: None,
            exit_status: None,
        };

        if let Some(path) = &options.command_file {
            let content = self.template.render(&report.key)?;
            tracing::debug!(
                "命令文件内容:\n{}",
                redact_key_args(&content, &self.template.key_arg)
            );
            report.command_file = Some(emit::write_command_file(path, &content, self.template.format)?);
        }

        if options.run_direct {
            report.exit_status = self
                .template
                .run_direct(&report.key, options.workdir.as_deref())
                .await?;
        }

        Ok(report)
    }
}

/// 按识别方式得到第一个合法密钥
///
/// First 模式逐个引擎尝试，前一个引擎的结果不合法时继续下一个；
/// Concat 模式合并所有引擎的结果后统一挑选。
pub async fn recognize_key(
    recognizer: &Recognizer,
    image: &PreparedImage,
    policy: &KeyPolicy,
) -> Result<(String, Recognition)> {
    if recognizer.mode() == RecognizeMode::Concat {
        let recognition = recognizer.recognize(image).await?;
        let key = policy.extract(&recognition.lines())?;
        return Ok((key, recognition));
    }

    let mut rejected: Vec<String> = Vec::new();
    let mut any_text = false;

    for engine in recognizer.engines() {
        let Some(recognition) = recognizer.recognize_with(engine.as_ref(), image).await else {
            continue;
        };
        any_text = true;

        match policy.extract(&recognition.lines()) {
            Ok(key) => {
                tracing::info!("{} 产出合法密钥", engine.name());
                return Ok((key, recognition));
            }
            Err(KeyscanError::KeyRejected(candidates)) => {
                tracing::warn!("{} 的结果不符合密钥格式，尝试下一个引擎", engine.name());
                rejected.extend(candidates);
            }
            Err(e) => return Err(e),
        }
    }

    if any_text {
        Err(KeyscanError::KeyRejected(rejected))
    } else {
        Err(KeyscanError::NoText)
    }
}
