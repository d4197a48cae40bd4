//! 生成激活命令文件，或直接以参数列表启动目标程序

use crate::config::{write_atomic, CommandConfig};
use crate::error::{KeyscanError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// 命令文件格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptFormat {
    /// Windows .bat
    #[default]
    Batch,
    /// POSIX sh
    Shell,
}

impl ScriptFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Batch => "batch",
            Self::Shell => "shell",
        }
    }

    fn line_ending(&self) -> &'static str {
        match self {
            Self::Batch => "\r\n",
            Self::Shell => "\n",
        }
    }

    /// 检查密钥能否原样嵌入该格式的命令文件
    pub fn check_key(&self, key: &str) -> Result<()> {
        let unsafe_char = key.chars().find(|c| {
            c.is_control()
                || match self {
                    // cmd.exe 会解释这些字符，即使在引号内（% 和 !）
                    Self::Batch => matches!(c, '"' | '%' | '^' | '&' | '|' | '<' | '>' | '!'),
                    // 单引号内只有 ' 需要转义，已在 shell_quote 中处理
                    Self::Shell => false,
                }
        });

        match unsafe_char {
            Some(ch) => Err(KeyscanError::UnsafeKey {
                ch,
                format: self.as_str(),
            }),
            None => Ok(()),
        }
    }
}

impl FromStr for ScriptFormat {
    type Err = KeyscanError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "batch" | "bat" | "cmd" => Ok(Self::Batch),
            "shell" | "sh" => Ok(Self::Shell),
            other => Err(KeyscanError::Config(format!("未知的命令文件格式: {}", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandTemplate {
    pub executable: String,
    pub key_arg: String,
    pub args: Vec<String>,
    pub format: ScriptFormat,
}

impl CommandTemplate {
    pub fn from_config(config: &CommandConfig) -> Self {
        Self {
            executable: config.executable.clone(),
            key_arg: config.key_arg.clone(),
            args: config.args.clone(),
            format: config.format,
        }
    }

    /// 渲染命令文件内容
    pub fn render(&self, key: &str) -> Result<String> {
        self.format.check_key(key)?;

        let generated = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        let lines: Vec<String> = match self.format {
            ScriptFormat::Batch => {
                let mut command = format!("{} {}\"{}\"", self.executable, self.key_arg, key);
                for arg in &self.args {
                    command.push(' ');
                    command.push_str(arg);
                }
                vec![
                    "@echo off".to_string(),
                    format!("REM generated by keyscan at {}", generated),
                    "cd /d %~dp0".to_string(),
                    command,
                ]
            }
            ScriptFormat::Shell => {
                let program = if Path::new(&self.executable).is_relative() {
                    format!("./{}", self.executable)
                } else {
                    self.executable.clone()
                };
                let mut command = format!(
                    "exec {} {}",
                    shell_quote(&program),
                    shell_quote(&format!("{}{}", self.key_arg, key))
                );
                for arg in &self.args {
                    command.push(' ');
                    command.push_str(&shell_quote(arg));
                }
                vec![
                    "#!/bin/sh".to_string(),
                    format!("# generated by keyscan at {}", generated),
                    "cd \"$(dirname \"$0\")\" || exit 1".to_string(),
                    command,
                ]
            }
        };

        let eol = self.format.line_ending();
        let mut content = lines.join(eol);
        content.push_str(eol);
        Ok(content)
    }

    /// 直接启动目标程序，密钥作为独立参数传入，不经过 shell
    pub async fn run_direct(&self, key: &str, workdir: Option<&Path>) -> Result<Option<i32>> {
        if let Some(ch) = key.chars().find(|c| c.is_control()) {
            return Err(KeyscanError::UnsafeKey {
                ch,
                format: "argument",
            });
        }

        let mut program = PathBuf::from(&self.executable);
        if let Some(dir) = workdir {
            if program.is_relative() && dir.join(&program).exists() {
                program = dir.join(&program);
            }
        }

        let mut cmd = tokio::process::Command::new(&program);
        cmd.arg(format!("{}{}", self.key_arg, key)).args(&self.args);
        if let Some(dir) = workdir {
            cmd.current_dir(dir);
        }

        tracing::info!("启动: {} ({} 个参数)", program.display(), self.args.len() + 1);
        let status = cmd.status().await.map_err(|source| KeyscanError::Spawn {
            program: program.display().to_string(),
            source,
        })?;

        tracing::info!("{} 退出: {}", program.display(), status);
        Ok(status.code())
    }
}

/// 单引号包裹，内部的 ' 转成 '\''
fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '-' | '_' | '.' | '='))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// 写入命令文件，返回绝对路径
pub fn write_command_file(path: &Path, content: &str, format: ScriptFormat) -> Result<PathBuf> {
    write_atomic(path, content.as_bytes())?;

    #[cfg(unix)]
    if format == ScriptFormat::Shell {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    }
    #[cfg(not(unix))]
    let _ = format;

    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    tracing::info!("已生成命令文件: {}", absolute.display());
    Ok(absolute)
}
