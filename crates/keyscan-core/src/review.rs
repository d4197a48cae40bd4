//! 人工确认识别出的密钥

use crate::error::{KeyscanError, Result};
use crate::postprocess::KeyPolicy;
use std::io::{BufRead, Write};

/// 显示候选密钥并等待确认
///
/// 空行接受，`n`/`q` 放弃，其他输入视为手动更正后的密钥（仍需符合格式）。
pub fn review_key<R, W>(candidate: &str, policy: &KeyPolicy, mut input: R, mut output: W) -> Result<String>
where
    R: BufRead,
    W: Write,
{
    writeln!(output, "识别结果: {}", candidate)?;

    loop {
        write!(output, "回车确认，输入正确的密钥替换，n 放弃: ")?;
        output.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Err(KeyscanError::Aborted);
        }

        let answer = line.trim();
        match answer {
            "" => return Ok(candidate.to_string()),
            "n" | "N" | "q" | "Q" => return Err(KeyscanError::Aborted),
            _ => {
                let replacement = policy.normalize(answer);
                if policy.is_valid(&replacement) {
                    tracing::info!("密钥已手动更正");
                    return Ok(replacement);
                }
                writeln!(output, "格式不正确: {}", replacement)?;
            }
        }
    }
}
