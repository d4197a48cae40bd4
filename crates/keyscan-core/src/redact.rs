/// 日志中显示的密钥只保留首尾各 4 个字符
pub fn mask_key(key: &str) -> String {
    mask_middle(key, 4, 4)
}

/// 把 `key=` / `KEY="..."` 之后的值替换为掩码，用于记录命令行
pub fn redact_key_args(input: &str, key_arg: &str) -> String {
    if key_arg.is_empty() {
        return input.to_string();
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(pos) = rest.find(key_arg) {
        out.push_str(&rest[..pos + key_arg.len()]);
        rest = &rest[pos + key_arg.len()..];

        let quoted = rest.starts_with('"');
        if quoted {
            out.push('"');
            rest = &rest[1..];
        }
        let end = rest
            .find(|c: char| if quoted { c == '"' } else { c.is_whitespace() })
            .unwrap_or(rest.len());
        out.push_str(&mask_key(&rest[..end]));
        rest = &rest[end..];
    }
    out.push_str(rest);
    out
}

fn mask_middle(s: &str, keep_head: usize, keep_tail: usize) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= keep_head + keep_tail {
        return "*".repeat(chars.len());
    }

    let head: String = chars[..keep_head].iter().collect();
    let tail: String = chars[chars.len() - keep_tail..].iter().collect();
    format!("{}****{}", head, tail)
}
