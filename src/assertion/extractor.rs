use crate::assertion::types::AssertError;
use crate::http::Response;

/// 路径中的一段
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

/// 解析最小 JSON 路径语法：`$`、点号分隔的键、`[n]` 下标、`['key']`
fn parse_path(path: &str) -> Result<Vec<Segment>, AssertError> {
    let trimmed = path.trim();
    let body = trimmed
        .strip_prefix('$')
        .unwrap_or(trimmed)
        .trim_start_matches('.');

    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = body.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '.' => {
                if !current.is_empty() {
                    segments.push(Segment::Key(std::mem::take(&mut current)));
                }
            }
            '[' => {
                if !current.is_empty() {
                    segments.push(Segment::Key(std::mem::take(&mut current)));
                }
                let mut inner = String::new();
                for c in chars.by_ref() {
                    if c == ']' {
                        break;
                    }
                    inner.push(c);
                }
                let inner = inner.trim();
                let quoted = inner
                    .strip_prefix('\'')
                    .and_then(|s| s.strip_suffix('\''))
                    .or_else(|| inner.strip_prefix('"').and_then(|s| s.strip_suffix('"')));
                match quoted {
                    Some(key) => segments.push(Segment::Key(key.to_string())),
                    None => {
                        let index = inner.parse::<usize>().map_err(|_| {
                            AssertError::ExtractionError(format!(
                                "Invalid array index `{}` in path `{}`",
                                inner, path
                            ))
                        })?;
                        segments.push(Segment::Index(index));
                    }
                }
            }
            _ => current.push(ch),
        }
    }

    if !current.is_empty() {
        segments.push(Segment::Key(current));
    }

    Ok(segments)
}

/// 在 JSON 值上执行路径查询
pub fn extract_json_path<'a>(
    value: &'a serde_json::Value,
    path: &str,
) -> Result<&'a serde_json::Value, AssertError> {
    let mut current = value;
    for segment in parse_path(path)? {
        let next = match &segment {
            Segment::Key(key) => current.get(key.as_str()),
            Segment::Index(index) => current.get(*index),
        };
        current = next.ok_or_else(|| AssertError::PathNotFound(path.to_string()))?;
    }
    Ok(current)
}

/// 将 JSON 值转换为比较用字符串；字符串去掉一层引号
pub fn json_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// 从响应体中按路径取值
pub fn extract_from_body(response: &Response, path: &str) -> Result<String, AssertError> {
    let json_value: serde_json::Value = serde_json::from_str(&response.body)?;
    let value = extract_json_path(&json_value, path)?;
    Ok(json_to_string(value))
}
