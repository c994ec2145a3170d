use serde::{Deserialize, Serialize};

/// 传输层返回的结构化响应
///
/// status 为 0 表示请求没有得到 HTTP 响应（网络错误、超时、脚本中止等），
/// 此时 body 为错误描述。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub status: u16,
    pub status_text: String,
    /// 重复的 Header 以换行合并
    pub headers: Vec<(String, String)>,
    pub body: String,
    /// 耗时（毫秒）
    pub time: u64,
    /// body 字节数
    pub size: u64,
    pub content_type: String,
}

impl Response {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        Self {
            status,
            status_text: reason_phrase(status).to_string(),
            headers: Vec::new(),
            size: body.len() as u64,
            body,
            time: 0,
            content_type: "text/plain".to_string(),
        }
    }

    /// 网络层错误的伪响应
    pub fn error(message: impl Into<String>) -> Self {
        Self::pseudo("Error", message)
    }

    /// status 为 0 的伪响应，例如 "Script Error" / "Skipped"
    pub fn pseudo(status_text: &str, message: impl Into<String>) -> Self {
        Self {
            status_text: status_text.to_string(),
            ..Self::new(0, message)
        }
    }

    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        if key.eq_ignore_ascii_case("content-type") {
            self.content_type = value.to_string();
        }
        self.headers.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_time(mut self, time: u64) -> Self {
        self.time = time;
        self
    }

    /// 忽略大小写获取 Header
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..=299).contains(&self.status)
    }

    pub fn is_redirect(&self) -> bool {
        (300..=399).contains(&self.status)
    }

    pub fn is_client_error(&self) -> bool {
        (400..=499).contains(&self.status)
    }

    pub fn is_server_error(&self) -> bool {
        (500..=599).contains(&self.status)
    }

    /// 没有得到真实的 HTTP 响应
    pub fn is_transport_failure(&self) -> bool {
        self.status == 0
    }

    pub fn json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_str(&self.body)
    }
}

pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        0 => "Error",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        422 => "Unprocessable Entity",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_is_status_zero() {
        let resp = Response::error("connection refused");
        assert_eq!(resp.status, 0);
        assert_eq!(resp.status_text, "Error");
        assert!(resp.is_transport_failure());
        assert_eq!(resp.size, "connection refused".len() as u64);
    }

    #[test]
    fn test_with_header_tracks_content_type() {
        let resp = Response::new(200, "{}").with_header("Content-Type", "application/json");
        assert_eq!(resp.content_type, "application/json");
        assert_eq!(resp.header("content-type"), Some("application/json"));
        assert!(resp.is_success());
    }
}
