use crate::http::Response;
use colored::*;

pub enum ResponseFormat {
    Compact,
    Verbose,
}

/// 响应的终端展示
pub struct ResponseFormatter {
    format: ResponseFormat,
    color: bool,
}

impl ResponseFormatter {
    pub fn new(format: ResponseFormat) -> Self {
        Self {
            format,
            color: true,
        }
    }

    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    pub fn format(&self, response: &Response) -> String {
        let mut output = vec![self.status_line(response), self.timing_line(response)];
        match self.format {
            ResponseFormat::Compact => {
                let body = &response.body;
                if !body.is_empty() && body.len() < 200 {
                    output.push(try_format_json(body).unwrap_or_else(|| body.to_string()));
                } else if !body.is_empty() {
                    output.push(format!("Body: {} bytes", response.size));
                }
            }
            ResponseFormat::Verbose => {
                output.push(String::new());
                output.push(self.paint("Headers:", |s| s.blue().bold()));
                for (key, value) in &response.headers {
                    // 折叠的重复 Header 逐行展示
                    for line in value.split('\n') {
                        output.push(self.paint(&format!("   {}: {}", key, line), |s| s.blue()));
                    }
                }
                if !response.body.is_empty() {
                    output.push(String::new());
                    output.push(self.paint("Body:", |s| s.blue().bold()));
                    output.push(
                        try_format_json(&response.body).unwrap_or_else(|| response.body.clone()),
                    );
                }
            }
        }
        output.join("\n")
    }

    fn status_line(&self, response: &Response) -> String {
        let line = if response.status == 0 {
            format!("{}: {}", response.status_text, first_line(&response.body))
        } else {
            format!("HTTP {} {}", response.status, response.status_text)
        };
        if response.is_success() {
            self.paint(&line, |s| s.green())
        } else if response.is_client_error() || response.is_redirect() {
            self.paint(&line, |s| s.yellow())
        } else {
            self.paint(&line, |s| s.red())
        }
    }

    fn timing_line(&self, response: &Response) -> String {
        let line = format!("Time: {}ms  Size: {} B", response.time, response.size);
        self.paint(&line, |s| s.cyan())
    }

    fn paint(&self, text: &str, style: impl Fn(&str) -> ColoredString) -> String {
        if self.color {
            style(text).to_string()
        } else {
            text.to_string()
        }
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}

/// 尝试把 body 格式化为缩进 JSON
fn try_format_json(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    serde_json::to_string_pretty(&value).ok()
}
