use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, WWW_AUTHENTICATE};
use tracing::{debug, warn};

use crate::Result;
use crate::RumanError;
use crate::http::digest;
use crate::http::request::{Request, TransportHints};
use crate::http::response::Response;

/// 发送单个请求的传输原语
///
/// 实现方不得返回错误：网络、超时、TLS 等失败都以 status 0 的响应表示。
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &Request) -> Response;
}

/// 基于 reqwest 的传输实现
#[derive(Clone)]
pub struct ReqwestTransport {
    inner: reqwest::Client,
    default_hints: TransportHints,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        Self::with_hints(TransportHints::default())
    }

    /// 以运行级默认值构建共享客户端
    pub fn with_hints(default_hints: TransportHints) -> Result<Self> {
        Ok(Self {
            inner: Self::build_client(&default_hints)?,
            default_hints,
        })
    }

    fn build_client(hints: &TransportHints) -> Result<reqwest::Client> {
        let mut builder =
            reqwest::Client::builder().redirect(reqwest::redirect::Policy::limited(10));

        if let Some(ms) = hints.timeout_ms.filter(|ms| *ms > 0) {
            builder = builder.timeout(Duration::from_millis(ms));
        }

        if let Some(proxy_url) = hints.proxy_url.as_deref().filter(|p| !p.is_empty()) {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| RumanError::ConfigError(format!("Invalid proxy URL: {}", e)))?;
            builder = builder.proxy(proxy);
        }

        if !hints.verify_tls {
            builder = builder.danger_accept_invalid_certs(true);
        }

        Ok(builder.build()?)
    }

    /// 连接相关的提示与默认值一致时复用共享客户端
    fn client_for(&self, hints: &TransportHints) -> Result<reqwest::Client> {
        let same_connection = hints.timeout_ms == self.default_hints.timeout_ms
            && hints.proxy_url == self.default_hints.proxy_url
            && hints.verify_tls == self.default_hints.verify_tls;
        if same_connection {
            Ok(self.inner.clone())
        } else {
            Self::build_client(hints)
        }
    }

    fn build_headers(headers: &[(String, String)]) -> Result<HeaderMap> {
        let mut map = HeaderMap::new();
        for (key, value) in headers {
            if key.trim().is_empty() {
                continue;
            }
            let name = HeaderName::from_bytes(key.trim().as_bytes())
                .map_err(|e| RumanError::ParseError(format!("Invalid header name `{}`: {}", key, e)))?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                RumanError::ParseError(format!("Invalid header value for `{}`: {}", key, e))
            })?;
            map.append(name, value);
        }
        Ok(map)
    }

    async fn execute(&self, request: &Request) -> Result<Response> {
        let client = self.client_for(&request.hints)?;
        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| RumanError::ParseError(format!("Invalid HTTP method: {}", e)))?;
        let url = reqwest::Url::parse(&request.url)?;
        let base_headers = Self::build_headers(&request.headers)?;

        let max_retries = request.hints.retry_count;
        let retry_delay = Duration::from_millis(request.hints.retry_delay_ms);
        let mut last_error: Option<reqwest::Error> = None;

        for attempt in 0..=max_retries {
            if attempt > 0 {
                debug!("Retrying {} {} (attempt {})", method, url, attempt + 1);
                tokio::time::sleep(retry_delay).await;
            }

            let mut headers = base_headers.clone();
            let mut digest_retried = false;
            let start = Instant::now();

            loop {
                let mut builder = client
                    .request(method.clone(), url.clone())
                    .headers(headers.clone());
                if request.method.allows_body()
                    && let Some(body) = &request.body
                {
                    builder = builder.body(body.clone());
                }

                let response = match builder.send().await {
                    Ok(response) => response,
                    Err(e) => {
                        last_error = Some(e);
                        break;
                    }
                };

                if let Some(creds) = &request.hints.digest
                    && !digest_retried
                    && response.status() == reqwest::StatusCode::UNAUTHORIZED
                    && let Some(challenge) = extract_digest_challenge(response.headers())
                {
                    let mut uri = url.path().to_string();
                    if let Some(query) = url.query() {
                        uri.push('?');
                        uri.push_str(query);
                    }
                    let header = digest::authorization(
                        method.as_str(),
                        &uri,
                        creds.username.trim(),
                        &creds.password,
                        &challenge,
                        None,
                    )
                    .map_err(RumanError::Other)?;
                    let value = HeaderValue::from_str(&header)
                        .map_err(|e| RumanError::Other(format!("Invalid digest header: {}", e)))?;
                    headers.insert(AUTHORIZATION, value);
                    digest_retried = true;
                    continue;
                }

                let elapsed = start.elapsed().as_millis() as u64;
                return to_response(response, elapsed).await;
            }
        }

        Err(last_error
            .map(RumanError::HttpError)
            .unwrap_or_else(|| RumanError::Other("Request failed".to_string())))
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &Request) -> Response {
        match self.execute(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("{} {} failed: {}", request.method, request.url, e);
                Response::error(format!("Request failed: {}", e))
            }
        }
    }
}

fn extract_digest_challenge(
    headers: &HeaderMap,
) -> Option<std::collections::HashMap<String, String>> {
    headers
        .get_all(WWW_AUTHENTICATE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|text| text.split('\n'))
        .find_map(digest::parse_challenge)
}

async fn to_response(response: reqwest::Response, elapsed: u64) -> Result<Response> {
    let status = response.status();
    let status_text = status.canonical_reason().unwrap_or("Unknown").to_string();

    let mut headers: Vec<(String, String)> = Vec::new();
    for (key, value) in response.headers() {
        let key = key.to_string();
        let value = value.to_str().unwrap_or_default().to_string();
        match headers.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => {
                existing.push('\n');
                existing.push_str(&value);
            }
            None => headers.push((key, value)),
        }
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("text/plain")
        .to_string();

    let bytes = response.bytes().await?;
    let body = String::from_utf8_lossy(&bytes).to_string();

    Ok(Response {
        status: status.as_u16(),
        status_text,
        headers,
        body,
        time: elapsed,
        size: bytes.len() as u64,
        content_type,
    })
}
