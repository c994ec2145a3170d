//! AWS Signature Version 4.
//!
//! Canonical request, string to sign and the
//! date → region → service → `aws4_request` HMAC-SHA256 key chain.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::http::Request;
use crate::{Result, RumanError};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// SigV4 凭据
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwsCredentials {
    pub access_key: String,
    pub secret_key: String,
    pub session_token: Option<String>,
    pub region: String,
    pub service: String,
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| RumanError::Other(format!("HMAC key error: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// 派生签名密钥：kDate → kRegion → kService → kSigning
pub fn derive_signing_key(secret: &str, date: &str, region: &str, service: &str) -> Result<Vec<u8>> {
    let k_date = hmac(format!("AWS4{}", secret).as_bytes(), date.as_bytes())?;
    let k_region = hmac(&k_date, region.as_bytes())?;
    let k_service = hmac(&k_region, service.as_bytes())?;
    hmac(&k_service, b"aws4_request")
}

/// RFC 3986 编码，仅保留非保留字符
pub fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b'/' if !encode_slash => out.push('/'),
            other => out.push_str(&format!("%{:02X}", other)),
        }
    }
    out
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && let Some(byte) = std::str::from_utf8(&bytes[i + 1..i + 3])
                .ok()
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
        {
            out.push(byte);
            i += 3;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn canonical_uri(url: &url::Url) -> String {
    let path = url.path();
    if path.is_empty() {
        return "/".to_string();
    }
    path.split('/')
        .map(|segment| uri_encode(&percent_decode(segment), true))
        .collect::<Vec<_>>()
        .join("/")
}

fn canonical_query(url: &url::Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (uri_encode(&k, true), uri_encode(&v, true)))
        .collect();
    pairs.sort();
    pairs
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

fn host_header(url: &url::Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

/// 构建规范请求，返回 (规范请求, SignedHeaders)
///
/// `headers` 应已包含 host 与 x-amz-date。
pub fn canonical_request(
    method: &str,
    url: &url::Url,
    headers: &[(String, String)],
    payload_hash: &str,
) -> (String, String) {
    let mut normalized: Vec<(String, String)> = Vec::new();
    for (key, value) in headers {
        let key = key.trim().to_ascii_lowercase();
        let value = value.split_whitespace().collect::<Vec<_>>().join(" ");
        match normalized.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => {
                existing.push(',');
                existing.push_str(&value);
            }
            None => normalized.push((key, value)),
        }
    }
    normalized.sort_by(|a, b| a.0.cmp(&b.0));

    let canonical_headers: String = normalized
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v))
        .collect();
    let signed_headers = normalized
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let creq = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method.to_uppercase(),
        canonical_uri(url),
        canonical_query(url),
        canonical_headers,
        signed_headers,
        payload_hash
    );
    (creq, signed_headers)
}

/// 为请求签名，写入 x-amz-date / x-amz-security-token / Authorization
pub fn sign(request: &mut Request, creds: &AwsCredentials, now: DateTime<Utc>) -> Result<()> {
    let url = url::Url::parse(&request.url)?;
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();
    let payload_hash = sha256_hex(request.body.as_deref().unwrap_or_default().as_bytes());

    request.remove_header("authorization");
    request.set_header("x-amz-date", amz_date.clone());
    if let Some(token) = creds.session_token.as_deref().filter(|t| !t.is_empty()) {
        request.set_header("x-amz-security-token", token);
    }
    if creds.service == "s3" {
        request.set_header("x-amz-content-sha256", payload_hash.clone());
    }

    let mut headers = request.headers.clone();
    if !request.has_header("host") {
        headers.push(("host".to_string(), host_header(&url)));
    }

    let (creq, signed_headers) =
        canonical_request(request.method.as_str(), &url, &headers, &payload_hash);
    let scope = format!("{}/{}/{}/aws4_request", date, creds.region, creds.service);
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        amz_date,
        scope,
        sha256_hex(creq.as_bytes())
    );

    let key = derive_signing_key(&creds.secret_key, &date, &creds.region, &creds.service)?;
    let signature = to_hex(&hmac(&key, string_to_sign.as_bytes())?);

    request.set_header(
        "Authorization",
        format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM, creds.access_key, scope, signed_headers, signature
        ),
    );
    Ok(())
}
