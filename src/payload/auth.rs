use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, SecondsFormat, Utc};
use rand::Rng;
use sha1::{Digest, Sha1};

use crate::Result;
use crate::collection::{ApiKeyLocation, Auth};
use crate::http::{DigestCredentials, Request};
use crate::payload::sigv4::{self, AwsCredentials};

/// 对认证描述中的每个字符串字段做变量解析
pub fn resolve_auth<F>(auth: &Auth, resolve: F) -> Auth
where
    F: Fn(&str) -> String,
{
    match auth {
        Auth::None => Auth::None,
        Auth::Bearer { token } => Auth::Bearer {
            token: resolve(token),
        },
        Auth::Basic { username, password } => Auth::Basic {
            username: resolve(username),
            password: resolve(password),
        },
        Auth::ApiKey {
            key,
            value,
            location,
        } => Auth::ApiKey {
            key: resolve(key),
            value: resolve(value),
            location: *location,
        },
        Auth::Digest { username, password } => Auth::Digest {
            username: resolve(username),
            password: resolve(password),
        },
        Auth::Ntlm {
            username,
            password,
            domain,
            workstation,
        } => Auth::Ntlm {
            username: resolve(username),
            password: resolve(password),
            domain: resolve(domain),
            workstation: resolve(workstation),
        },
        Auth::AwsV4 {
            access_key,
            secret_key,
            session_token,
            region,
            service,
        } => Auth::AwsV4 {
            access_key: resolve(access_key),
            secret_key: resolve(secret_key),
            session_token: session_token.as_deref().map(&resolve),
            region: resolve(region),
            service: resolve(service),
        },
        Auth::Wsse { username, password } => Auth::Wsse {
            username: resolve(username),
            password: resolve(password),
        },
    }
}

/// 将认证写入请求（Header、查询参数或传输提示）
pub fn apply_auth(auth: &Auth, request: &mut Request, now: DateTime<Utc>) -> Result<()> {
    match auth {
        Auth::None => {}

        Auth::Bearer { token } => {
            if !token.trim().is_empty() {
                request.set_header("Authorization", format!("Bearer {}", token.trim()));
            }
        }

        Auth::Basic { username, password } => {
            if !username.is_empty() || !password.is_empty() {
                let encoded = BASE64.encode(format!("{}:{}", username, password));
                request.set_header("Authorization", format!("Basic {}", encoded));
            }
        }

        Auth::ApiKey {
            key,
            value,
            location,
        } => {
            if !key.trim().is_empty() {
                match location {
                    ApiKeyLocation::Header => request.set_header(key.trim(), value.clone()),
                    ApiKeyLocation::Query => {
                        let mut url = url::Url::parse(&request.url)?;
                        url.query_pairs_mut().append_pair(key.trim(), value);
                        request.url = url.to_string();
                    }
                }
            }
        }

        Auth::Digest { username, password } => {
            request.hints.digest = Some(DigestCredentials {
                username: username.clone(),
                password: password.clone(),
            });
        }

        Auth::Ntlm {
            username,
            domain,
            workstation,
            ..
        } => {
            let (_, domain) = normalize_ntlm_identity(username, domain);
            let workstation = if workstation.trim().is_empty() {
                "RUMAN"
            } else {
                workstation.trim()
            };
            request.set_header(
                "Authorization",
                format!("NTLM {}", BASE64.encode(ntlm_negotiate_message(&domain, workstation))),
            );
        }

        Auth::AwsV4 {
            access_key,
            secret_key,
            session_token,
            region,
            service,
        } => {
            let creds = AwsCredentials {
                access_key: access_key.clone(),
                secret_key: secret_key.clone(),
                session_token: session_token.clone(),
                region: region.clone(),
                service: service.clone(),
            };
            sigv4::sign(request, &creds, now)?;
        }

        Auth::Wsse { username, password } => {
            let nonce: [u8; 16] = rand::rng().random();
            let created = now.to_rfc3339_opts(SecondsFormat::Secs, true);
            request.set_header("Authorization", "WSSE profile=\"UsernameToken\"");
            request.set_header("X-WSSE", wsse_header(username, password, &nonce, &created));
        }
    }
    Ok(())
}

/// `X-WSSE` UsernameToken，PasswordDigest = Base64(SHA1(nonce + created + password))
pub fn wsse_header(username: &str, password: &str, nonce: &[u8], created: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(nonce);
    hasher.update(created.as_bytes());
    hasher.update(password.as_bytes());
    let digest = BASE64.encode(hasher.finalize());

    format!(
        "UsernameToken Username=\"{}\", PasswordDigest=\"{}\", Nonce=\"{}\", Created=\"{}\"",
        username,
        digest,
        BASE64.encode(nonce),
        created
    )
}

/// 未显式给出 domain 时，从 `DOMAIN\user` 中拆出
pub fn normalize_ntlm_identity(username: &str, domain: &str) -> (String, String) {
    let username = username.trim();
    let domain = domain.trim();
    if !domain.is_empty() {
        return (username.to_string(), domain.to_string());
    }

    if let Some((domain_part, user_part)) = username.split_once('\\') {
        let (domain_part, user_part) = (domain_part.trim(), user_part.trim());
        if !domain_part.is_empty() && !user_part.is_empty() {
            return (user_part.to_string(), domain_part.to_string());
        }
    }

    (username.to_string(), String::new())
}

const NTLM_NEGOTIATE_UNICODE: u32 = 0x0000_0001;
const NTLM_NEGOTIATE_OEM: u32 = 0x0000_0002;
const NTLM_REQUEST_TARGET: u32 = 0x0000_0004;
const NTLM_NEGOTIATE_NTLM: u32 = 0x0000_0200;
const NTLM_DOMAIN_SUPPLIED: u32 = 0x0000_1000;
const NTLM_WORKSTATION_SUPPLIED: u32 = 0x0000_2000;
const NTLM_ALWAYS_SIGN: u32 = 0x0000_8000;

/// NTLM Type-1 (Negotiate) 消息
///
/// 固定 32 字节头后紧跟 OEM 编码的 domain 与 workstation。
pub fn ntlm_negotiate_message(domain: &str, workstation: &str) -> Vec<u8> {
    let domain = domain.to_ascii_uppercase().into_bytes();
    let workstation = workstation.to_ascii_uppercase().into_bytes();

    let mut flags = NTLM_NEGOTIATE_UNICODE
        | NTLM_NEGOTIATE_OEM
        | NTLM_REQUEST_TARGET
        | NTLM_NEGOTIATE_NTLM
        | NTLM_ALWAYS_SIGN;
    if !domain.is_empty() {
        flags |= NTLM_DOMAIN_SUPPLIED;
    }
    if !workstation.is_empty() {
        flags |= NTLM_WORKSTATION_SUPPLIED;
    }

    let header_len: u32 = 32;
    let domain_offset = header_len;
    let workstation_offset = header_len + domain.len() as u32;

    let mut message = Vec::with_capacity(32 + domain.len() + workstation.len());
    message.extend_from_slice(b"NTLMSSP\0");
    message.extend_from_slice(&1u32.to_le_bytes());
    message.extend_from_slice(&flags.to_le_bytes());
    push_security_buffer(&mut message, domain.len() as u16, domain_offset);
    push_security_buffer(&mut message, workstation.len() as u16, workstation_offset);
    message.extend_from_slice(&domain);
    message.extend_from_slice(&workstation);
    message
}

fn push_security_buffer(message: &mut Vec<u8>, len: u16, offset: u32) {
    message.extend_from_slice(&len.to_le_bytes());
    message.extend_from_slice(&len.to_le_bytes());
    message.extend_from_slice(&offset.to_le_bytes());
}
