//! HTTP Digest (RFC 7616, MD5) challenge/response.

use rand::Rng;
use std::collections::HashMap;

/// 按逗号切分挑战参数，保留引号内的逗号
fn split_challenge_pairs(value: &str) -> Vec<String> {
    let mut pairs = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;

    for ch in value.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }

        match ch {
            '\\' if in_quotes => {
                current.push(ch);
                escaped = true;
            }
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            ',' if !in_quotes => {
                let segment = current.trim();
                if !segment.is_empty() {
                    pairs.push(segment.to_string());
                }
                current.clear();
            }
            _ => current.push(ch),
        }
    }

    let segment = current.trim();
    if !segment.is_empty() {
        pairs.push(segment.to_string());
    }

    pairs
}

/// 解析 `WWW-Authenticate: Digest ...`，非 Digest 挑战返回 None
pub fn parse_challenge(value: &str) -> Option<HashMap<String, String>> {
    let trimmed = value.trim();
    if !trimmed.to_ascii_lowercase().starts_with("digest ") {
        return None;
    }

    let payload = trimmed
        .split_once(' ')
        .map(|(_, rest)| rest.trim())
        .unwrap_or_default();

    let mut challenge = HashMap::new();
    for segment in split_challenge_pairs(payload) {
        let Some((key, raw_value)) = segment.split_once('=') else {
            continue;
        };

        let key = key.trim().to_ascii_lowercase();
        if key.is_empty() {
            continue;
        }

        let raw_value = raw_value.trim();
        let parsed = raw_value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(raw_value);
        challenge.insert(key, parsed.to_string());
    }

    if challenge.is_empty() {
        None
    } else {
        Some(challenge)
    }
}

fn md5_hex(value: &str) -> String {
    format!("{:x}", md5::compute(value.as_bytes()))
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// 构建 `Authorization: Digest ...` 头
///
/// `uri` 为请求路径加查询串；仅支持 MD5 算法。
pub fn authorization(
    method: &str,
    uri: &str,
    username: &str,
    password: &str,
    challenge: &HashMap<String, String>,
    cnonce: Option<&str>,
) -> Result<String, String> {
    let realm = challenge
        .get("realm")
        .ok_or_else(|| "Digest challenge missing realm".to_string())?;
    let nonce = challenge
        .get("nonce")
        .ok_or_else(|| "Digest challenge missing nonce".to_string())?;

    let algorithm = challenge
        .get("algorithm")
        .map(|value| value.trim().to_ascii_uppercase())
        .unwrap_or_else(|| "MD5".to_string());
    if algorithm != "MD5" {
        return Err(format!("Unsupported Digest algorithm: {}", algorithm));
    }

    let ha1 = md5_hex(&format!("{}:{}:{}", username, realm, password));
    let ha2 = md5_hex(&format!("{}:{}", method.to_uppercase(), uri));

    let qop_auth = challenge
        .get("qop")
        .map(|qop| {
            qop.split(',')
                .any(|entry| entry.trim().eq_ignore_ascii_case("auth"))
        })
        .unwrap_or(false);

    let nonce_count = "00000001";
    let cnonce = cnonce.map(str::to_string).unwrap_or_else(|| {
        let seed: u64 = rand::rng().random();
        md5_hex(&format!("{}:{}:{}", username, nonce, seed))
    });

    let response = if qop_auth {
        md5_hex(&format!(
            "{}:{}:{}:{}:auth:{}",
            ha1, nonce, nonce_count, cnonce, ha2
        ))
    } else {
        md5_hex(&format!("{}:{}:{}", ha1, nonce, ha2))
    };

    let mut fields = vec![
        format!("username=\"{}\"", escape(username)),
        format!("realm=\"{}\"", escape(realm)),
        format!("nonce=\"{}\"", escape(nonce)),
        format!("uri=\"{}\"", escape(uri)),
        format!("response=\"{}\"", response),
        "algorithm=MD5".to_string(),
    ];

    if qop_auth {
        fields.push("qop=auth".to_string());
        fields.push(format!("nc={}", nonce_count));
        fields.push(format!("cnonce=\"{}\"", escape(&cnonce)));
    }

    if let Some(opaque) = challenge.get("opaque").filter(|v| !v.is_empty()) {
        fields.push(format!("opaque=\"{}\"", escape(opaque)));
    }

    Ok(format!("Digest {}", fields.join(", ")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_challenge_with_quoted_commas() {
        let challenge = parse_challenge(
            r#"Digest realm="a, b", qop="auth,auth-int", nonce="abc", opaque="xyz""#,
        )
        .unwrap();
        assert_eq!(challenge["realm"], "a, b");
        assert_eq!(challenge["qop"], "auth,auth-int");
        assert_eq!(challenge["nonce"], "abc");
    }

    #[test]
    fn test_parse_non_digest() {
        assert!(parse_challenge("Basic realm=\"x\"").is_none());
    }

    #[test]
    fn test_authorization_rfc2617_example() {
        // RFC 2617 §3.5
        let challenge = parse_challenge(
            r#"Digest realm="testrealm@host.com", qop="auth,auth-int", nonce="dcd98b7102dd2f0e8b11d0f600bfb0c093", opaque="5ccc069c403ebaf9f0171e9517f40e41""#,
        )
        .unwrap();
        let header = authorization(
            "GET",
            "/dir/index.html",
            "Mufasa",
            "Circle Of Life",
            &challenge,
            Some("0a4f113b"),
        )
        .unwrap();

        assert!(header.contains("response=\"6629fae49393a05397450978507c4ef1\""));
        assert!(header.contains("opaque=\"5ccc069c403ebaf9f0171e9517f40e41\""));
        assert!(header.contains("nc=00000001"));
    }

    #[test]
    fn test_authorization_rejects_unknown_algorithm() {
        let mut challenge = HashMap::new();
        challenge.insert("realm".to_string(), "r".to_string());
        challenge.insert("nonce".to_string(), "n".to_string());
        challenge.insert("algorithm".to_string(), "SHA-512".to_string());
        assert!(authorization("GET", "/", "u", "p", &challenge, None).is_err());
    }
}
