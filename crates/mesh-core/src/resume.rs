//! # resume 模块说明（ResumeToken）
//!
//! ## 意图（Why）
//! - §3/§6 要求续传令牌是无状态、可验证的不透明字节：`RecipientId`、
//!   `Offset`、`IssuedAt` 三元组加上集群共享密钥的 HMAC-SHA256，整体再
//!   base64 编码。不持久化任何服务端状态——全部状态可从 offset 推出。
//! - 选用 `hmac` + `sha2` + `base64`：教师仓库本身没有续传令牌这类机制，
//!   但 `efir369999-junomontanaagibot/rust-core` 的 Cargo.toml 同样绑定了
//!   sha2/hmac 家族做认证摘要，`other_examples/manifests/*` 普遍引入
//!   `base64` 做线上编码——三者结合是本仓库在语料中能找到的最贴近先例。
//!
//! ## 契约（What）
//! - [`ResumeToken::issue`] 生成新令牌；[`ResumeToken::verify`] 校验 HMAC
//!   与 `T_tok` 年龄窗口，返回 `(RecipientId, Offset)` 或 [`MeshError::Protocol`]。

use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::MeshError;

type HmacSha256 = Hmac<Sha256>;

const SEPARATOR: u8 = b'|';

/// 已解析、待校验年龄的续传令牌。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeToken {
    pub recipient_id: String,
    pub offset: u64,
    pub issued_at_ms: u64,
}

impl ResumeToken {
    /// 签发新令牌并编码为线上可携带的不透明字符串。
    pub fn issue(recipient_id: impl Into<String>, offset: u64, issued_at_ms: u64, secret: &[u8]) -> String {
        let recipient_id = recipient_id.into();
        let payload = signing_payload(&recipient_id, offset, issued_at_ms);
        let tag = sign(secret, &payload);

        let mut wire = payload;
        wire.push(SEPARATOR);
        wire.extend_from_slice(&tag);
        base64::engine::general_purpose::STANDARD.encode(wire)
    }

    /// 校验签名与 `T_tok` 年龄窗口，返回解析出的令牌内容。
    ///
    /// 失败——签名不合法、格式损坏或已过期——统一映射为
    /// [`MeshError::Protocol`]（§7 "invalid ResumeToken (bad HMAC or stale)"）。
    pub fn verify(wire: &str, secret: &[u8], now_ms: u64, token_ttl_ms: u64) -> Result<Self, MeshError> {
        let raw = base64::engine::general_purpose::STANDARD
            .decode(wire)
            .map_err(|e| MeshError::protocol(format!("resume token is not valid base64: {e}")))?;

        // payload 的最后一段（32 字节 HMAC-SHA256 标签）之前有一个分隔符。
        if raw.len() <= 32 {
            return Err(MeshError::protocol("resume token too short"));
        }
        let split_at = raw.len() - 32;
        if raw[split_at - 1] != SEPARATOR {
            return Err(MeshError::protocol("resume token malformed: missing tag separator"));
        }
        let payload = &raw[..split_at - 1];
        let tag = &raw[split_at..];

        verify_sign(secret, payload, tag)
            .map_err(|_| MeshError::protocol("resume token signature mismatch"))?;

        let parsed = parse_payload(payload)?;

        let age_ms = now_ms.saturating_sub(parsed.issued_at_ms);
        if age_ms > token_ttl_ms {
            return Err(MeshError::protocol(format!(
                "resume token expired: age={age_ms}ms ttl={token_ttl_ms}ms"
            )));
        }

        Ok(parsed)
    }
}

fn signing_payload(recipient_id: &str, offset: u64, issued_at_ms: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(recipient_id.len() + 32);
    buf.extend_from_slice(recipient_id.as_bytes());
    buf.push(SEPARATOR);
    buf.extend_from_slice(offset.to_string().as_bytes());
    buf.push(SEPARATOR);
    buf.extend_from_slice(issued_at_ms.to_string().as_bytes());
    buf
}

fn sign(secret: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

fn verify_sign(secret: &[u8], payload: &[u8], tag: &[u8]) -> Result<(), ()> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| ())?;
    mac.update(payload);
    mac.verify_slice(tag).map_err(|_| ())
}

fn parse_payload(payload: &[u8]) -> Result<ResumeToken, MeshError> {
    let text = std::str::from_utf8(payload)
        .map_err(|_| MeshError::protocol("resume token payload is not utf-8"))?;
    let mut parts = text.splitn(3, '|');
    let recipient_id = parts
        .next()
        .ok_or_else(|| MeshError::protocol("resume token missing recipient_id"))?
        .to_string();
    let offset: u64 = parts
        .next()
        .ok_or_else(|| MeshError::protocol("resume token missing offset"))?
        .parse()
        .map_err(|_| MeshError::protocol("resume token offset is not an integer"))?;
    let issued_at_ms: u64 = parts
        .next()
        .ok_or_else(|| MeshError::protocol("resume token missing issued_at"))?
        .parse()
        .map_err(|_| MeshError::protocol("resume token issued_at is not an integer"))?;

    Ok(ResumeToken {
        recipient_id,
        offset,
        issued_at_ms,
    })
}
