//! Token 摘要编解码
//!
//! 原始 token 从不落盘，存储层只保存 `HMAC-SHA256(raw_token, server_secret)`
//! 的十六进制摘要。验证时重新计算摘要，并使用常量时间比较。
//!
//! ## 示例
//!
//! ```rust
//! use magiclink::codec::{ServerSecret, TokenCodec};
//!
//! let codec = TokenCodec::new(ServerSecret::new(b"0123456789abcdef0123456789abcdef").unwrap());
//!
//! let digest = codec.digest("raw-token");
//! assert!(codec.verify("raw-token", &digest));
//! assert!(!codec.verify("raw-tokem", &digest));
//! ```

use std::fmt;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::{CryptoError, Error, Result};
use crate::random::{constant_time_compare, generate_random_bytes};

type HmacSha256 = Hmac<Sha256>;

/// 服务端密钥的最小长度（字节）
pub const MIN_SECRET_LENGTH: usize = 32;

// ============================================================================
// 服务端密钥
// ============================================================================

/// 站点级 HMAC 密钥
///
/// `Debug` 输出被隐藏，释放时清零。
#[derive(Clone)]
pub struct ServerSecret(Vec<u8>);

impl ServerSecret {
    /// 从字节创建密钥
    ///
    /// # Errors
    ///
    /// 长度不足 [`MIN_SECRET_LENGTH`] 时返回 [`CryptoError::InvalidKey`]
    pub fn new(bytes: impl AsRef<[u8]>) -> Result<Self> {
        let bytes = bytes.as_ref();
        if bytes.len() < MIN_SECRET_LENGTH {
            return Err(Error::Crypto(CryptoError::InvalidKey(format!(
                "server secret must be at least {} bytes, got {}",
                MIN_SECRET_LENGTH,
                bytes.len()
            ))));
        }
        Ok(Self(bytes.to_vec()))
    }

    /// 随机生成一个密钥（仅适合单进程/测试场景，重启后旧链接全部失效）
    pub fn generate() -> Result<Self> {
        Ok(Self(generate_random_bytes(MIN_SECRET_LENGTH)?))
    }

    fn expose(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for ServerSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ServerSecret([REDACTED])")
    }
}

impl Drop for ServerSecret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

// ============================================================================
// 摘要函数
// ============================================================================

/// 计算原始 token 的摘要（小写十六进制）
pub fn digest(raw_token: &str, server_secret: &ServerSecret) -> String {
    hex::encode(mac_bytes(raw_token, server_secret))
}

/// 校验原始 token 是否与候选摘要匹配
///
/// 候选摘要按字节常量时间比较；格式错误（长度不对、非十六进制）的摘要
/// 只会导致不匹配，不会报错。
pub fn verify(raw_token: &str, server_secret: &ServerSecret, candidate_digest: &str) -> bool {
    let expected = digest(raw_token, server_secret);
    constant_time_compare(expected.as_bytes(), candidate_digest.as_bytes())
}

fn mac_bytes(raw_token: &str, server_secret: &ServerSecret) -> Vec<u8> {
    // HMAC 接受任意长度的密钥
    let mut mac = HmacSha256::new_from_slice(server_secret.expose())
        .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
    mac.update(raw_token.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

// ============================================================================
// TokenCodec
// ============================================================================

/// 绑定了服务端密钥的摘要编解码器
#[derive(Debug, Clone)]
pub struct TokenCodec {
    secret: ServerSecret,
}

impl TokenCodec {
    /// 创建编解码器
    pub fn new(secret: ServerSecret) -> Self {
        Self { secret }
    }

    /// 计算摘要
    pub fn digest(&self, raw_token: &str) -> String {
        digest(raw_token, &self.secret)
    }

    /// 校验摘要
    pub fn verify(&self, raw_token: &str, candidate_digest: &str) -> bool {
        verify(raw_token, &self.secret, candidate_digest)
    }
}
