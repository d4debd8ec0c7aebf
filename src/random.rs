//! 安全随机数生成模块
//!
//! 为 magic link token、会话 ID、nonce 提供密码学安全的随机数据。

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{TryRngCore, rngs::OsRng};

use crate::error::{CryptoError, Error, Result};

/// magic link token 的最小熵（字节）
pub const MIN_TOKEN_BYTES: usize = 16;

/// 生成指定长度的随机字节数组
///
/// 直接从操作系统 CSPRNG 读取
///
/// # Example
///
/// ```rust
/// use magiclink::random::generate_random_bytes;
///
/// let bytes = generate_random_bytes(32).unwrap();
/// assert_eq!(bytes.len(), 32);
/// ```
pub fn generate_random_bytes(length: usize) -> Result<Vec<u8>> {
    let mut bytes = vec![0u8; length];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| Error::Crypto(CryptoError::RngFailed(format!("{:?}", e))))?;
    Ok(bytes)
}

/// 生成 magic link 原始 token
///
/// 十六进制编码，可以直接放进 URL 查询参数，长度为 `byte_length * 2`。
///
/// # Errors
///
/// `byte_length` 小于 [`MIN_TOKEN_BYTES`]（128 位）时返回错误。
///
/// # Example
///
/// ```rust
/// use magiclink::random::generate_magic_token;
///
/// let token = generate_magic_token(20).unwrap();
/// assert_eq!(token.len(), 40);
/// assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
/// ```
pub fn generate_magic_token(byte_length: usize) -> Result<String> {
    if byte_length < MIN_TOKEN_BYTES {
        return Err(Error::Crypto(CryptoError::InvalidKey(format!(
            "token must carry at least {} bytes of entropy, got {}",
            MIN_TOKEN_BYTES, byte_length
        ))));
    }
    let bytes = generate_random_bytes(byte_length)?;
    Ok(hex::encode(bytes))
}

/// 生成 Base64 URL 安全随机字符串（不含填充）
///
/// 用于会话 ID 和 nonce 的随机部分
pub fn generate_random_base64_url(byte_length: usize) -> Result<String> {
    let bytes = generate_random_bytes(byte_length)?;
    Ok(URL_SAFE_NO_PAD.encode(&bytes))
}

/// 常量时间比较两个字节切片
///
/// 长度不同直接返回 false（长度本身不是秘密）
pub fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_bytes_not_repeated() {
        let a = generate_random_bytes(MIN_TOKEN_BYTES).unwrap();
        let b = generate_random_bytes(MIN_TOKEN_BYTES).unwrap();
        assert_eq!(a.len(), MIN_TOKEN_BYTES);
        assert_ne!(a, b);
    }

    #[test]
    fn test_generate_magic_token() {
        let token = generate_magic_token(20).unwrap();
        assert_eq!(token.len(), 40);
        assert!(token.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')));
        assert_ne!(token, generate_magic_token(20).unwrap());
    }

    #[test]
    fn test_generate_magic_token_rejects_low_entropy() {
        assert!(matches!(
            generate_magic_token(MIN_TOKEN_BYTES - 1),
            Err(Error::Crypto(CryptoError::InvalidKey(_)))
        ));
        assert!(generate_magic_token(MIN_TOKEN_BYTES).is_ok());
    }

    #[test]
    fn test_session_id_is_url_safe() {
        // 32 字节无填充编码为 43 个字符
        let id = generate_random_base64_url(32).unwrap();
        assert_eq!(id.len(), 43);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_constant_time_compare_digests() {
        let digest = "9f86d081884c7d659a2feaa0c55ad015";
        assert!(constant_time_compare(digest.as_bytes(), digest.as_bytes()));
        assert!(!constant_time_compare(digest.as_bytes(), &digest.as_bytes()[1..]));
        assert!(!constant_time_compare(digest.as_bytes(), b""));
    }
}
