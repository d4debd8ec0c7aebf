//! 防伪 nonce
//!
//! 签发端点在任何状态变更之前都要校验 nonce。nonce 绑定到会话 ID 和动作名，
//! 换一个会话或动作都无法通过校验。
//!
//! ## Token 格式
//!
//! 三段 base64url，使用 `.` 分隔：
//! - 随机数据
//! - 签发时间戳（大端 u64）
//! - `HMAC-SHA256(secret, session_id | action | random | timestamp)`
//!
//! ## 示例
//!
//! ```rust
//! use magiclink::nonce::{NonceConfig, NonceGuard};
//!
//! let guard = NonceGuard::new(NonceConfig::default());
//! let nonce = guard.create("session-1", "generate_magic_link_nonce").unwrap();
//!
//! assert!(guard.verify(&nonce, "session-1", "generate_magic_link_nonce").unwrap());
//! assert!(!guard.verify(&nonce, "session-2", "generate_magic_link_nonce").unwrap());
//! ```

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use subtle::ConstantTimeEq;

use crate::error::{Error, Result};
use crate::random::generate_random_bytes;

type HmacSha256 = Hmac<Sha256>;

/// 签发端点使用的 nonce 动作名
pub const GENERATE_LINK_ACTION: &str = "generate_magic_link_nonce";

/// Nonce 配置
#[derive(Debug, Clone)]
pub struct NonceConfig {
    /// 用于签名的密钥
    secret: Vec<u8>,
    /// 随机部分长度（字节）
    nonce_length: usize,
    /// 有效期
    ttl: Duration,
}

impl Default for NonceConfig {
    fn default() -> Self {
        // 正常情况下随机数生成不会失败
        let secret = generate_random_bytes(32).expect("Failed to generate random secret");
        Self {
            secret,
            nonce_length: 16,
            ttl: Duration::from_secs(24 * 3600),
        }
    }
}

impl NonceConfig {
    /// 创建新的配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置签名密钥
    ///
    /// # 参数
    ///
    /// * `secret` - HMAC 密钥；多实例部署时各实例需使用同一密钥
    ///
    /// # 示例
    ///
    /// ```rust
    /// use magiclink::{NonceConfig, NonceGuard};
    ///
    /// let guard = NonceGuard::new(NonceConfig::new().with_secret(b"shared-nonce-secret"));
    /// let nonce = guard.create("session-1", "generate_magic_link_nonce").unwrap();
    /// assert!(guard.verify(&nonce, "session-1", "generate_magic_link_nonce").unwrap());
    /// ```
    pub fn with_secret(mut self, secret: &[u8]) -> Self {
        self.secret = secret.to_vec();
        self
    }

    /// 设置有效期
    ///
    /// # 参数
    ///
    /// * `ttl` - nonce 生成后可用的时长，按秒计
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

/// 会话绑定的 nonce 生成与校验
#[derive(Debug, Clone)]
pub struct NonceGuard {
    config: NonceConfig,
}

impl NonceGuard {
    /// 创建 nonce 守卫
    pub fn new(config: NonceConfig) -> Self {
        Self { config }
    }

    /// 为会话和动作生成 nonce
    pub fn create(&self, session_id: &str, action: &str) -> Result<String> {
        let random_data = generate_random_bytes(self.config.nonce_length)?;
        let now = unix_now()?;
        let signature = self.sign(session_id, action, &random_data, now)?;

        Ok(format!(
            "{}.{}.{}",
            URL_SAFE_NO_PAD.encode(&random_data),
            URL_SAFE_NO_PAD.encode(now.to_be_bytes()),
            URL_SAFE_NO_PAD.encode(signature)
        ))
    }

    /// 校验 nonce
    ///
    /// 格式错误、过期或签名不符都返回 `Ok(false)`。
    pub fn verify(&self, nonce: &str, session_id: &str, action: &str) -> Result<bool> {
        let parts: Vec<&str> = nonce.split('.').collect();
        if parts.len() != 3 {
            return Ok(false);
        }

        let (Ok(random_data), Ok(timestamp_bytes), Ok(provided)) = (
            URL_SAFE_NO_PAD.decode(parts[0]),
            URL_SAFE_NO_PAD.decode(parts[1]),
            URL_SAFE_NO_PAD.decode(parts[2]),
        ) else {
            return Ok(false);
        };

        let Ok(timestamp_arr) = <[u8; 8]>::try_from(timestamp_bytes.as_slice()) else {
            return Ok(false);
        };
        let timestamp = u64::from_be_bytes(timestamp_arr);

        let now = unix_now()?;
        if now > timestamp.saturating_add(self.config.ttl.as_secs()) {
            return Ok(false);
        }

        let expected = self.sign(session_id, action, &random_data, timestamp)?;
        Ok(provided.ct_eq(&expected).into())
    }

    fn sign(
        &self,
        session_id: &str,
        action: &str,
        random: &[u8],
        timestamp: u64,
    ) -> Result<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(&self.config.secret)
            .map_err(|e| Error::internal(format!("HMAC key error: {}", e)))?;
        // 每个字段带长度前缀
        for field in [session_id.as_bytes(), action.as_bytes(), random] {
            mac.update(&(field.len() as u64).to_be_bytes());
            mac.update(field);
        }
        mac.update(&timestamp.to_be_bytes());
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

fn unix_now() -> Result<u64> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| Error::internal(format!("system clock error: {}", e)))?
        .as_secs())
}
