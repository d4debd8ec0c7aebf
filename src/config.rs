//! Magic Link 配置
//!
//! 默认配置与宿主插件的既有行为一致：token 可重复使用、不过期、
//! 原始 token 与摘要一起保存。需要更严格的语义时使用
//! [`MagicLinkConfig::high_security`] 或逐项开启。
//!
//! ## 示例
//!
//! ```rust
//! use magiclink::config::{MagicLinkConfig, RawTokenRetention};
//! use std::time::Duration;
//!
//! let config = MagicLinkConfig::new("https://example.com/wp-login.php")
//!     .with_ttl(Duration::from_secs(600))      // 10 分钟过期
//!     .with_consume_on_verify(true)            // 兑换后作废
//!     .with_retention(RawTokenRetention::DigestOnly);
//! assert!(config.validate().is_ok());
//! ```

use std::env;
use std::time::Duration;

use url::Url;

use crate::codec::{MIN_SECRET_LENGTH, ServerSecret};
use crate::error::{ConfigError, Result};
use crate::random::MIN_TOKEN_BYTES;

/// 读取签名密钥的环境变量
pub const ENV_SECRET: &str = "MAGIC_LINK_SECRET";
/// 读取登录地址的环境变量
pub const ENV_LOGIN_URL: &str = "MAGIC_LINK_LOGIN_URL";
/// 读取有效期（秒）的环境变量
pub const ENV_TTL_SECS: &str = "MAGIC_LINK_TTL_SECS";
/// 读取“兑换后作废”开关的环境变量
pub const ENV_CONSUME_ON_VERIFY: &str = "MAGIC_LINK_CONSUME_ON_VERIFY";

/// 原始 token 的保留策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RawTokenRetention {
    /// 与摘要一起保存原始 token，管理端可以重新展示链接
    #[default]
    Retain,
    /// 只保存摘要
    DigestOnly,
}

/// Magic Link 配置
#[derive(Debug, Clone)]
pub struct MagicLinkConfig {
    /// 登录入口地址，兑换链接挂在它上面
    pub login_url: String,

    /// Token 长度（随机字节数，十六进制编码后翻倍）
    pub token_length: usize,

    /// Token 有效期；`None` 表示永不过期
    pub ttl: Option<Duration>,

    /// 验证成功后是否删除匹配的记录
    pub consume_on_verify: bool,

    /// 每个用户最多保留的记录数，超出时删除最旧的；0 表示不限制
    pub max_active_per_user: usize,

    /// 原始 token 保留策略
    pub retention: RawTokenRetention,
}

impl Default for MagicLinkConfig {
    fn default() -> Self {
        Self {
            login_url: "http://localhost/wp-login.php".to_string(),
            token_length: 20, // 160 bits
            ttl: None,
            consume_on_verify: false,
            max_active_per_user: 0,
            retention: RawTokenRetention::Retain,
        }
    }
}

impl MagicLinkConfig {
    /// 使用给定登录地址创建默认配置
    pub fn new(login_url: impl Into<String>) -> Self {
        Self {
            login_url: login_url.into(),
            ..Self::default()
        }
    }

    /// 设置登录地址
    ///
    /// # 参数
    ///
    /// * `login_url` - 登录入口的绝对地址，兑换参数追加在它的查询串上
    ///
    /// # 示例
    ///
    /// ```rust
    /// use magiclink::MagicLinkConfig;
    ///
    /// let config = MagicLinkConfig::default().with_login_url("https://example.com/login");
    /// assert_eq!(config.login_url, "https://example.com/login");
    /// ```
    pub fn with_login_url(mut self, login_url: impl Into<String>) -> Self {
        self.login_url = login_url.into();
        self
    }

    /// 设置 token 长度
    ///
    /// # 参数
    ///
    /// * `length` - 随机字节数，不少于 16；链接里的 token 长度是它的两倍
    ///
    /// # 示例
    ///
    /// ```rust
    /// use magiclink::MagicLinkConfig;
    ///
    /// let config = MagicLinkConfig::default().with_token_length(32);
    /// assert!(config.validate().is_ok());
    ///
    /// let too_short = MagicLinkConfig::default().with_token_length(8);
    /// assert!(too_short.validate().is_err());
    /// ```
    pub fn with_token_length(mut self, length: usize) -> Self {
        self.token_length = length;
        self
    }

    /// 设置有效期
    ///
    /// # 参数
    ///
    /// * `ttl` - 从签发时间起算的有效期，必须为正，且不能超出 `chrono::Duration` 的表示范围
    ///
    /// # 示例
    ///
    /// ```rust
    /// use magiclink::MagicLinkConfig;
    /// use std::time::Duration;
    ///
    /// let config = MagicLinkConfig::default().with_ttl(Duration::from_secs(900));
    /// assert_eq!(config.ttl, Some(Duration::from_secs(900)));
    /// ```
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// 设置是否在验证后消费 token
    ///
    /// # 参数
    ///
    /// * `consume` - 为 `true` 时兑换成功会删除匹配的记录，链接只能用一次
    ///
    /// # 示例
    ///
    /// ```rust
    /// use magiclink::MagicLinkConfig;
    ///
    /// let config = MagicLinkConfig::default().with_consume_on_verify(true);
    /// assert!(config.consume_on_verify);
    /// ```
    pub fn with_consume_on_verify(mut self, consume: bool) -> Self {
        self.consume_on_verify = consume;
        self
    }

    /// 设置每用户最大记录数
    ///
    /// # 参数
    ///
    /// * `max` - 签发后最多保留的记录数，超出时删除最旧的；0 表示不限制
    ///
    /// # 示例
    ///
    /// ```rust
    /// use magiclink::MagicLinkConfig;
    ///
    /// // 每个用户只保留最新的链接
    /// let config = MagicLinkConfig::default().with_max_active_per_user(1);
    /// assert_eq!(config.max_active_per_user, 1);
    /// ```
    pub fn with_max_active_per_user(mut self, max: usize) -> Self {
        self.max_active_per_user = max;
        self
    }

    /// 设置原始 token 保留策略
    ///
    /// # 参数
    ///
    /// * `retention` - [`RawTokenRetention::DigestOnly`] 时只保存摘要，已签发的链接无法再展示
    ///
    /// # 示例
    ///
    /// ```rust
    /// use magiclink::{MagicLinkConfig, RawTokenRetention};
    ///
    /// let config = MagicLinkConfig::default().with_retention(RawTokenRetention::DigestOnly);
    /// assert_eq!(config.retention, RawTokenRetention::DigestOnly);
    /// ```
    pub fn with_retention(mut self, retention: RawTokenRetention) -> Self {
        self.retention = retention;
        self
    }

    /// 高安全性配置
    ///
    /// - 32 字节 token（256 bits）
    /// - 15 分钟过期
    /// - 兑换后作废
    /// - 每用户最多 1 条记录
    /// - 只保存摘要
    pub fn high_security(login_url: impl Into<String>) -> Self {
        Self {
            login_url: login_url.into(),
            token_length: 32,
            ttl: Some(Duration::from_secs(15 * 60)),
            consume_on_verify: true,
            max_active_per_user: 1,
            retention: RawTokenRetention::DigestOnly,
        }
    }

    /// 宽松配置
    ///
    /// - 24 字节 token
    /// - 1 小时过期
    /// - 兑换后作废
    /// - 每用户最多 10 条记录
    pub fn relaxed(login_url: impl Into<String>) -> Self {
        Self {
            login_url: login_url.into(),
            token_length: 24,
            ttl: Some(Duration::from_secs(60 * 60)),
            consume_on_verify: true,
            max_active_per_user: 10,
            retention: RawTokenRetention::Retain,
        }
    }

    /// 从环境变量加载配置和服务端密钥
    ///
    /// # Errors
    ///
    /// 缺少变量、取值无法解析或密钥过短时返回错误
    pub fn from_env() -> Result<(Self, ServerSecret)> {
        let secret = env::var(ENV_SECRET)
            .map_err(|_| ConfigError::MissingRequired(ENV_SECRET.to_string()))?;
        let secret = ServerSecret::new(secret.as_bytes()).map_err(|_| ConfigError::InvalidValue {
            key: ENV_SECRET.to_string(),
            message: format!("must be at least {} bytes", MIN_SECRET_LENGTH),
        })?;

        let login_url = env::var(ENV_LOGIN_URL)
            .map_err(|_| ConfigError::MissingRequired(ENV_LOGIN_URL.to_string()))?;

        let mut config = Self::new(login_url);

        if let Ok(raw) = env::var(ENV_TTL_SECS) {
            let secs: u64 = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: ENV_TTL_SECS.to_string(),
                message: format!("expected seconds, got '{}'", raw),
            })?;
            if secs > 0 {
                config = config.with_ttl(Duration::from_secs(secs));
            }
        }

        if let Ok(raw) = env::var(ENV_CONSUME_ON_VERIFY) {
            let consume = parse_flag(&raw).ok_or_else(|| ConfigError::InvalidValue {
                key: ENV_CONSUME_ON_VERIFY.to_string(),
                message: format!("expected a boolean, got '{}'", raw),
            })?;
            config = config.with_consume_on_verify(consume);
        }

        config.validate()?;
        Ok((config, secret))
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.token_length < MIN_TOKEN_BYTES {
            return Err(ConfigError::InvalidValue {
                key: "token_length".to_string(),
                message: format!(
                    "must be at least {} bytes, got {}",
                    MIN_TOKEN_BYTES, self.token_length
                ),
            }
            .into());
        }

        Url::parse(&self.login_url).map_err(|e| ConfigError::InvalidValue {
            key: "login_url".to_string(),
            message: e.to_string(),
        })?;

        if self
            .ttl
            .is_some_and(|ttl| chrono::Duration::from_std(ttl).is_err())
        {
            return Err(ConfigError::InvalidValue {
                key: "ttl".to_string(),
                message: "out of range".to_string(),
            }
            .into());
        }

        if self.ttl == Some(Duration::ZERO) {
            return Err(ConfigError::InvalidValue {
                key: "ttl".to_string(),
                message: "must be positive".to_string(),
            }
            .into());
        }

        Ok(())
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_default_preserves_reusable_tokens() {
        let config = MagicLinkConfig::default();
        assert_eq!(config.token_length, 20);
        assert_eq!(config.ttl, None);
        assert!(!config.consume_on_verify);
        assert_eq!(config.max_active_per_user, 0);
        assert_eq!(config.retention, RawTokenRetention::Retain);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_high_security_config() {
        let config = MagicLinkConfig::high_security("https://example.com/login");
        assert_eq!(config.token_length, 32);
        assert_eq!(config.ttl, Some(Duration::from_secs(15 * 60)));
        assert!(config.consume_on_verify);
        assert_eq!(config.max_active_per_user, 1);
        assert_eq!(config.retention, RawTokenRetention::DigestOnly);
    }

    #[test]
    fn test_relaxed_config() {
        let config = MagicLinkConfig::relaxed("https://example.com/login");
        assert_eq!(config.token_length, 24);
        assert_eq!(config.ttl, Some(Duration::from_secs(3600)));
        assert!(config.consume_on_verify);
        assert_eq!(config.max_active_per_user, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_short_token() {
        let config = MagicLinkConfig::default().with_token_length(8);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_login_url() {
        let config = MagicLinkConfig::new("not a url");
        assert!(matches!(
            config.validate(),
            Err(Error::Config(ConfigError::InvalidValue { .. }))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_ttl() {
        let config = MagicLinkConfig::default().with_ttl(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unrepresentable_ttl() {
        let config = MagicLinkConfig::default().with_ttl(Duration::from_secs(u64::MAX));
        assert!(matches!(
            config.validate(),
            Err(Error::Config(ConfigError::InvalidValue { .. }))
        ));
        // 很长但可表示的有效期是合法的，兑换时视为永不过期
        let config = MagicLinkConfig::default().with_ttl(Duration::from_secs(10_000_000_000_000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag(" 0 "), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }
}
