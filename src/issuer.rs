//! Magic Link 签发
//!
//! 为用户生成新的原始 token，把摘要追加到用户的 token 集合中，并返回
//! 挂在登录入口上的兑换链接：
//!
//! ```text
//! <login_url>?user_id=<id>&magic-token=<raw>&magic-link=1
//! ```
//!
//! 原始 token 只出现在返回值里，不会写入日志。

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, instrument};
use url::Url;

use crate::codec::TokenCodec;
use crate::config::{MagicLinkConfig, RawTokenRetention};
use crate::error::{ConfigError, Error, Result};
use crate::random::generate_magic_token;
use crate::store::{TokenRecord, TokenStore};
use crate::user::{User, UserId};

/// 兑换链接中的用户 ID 参数
pub const PARAM_USER_ID: &str = "user_id";
/// 兑换链接中的 token 参数
pub const PARAM_TOKEN: &str = "magic-token";
/// 兑换链接的标记参数
pub const PARAM_FLAG: &str = "magic-link";

/// 签发结果
#[derive(Debug, Clone)]
pub struct IssuedLink {
    /// 用户 ID
    pub user_id: UserId,

    /// 原始 token（秘密）
    pub token: String,

    /// 完整兑换链接
    pub url: String,

    /// 签发时间
    pub issued_at: DateTime<Utc>,
}

/// 在登录地址上拼出兑换链接
///
/// 登录地址上原有的查询参数会保留，同名参数被替换。
pub fn build_redemption_url(login_url: &str, user_id: UserId, token: &str) -> Result<String> {
    let mut url = Url::parse(login_url).map_err(|e| ConfigError::InvalidValue {
        key: "login_url".to_string(),
        message: e.to_string(),
    })?;

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != PARAM_USER_ID && k != PARAM_TOKEN && k != PARAM_FLAG)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair(PARAM_USER_ID, &user_id.to_string())
        .append_pair(PARAM_TOKEN, token)
        .append_pair(PARAM_FLAG, "1");

    Ok(url.into())
}

/// Magic Link 签发器
pub struct TokenIssuer {
    store: Arc<dyn TokenStore>,
    codec: TokenCodec,
    config: MagicLinkConfig,
}

impl TokenIssuer {
    /// 创建签发器
    pub fn new(store: Arc<dyn TokenStore>, codec: TokenCodec, config: MagicLinkConfig) -> Self {
        Self {
            store,
            codec,
            config,
        }
    }

    /// 为用户签发兑换链接
    ///
    /// # Errors
    ///
    /// - 用户无法解析（`None`）时返回 [`Error::InvalidUser`]
    /// - 存储失败时返回存储错误
    ///
    /// 同一用户重复签发不会去重，每次都追加一条新记录。
    #[instrument(skip_all, fields(user_id = user.map(|u| u.id.0)))]
    pub async fn issue(&self, user: Option<&User>) -> Result<IssuedLink> {
        let user = user.ok_or_else(|| Error::InvalidUser("user not found".to_string()))?;

        let token = generate_magic_token(self.config.token_length)?;
        let url = build_redemption_url(&self.config.login_url, user.id, &token)?;
        let issued_at = Utc::now();

        let mut record = TokenRecord::new(self.codec.digest(&token), issued_at);
        if self.config.retention == RawTokenRetention::Retain {
            record = record.with_raw_token(token.clone());
        }

        if self.config.max_active_per_user > 0 {
            let mut records = self.store.list(user.id).await?;
            records.push(record);
            let excess = records.len().saturating_sub(self.config.max_active_per_user);
            if excess > 0 {
                debug!(excess, "pruning oldest magic link records");
                records.drain(..excess);
            }
            self.store.replace(user.id, records).await?;
        } else {
            self.store.append(user.id, record).await?;
        }

        debug!("magic link issued");

        Ok(IssuedLink {
            user_id: user.id,
            token,
            url,
            issued_at,
        })
    }

    /// 当前可展示的链接
    ///
    /// 返回第一条仍保留原始 token 的记录对应的链接；只保存摘要时总是 `None`。
    pub async fn current_link(&self, user_id: UserId) -> Result<Option<String>> {
        let records = self.store.list(user_id).await?;
        records
            .iter()
            .find_map(|r| r.token.as_deref().filter(|t| !t.is_empty()))
            .map(|token| build_redemption_url(&self.config.login_url, user_id, token))
            .transpose()
    }

    /// 清除用户的全部记录，返回清除数量
    #[instrument(skip(self))]
    pub async fn revoke_all(&self, user_id: UserId) -> Result<usize> {
        self.store.clear(user_id).await
    }

    /// 获取配置
    pub fn config(&self) -> &MagicLinkConfig {
        &self.config
    }
}
