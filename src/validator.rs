//! Magic Link 验证
//!
//! 对声称的用户 ID 和提交的原始 token，按签发顺序逐条比对已存储的摘要，
//! 第一条匹配即成功。
//!
//! 默认配置下验证不修改存储：同一个链接可以重复兑换，直到记录被手动清除。
//! 开启 `consume_on_verify` 后匹配的记录会被删除；设置 `ttl` 后超过有效期的
//! 记录不再参与匹配。
//!
//! 验证本身没有尝试次数限制，暴力猜测只受 token 熵约束。

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::codec::TokenCodec;
use crate::config::MagicLinkConfig;
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::store::{TokenRecord, TokenStore};
use crate::user::{User, UserDirectory, UserId};

/// Magic Link 验证器
pub struct TokenValidator {
    store: Arc<dyn TokenStore>,
    directory: Arc<dyn UserDirectory>,
    codec: TokenCodec,
    config: MagicLinkConfig,
}

impl TokenValidator {
    /// 创建验证器
    pub fn new(
        store: Arc<dyn TokenStore>,
        directory: Arc<dyn UserDirectory>,
        codec: TokenCodec,
        config: MagicLinkConfig,
    ) -> Self {
        Self {
            store,
            directory,
            codec,
            config,
        }
    }

    /// 验证兑换请求
    ///
    /// 成功返回解析出的用户。
    ///
    /// # Errors
    ///
    /// - 请求已持有会话：[`Error::AlreadyAuthenticated`]
    /// - 用户不存在：[`Error::UnknownUser`]
    /// - 没有匹配的摘要：[`Error::InvalidToken`]
    #[instrument(skip(self, ctx, presented_token))]
    pub async fn validate(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        presented_token: &str,
    ) -> Result<User> {
        if ctx.is_authenticated() {
            return Err(Error::AlreadyAuthenticated);
        }

        let user = self
            .directory
            .find_by_id(user_id)
            .await?
            .ok_or(Error::UnknownUser(user_id))?;

        let mut records = self.store.list(user_id).await?;
        let index = self
            .find_match(user_id, &records, presented_token)
            .ok_or(Error::InvalidToken)?;

        if self.config.consume_on_verify {
            records.remove(index);
            self.store.replace(user_id, records).await?;
            debug!(index, "magic link record consumed");
        }

        Ok(user)
    }

    /// 只检查 token 是否与用户的某条记录匹配，不做会话和用户检查，不修改存储
    pub async fn check_token(&self, user_id: UserId, presented_token: &str) -> Result<bool> {
        let records = self.store.list(user_id).await?;
        Ok(self
            .find_match(user_id, &records, presented_token)
            .is_some())
    }

    /// 返回第一条匹配记录的下标
    fn find_match(
        &self,
        user_id: UserId,
        records: &[TokenRecord],
        presented_token: &str,
    ) -> Option<usize> {
        let now = Utc::now();

        records.iter().enumerate().find_map(|(index, record)| {
            let Some(digest) = record.digest() else {
                warn!(%user_id, index, "skipping token record without digest");
                return None;
            };

            if let Some(ttl) = self.config.ttl {
                let Some(issued) = record.issued_at() else {
                    warn!(%user_id, index, "skipping token record with invalid issue time");
                    return None;
                };
                // 到期时间超出可表示范围：签发时间在未来的记录无效，否则视为永不过期
                let expired = match chrono::Duration::from_std(ttl)
                    .ok()
                    .and_then(|ttl| issued.checked_add_signed(ttl))
                {
                    Some(expires_at) => now > expires_at,
                    None => issued > now,
                };
                if expired {
                    return None;
                }
            }

            self.codec.verify(presented_token, digest).then_some(index)
        })
    }

    /// 获取配置
    pub fn config(&self) -> &MagicLinkConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ServerSecret;
    use crate::session::{SessionConfig, SessionManager};
    use crate::store::MetaTokenStore;
    use crate::user::InMemoryUserDirectory;
    use std::time::Duration;

    struct Fixture {
        store: Arc<MetaTokenStore<crate::store::InMemoryUserMetaStore>>,
        codec: TokenCodec,
        validator: TokenValidator,
    }

    fn fixture(config: MagicLinkConfig) -> Fixture {
        let store = Arc::new(MetaTokenStore::in_memory());
        let directory = Arc::new(InMemoryUserDirectory::new());
        directory.insert(User::new(42, "alice")).unwrap();
        let codec = TokenCodec::new(ServerSecret::new([9u8; 32]).unwrap());
        let validator = TokenValidator::new(store.clone(), directory, codec.clone(), config);
        Fixture {
            store,
            codec,
            validator,
        }
    }

    async fn seed(f: &Fixture, raw: &str) {
        f.store
            .append(UserId(42), TokenRecord::new(f.codec.digest(raw), Utc::now()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_valid_token() {
        let f = fixture(MagicLinkConfig::default());
        seed(&f, "secret-token").await;

        let user = f
            .validator
            .validate(&RequestContext::default(), UserId(42), "secret-token")
            .await
            .unwrap();
        assert_eq!(user.login, "alice");
    }

    #[tokio::test]
    async fn test_reusable_by_default() {
        let f = fixture(MagicLinkConfig::default());
        seed(&f, "secret-token").await;
        let ctx = RequestContext::default();

        assert!(f.validator.validate(&ctx, UserId(42), "secret-token").await.is_ok());
        assert!(f.validator.validate(&ctx, UserId(42), "secret-token").await.is_ok());
        assert_eq!(f.store.list(UserId(42)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_consume_on_verify() {
        let f = fixture(MagicLinkConfig::default().with_consume_on_verify(true));
        seed(&f, "one").await;
        seed(&f, "two").await;
        let ctx = RequestContext::default();

        assert!(f.validator.validate(&ctx, UserId(42), "one").await.is_ok());
        assert!(matches!(
            f.validator.validate(&ctx, UserId(42), "one").await,
            Err(Error::InvalidToken)
        ));
        // 其他记录不受影响
        assert!(f.validator.check_token(UserId(42), "two").await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_user() {
        let f = fixture(MagicLinkConfig::default());
        let result = f
            .validator
            .validate(&RequestContext::default(), UserId(999), "whatever")
            .await;
        assert!(matches!(result, Err(Error::UnknownUser(UserId(999)))));
    }

    #[tokio::test]
    async fn test_already_authenticated_wins_over_valid_token() {
        let f = fixture(MagicLinkConfig::default());
        seed(&f, "secret-token").await;

        let sessions = SessionManager::new(SessionConfig::default());
        let session = sessions.create(UserId(1), false, false).unwrap();
        let ctx = RequestContext::default().with_session(session);

        assert!(matches!(
            f.validator.validate(&ctx, UserId(42), "secret-token").await,
            Err(Error::AlreadyAuthenticated)
        ));
    }

    #[tokio::test]
    async fn test_invalid_token() {
        let f = fixture(MagicLinkConfig::default());
        seed(&f, "secret-token").await;
        assert!(matches!(
            f.validator
                .validate(&RequestContext::default(), UserId(42), "secret-tokem")
                .await,
            Err(Error::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_records_without_digest_skipped() {
        let f = fixture(MagicLinkConfig::default());
        f.store
            .append(
                UserId(42),
                TokenRecord {
                    token: Some("secret-token".into()),
                    h_token: None,
                    time: 0,
                },
            )
            .await
            .unwrap();
        seed(&f, "secret-token").await;

        assert!(f.validator.check_token(UserId(42), "secret-token").await.unwrap());
    }

    #[tokio::test]
    async fn test_ttl_expires_old_records() {
        let f = fixture(MagicLinkConfig::default().with_ttl(Duration::from_secs(60)));
        let old = Utc::now() - chrono::Duration::minutes(5);
        f.store
            .append(UserId(42), TokenRecord::new(f.codec.digest("old"), old))
            .await
            .unwrap();
        seed(&f, "fresh").await;

        assert!(!f.validator.check_token(UserId(42), "old").await.unwrap());
        assert!(f.validator.check_token(UserId(42), "fresh").await.unwrap());
    }

    #[tokio::test]
    async fn test_huge_ttl_never_expires() {
        let f = fixture(
            MagicLinkConfig::default().with_ttl(Duration::from_secs(10_000_000_000_000)),
        );
        seed(&f, "secret-token").await;

        let user = f
            .validator
            .validate(&RequestContext::default(), UserId(42), "secret-token")
            .await
            .unwrap();
        assert_eq!(user.id, UserId(42));
    }

    #[tokio::test]
    async fn test_ttl_skips_record_with_out_of_range_time() {
        let f = fixture(MagicLinkConfig::default().with_ttl(Duration::from_secs(900)));
        f.store
            .append(
                UserId(42),
                TokenRecord {
                    token: None,
                    h_token: Some(f.codec.digest("far-future")),
                    time: chrono::DateTime::<Utc>::MAX_UTC.timestamp() - 10,
                },
            )
            .await
            .unwrap();
        f.store
            .append(
                UserId(42),
                TokenRecord {
                    token: None,
                    h_token: Some(f.codec.digest("bad-time")),
                    time: i64::MAX,
                },
            )
            .await
            .unwrap();

        assert!(matches!(
            f.validator
                .validate(&RequestContext::default(), UserId(42), "far-future")
                .await,
            Err(Error::InvalidToken)
        ));
        assert!(!f.validator.check_token(UserId(42), "bad-time").await.unwrap());
    }
}
