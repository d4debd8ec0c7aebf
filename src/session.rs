//! 登录会话
//!
//! 兑换成功后需要由宿主建立认证会话（设置 cookie 等）。本模块定义
//! [`SessionEstablisher`] 接口，并提供基于内存存储的 [`SessionManager`] 实现，
//! 供测试和单实例部署使用。
//!
//! ## 示例
//!
//! ```rust
//! use magiclink::session::{SessionConfig, SessionManager};
//! use magiclink::user::UserId;
//!
//! let manager = SessionManager::new(SessionConfig::default());
//!
//! let session = manager.create(UserId(42), true, true).unwrap();
//! assert!(manager.resolve(&session.id).unwrap().is_some());
//!
//! assert!(manager.destroy(&session.id).unwrap());
//! assert!(manager.resolve(&session.id).unwrap().is_none());
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

use crate::error::{Error, Result, StorageError};
use crate::random::generate_random_base64_url;
use crate::user::{User, UserId};

/// 已建立的登录会话
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// 会话 ID，宿主用作 cookie 值
    pub id: String,

    /// 关联的用户 ID
    pub user_id: UserId,

    /// 创建时间
    pub created_at: DateTime<Utc>,

    /// 过期时间
    pub expires_at: DateTime<Utc>,

    /// 是否为“记住我”会话
    pub remember: bool,

    /// cookie 是否仅限 HTTPS
    pub secure: bool,
}

impl Session {
    fn new(user_id: UserId, expires_in: Duration, remember: bool, secure: bool) -> Result<Self> {
        let now = Utc::now();
        Ok(Self {
            id: generate_random_base64_url(32)?,
            user_id,
            created_at: now,
            expires_at: now + expires_in,
            remember,
            secure,
        })
    }

    /// 是否已过期
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// 会话有效期
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// 普通会话
    pub standard_ttl: Duration,

    /// “记住我”会话
    pub remember_ttl: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            standard_ttl: Duration::days(2),
            remember_ttl: Duration::days(14),
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置普通会话有效期
    pub fn with_standard_ttl(mut self, ttl: Duration) -> Self {
        self.standard_ttl = ttl;
        self
    }

    /// 设置“记住我”会话有效期
    pub fn with_remember_ttl(mut self, ttl: Duration) -> Self {
        self.remember_ttl = ttl;
        self
    }

    /// 按是否“记住我”选择有效期
    pub fn lifetime(&self, remember: bool) -> Duration {
        if remember {
            self.remember_ttl
        } else {
            self.standard_ttl
        }
    }
}

// ============================================================================
// 宿主接口
// ============================================================================

/// 为用户建立认证会话的宿主接口
pub trait SessionEstablisher: Send + Sync {
    /// 建立会话
    ///
    /// * `remember` - 是否为长期会话
    /// * `secure` - cookie 是否仅限 HTTPS
    fn establish(&self, user: &User, remember: bool, secure: bool) -> Result<Session>;
}

// ============================================================================
// 存储
// ============================================================================

/// 会话存储，按用户分组
pub trait SessionStore: Send + Sync {
    fn insert(&self, session: Session) -> Result<()>;

    fn find(&self, session_id: &str) -> Result<Option<Session>>;

    /// 删除单个会话，返回是否存在
    fn remove(&self, session_id: &str) -> Result<bool>;

    fn list_for_user(&self, user_id: UserId) -> Result<Vec<Session>>;

    /// 删除用户的全部会话，返回删除数量
    fn remove_for_user(&self, user_id: UserId) -> Result<usize>;
}

/// 内存会话存储
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    by_user: RwLock<HashMap<UserId, Vec<Session>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> Error {
    Error::Storage(StorageError::OperationFailed("session lock poisoned".into()))
}

impl SessionStore for InMemorySessionStore {
    fn insert(&self, session: Session) -> Result<()> {
        let mut by_user = self.by_user.write().map_err(|_| poisoned())?;
        by_user.entry(session.user_id).or_default().push(session);
        Ok(())
    }

    fn find(&self, session_id: &str) -> Result<Option<Session>> {
        let by_user = self.by_user.read().map_err(|_| poisoned())?;
        Ok(by_user
            .values()
            .flatten()
            .find(|s| s.id == session_id)
            .cloned())
    }

    fn remove(&self, session_id: &str) -> Result<bool> {
        let mut by_user = self.by_user.write().map_err(|_| poisoned())?;
        for sessions in by_user.values_mut() {
            if let Some(pos) = sessions.iter().position(|s| s.id == session_id) {
                sessions.swap_remove(pos);
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn list_for_user(&self, user_id: UserId) -> Result<Vec<Session>> {
        let by_user = self.by_user.read().map_err(|_| poisoned())?;
        Ok(by_user.get(&user_id).cloned().unwrap_or_default())
    }

    fn remove_for_user(&self, user_id: UserId) -> Result<usize> {
        let mut by_user = self.by_user.write().map_err(|_| poisoned())?;
        Ok(by_user.remove(&user_id).map_or(0, |sessions| sessions.len()))
    }
}

// ============================================================================
// 管理器
// ============================================================================

/// 会话管理器
///
/// 宿主在请求入口用 [`SessionManager::resolve`] 取回当前会话，
/// 放进 [`crate::context::RequestContext`]。
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    config: SessionConfig,
}

impl SessionManager {
    /// 使用内存存储
    pub fn new(config: SessionConfig) -> Self {
        Self::with_store(config, Arc::new(InMemorySessionStore::new()))
    }

    /// 使用自定义存储
    pub fn with_store(config: SessionConfig, store: Arc<dyn SessionStore>) -> Self {
        Self { store, config }
    }

    /// 为用户创建会话
    pub fn create(&self, user_id: UserId, remember: bool, secure: bool) -> Result<Session> {
        let session = Session::new(user_id, self.config.lifetime(remember), remember, secure)?;
        self.store.insert(session.clone())?;
        debug!(%user_id, remember, "session created");
        Ok(session)
    }

    /// 按 ID 取回未过期的会话；过期的会被删除
    pub fn resolve(&self, session_id: &str) -> Result<Option<Session>> {
        match self.store.find(session_id)? {
            Some(session) if session.is_expired() => {
                self.store.remove(session_id)?;
                Ok(None)
            }
            found => Ok(found),
        }
    }

    /// 注销单个会话
    pub fn destroy(&self, session_id: &str) -> Result<bool> {
        self.store.remove(session_id)
    }

    /// 注销用户的全部会话
    pub fn destroy_all(&self, user_id: UserId) -> Result<usize> {
        self.store.remove_for_user(user_id)
    }

    /// 用户当前未过期的会话
    pub fn active_sessions(&self, user_id: UserId) -> Result<Vec<Session>> {
        let mut sessions = self.store.list_for_user(user_id)?;
        sessions.retain(|s| !s.is_expired());
        Ok(sessions)
    }
}

impl SessionEstablisher for SessionManager {
    fn establish(&self, user: &User, remember: bool, secure: bool) -> Result<Session> {
        self.create(user.id, remember, secure)
    }
}
