//! 宿主用户目录
//!
//! magic link 只需要宿主用户系统的三件事：按 ID 查找用户、检查能力、
//! 判断多站点归属。这里用 [`UserDirectory`] trait 抽象，并提供一个内存实现。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::error::{Error, Result, StorageError};

/// 用户 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for UserId {
    fn from(id: u64) -> Self {
        UserId(id)
    }
}

/// 用户能力
///
/// 只列出登录跳转和签发端点关心的能力，其余用 `Custom` 表示。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// 基础读取能力（可以进入个人资料页）
    Read,
    /// 编辑内容（可以进入管理后台）
    EditPosts,
    /// 管理用户（可以签发 magic link）
    EditUsers,
    /// 自定义能力
    Custom(String),
}

impl Capability {
    /// 从能力名解析
    pub fn parse(name: &str) -> Self {
        match name {
            "read" => Capability::Read,
            "edit_posts" => Capability::EditPosts,
            "edit_users" => Capability::EditUsers,
            other => Capability::Custom(other.to_string()),
        }
    }

    /// 能力名
    pub fn name(&self) -> &str {
        match self {
            Capability::Read => "read",
            Capability::EditPosts => "edit_posts",
            Capability::EditUsers => "edit_users",
            Capability::Custom(name) => name,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 宿主用户
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// 用户 ID
    pub id: UserId,

    /// 登录名
    pub login: String,

    /// 能力集合
    pub capabilities: HashSet<Capability>,

    /// 是否为网络超级管理员（多站点）
    pub super_admin: bool,

    /// 是否在至少一个站点上有成员身份（多站点）
    pub has_active_site: bool,
}

impl User {
    /// 创建没有任何能力的用户
    pub fn new(id: impl Into<UserId>, login: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            login: login.into(),
            capabilities: HashSet::new(),
            super_admin: false,
            has_active_site: true,
        }
    }

    /// 添加能力
    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    /// 设置超级管理员
    pub fn with_super_admin(mut self, super_admin: bool) -> Self {
        self.super_admin = super_admin;
        self
    }

    /// 设置是否有站点成员身份
    pub fn with_active_site(mut self, has_active_site: bool) -> Self {
        self.has_active_site = has_active_site;
        self
    }

    /// 检查能力
    pub fn can(&self, capability: &Capability) -> bool {
        self.super_admin || self.capabilities.contains(capability)
    }
}

// ============================================================================
// 用户目录
// ============================================================================

/// 宿主用户目录接口
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// 按 ID 查找用户
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>>;
}

/// 内存用户目录
#[derive(Debug, Clone, Default)]
pub struct InMemoryUserDirectory {
    users: Arc<RwLock<HashMap<UserId, User>>>,
}

impl InMemoryUserDirectory {
    /// 创建空目录
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入或替换用户
    pub fn insert(&self, user: User) -> Result<()> {
        let mut users = self
            .users
            .write()
            .map_err(|_| Error::Storage(StorageError::OperationFailed("lock poisoned".into())))?;
        users.insert(user.id, user);
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>> {
        let users = self
            .users
            .read()
            .map_err(|_| Error::Storage(StorageError::OperationFailed("lock poisoned".into())))?;
        Ok(users.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_parse_roundtrip() {
        for name in ["read", "edit_posts", "edit_users", "manage_network"] {
            assert_eq!(Capability::parse(name).name(), name);
        }
        assert_eq!(
            Capability::parse("manage_network"),
            Capability::Custom("manage_network".into())
        );
    }

    #[test]
    fn test_super_admin_has_every_capability() {
        let user = User::new(1, "root").with_super_admin(true);
        assert!(user.can(&Capability::EditPosts));
        assert!(user.can(&Capability::Custom("anything".into())));
    }

    #[test]
    fn test_user_capabilities() {
        let user = User::new(2, "reader").with_capability(Capability::Read);
        assert!(user.can(&Capability::Read));
        assert!(!user.can(&Capability::EditPosts));
    }

    #[tokio::test]
    async fn test_in_memory_directory() {
        let directory = InMemoryUserDirectory::new();
        directory.insert(User::new(42, "alice")).unwrap();

        let found = directory.find_by_id(UserId(42)).await.unwrap();
        assert_eq!(found.map(|u| u.login), Some("alice".to_string()));
        assert!(directory.find_by_id(UserId(999)).await.unwrap().is_none());
    }
}
