//! 每用户 token 集合的存储
//!
//! token 集合作为用户的一个属性（`_magic_link_token`）保存在宿主的用户元数据里，
//! 形状为 `[{ "token": ..., "h_token": ..., "time": ... }, ...]`。
//!
//! ## 并发
//!
//! [`TokenStore::append`] 在 [`MetaTokenStore`] 中是整个集合的读-改-写。
//! 同一用户的并发签发可能交错，后写者覆盖先写者，丢失一条记录。
//! 需要严格持久性的部署应当实现一个原子追加的 [`TokenStore`]。

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::warn;

use crate::error::{Error, Result, StorageError};
use crate::user::UserId;

/// 存放 token 集合的用户元数据键
pub const TOKEN_META_KEY: &str = "_magic_link_token";

// ============================================================================
// 数据结构
// ============================================================================

/// 一条已签发的 token 记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// 原始 token（仅在保留原始 token 时存在）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// HMAC 摘要；缺失的记录在验证时被跳过
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub h_token: Option<String>,

    /// 签发时间（Unix 秒）
    #[serde(default)]
    pub time: i64,
}

impl TokenRecord {
    /// 创建一条只含摘要的记录
    pub fn new(digest: impl Into<String>, issued_at: DateTime<Utc>) -> Self {
        Self {
            token: None,
            h_token: Some(digest.into()),
            time: issued_at.timestamp(),
        }
    }

    /// 同时保存原始 token
    pub fn with_raw_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// 摘要
    pub fn digest(&self) -> Option<&str> {
        self.h_token.as_deref().filter(|d| !d.is_empty())
    }

    /// 签发时间
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.time, 0).single()
    }
}

// ============================================================================
// 宿主用户元数据
// ============================================================================

/// 宿主的每用户属性存储
///
/// 单个属性写入的原子性由宿主保证，本库不做额外假设。
#[async_trait]
pub trait UserMetaStore: Send + Sync {
    /// 读取属性
    async fn get_meta(&self, user_id: UserId, key: &str) -> Result<Option<Value>>;

    /// 写入（替换）属性
    async fn update_meta(&self, user_id: UserId, key: &str, value: Value) -> Result<()>;

    /// 删除属性
    async fn delete_meta(&self, user_id: UserId, key: &str) -> Result<()>;
}

/// 内存用户元数据存储
///
/// 适用于单实例部署或测试环境。
#[derive(Debug, Clone, Default)]
pub struct InMemoryUserMetaStore {
    meta: Arc<RwLock<HashMap<(UserId, String), Value>>>,
}

impl InMemoryUserMetaStore {
    /// 创建新的内存存储
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> Error {
    Error::Storage(StorageError::OperationFailed("lock poisoned".into()))
}

#[async_trait]
impl UserMetaStore for InMemoryUserMetaStore {
    async fn get_meta(&self, user_id: UserId, key: &str) -> Result<Option<Value>> {
        let meta = self.meta.read().map_err(|_| poisoned())?;
        Ok(meta.get(&(user_id, key.to_string())).cloned())
    }

    async fn update_meta(&self, user_id: UserId, key: &str, value: Value) -> Result<()> {
        let mut meta = self.meta.write().map_err(|_| poisoned())?;
        meta.insert((user_id, key.to_string()), value);
        Ok(())
    }

    async fn delete_meta(&self, user_id: UserId, key: &str) -> Result<()> {
        let mut meta = self.meta.write().map_err(|_| poisoned())?;
        meta.remove(&(user_id, key.to_string()));
        Ok(())
    }
}

// ============================================================================
// Token 存储
// ============================================================================

/// 每用户 token 集合存储接口
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// 按签发顺序列出用户的 token 记录；没有时返回空集合
    async fn list(&self, user_id: UserId) -> Result<Vec<TokenRecord>>;

    /// 追加一条记录
    async fn append(&self, user_id: UserId, record: TokenRecord) -> Result<()>;

    /// 用给定集合替换用户的全部记录
    async fn replace(&self, user_id: UserId, records: Vec<TokenRecord>) -> Result<()>;

    /// 删除用户的全部记录，返回删除数量
    async fn clear(&self, user_id: UserId) -> Result<usize>;
}

/// 基于宿主用户元数据的 token 存储
#[derive(Debug, Clone)]
pub struct MetaTokenStore<M: UserMetaStore> {
    meta: M,
}

impl<M: UserMetaStore> MetaTokenStore<M> {
    /// 包装一个元数据存储
    pub fn new(meta: M) -> Self {
        Self { meta }
    }

    /// 底层元数据存储
    pub fn meta(&self) -> &M {
        &self.meta
    }
}

impl MetaTokenStore<InMemoryUserMetaStore> {
    /// 使用内存元数据存储
    pub fn in_memory() -> Self {
        Self::new(InMemoryUserMetaStore::new())
    }
}

/// 把属性值解码为记录列表
///
/// 非数组的值视为空集合，无法解码的单条记录被丢弃。
fn decode_records(user_id: UserId, value: Option<Value>) -> Vec<TokenRecord> {
    let entries = match value {
        Some(Value::Array(entries)) => entries,
        Some(other) if !other.is_null() => {
            warn!(%user_id, "token collection is not an array, treating as empty");
            return Vec::new();
        }
        _ => return Vec::new(),
    };

    entries
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| match serde_json::from_value(entry) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(%user_id, index, error = %e, "dropping undecodable token record");
                None
            }
        })
        .collect()
}

#[async_trait]
impl<M: UserMetaStore> TokenStore for MetaTokenStore<M> {
    async fn list(&self, user_id: UserId) -> Result<Vec<TokenRecord>> {
        let value = self.meta.get_meta(user_id, TOKEN_META_KEY).await?;
        Ok(decode_records(user_id, value))
    }

    async fn append(&self, user_id: UserId, record: TokenRecord) -> Result<()> {
        let mut records = self.list(user_id).await?;
        records.push(record);
        self.replace(user_id, records).await
    }

    async fn replace(&self, user_id: UserId, records: Vec<TokenRecord>) -> Result<()> {
        let value = serde_json::to_value(&records).map_err(StorageError::from)?;
        self.meta.update_meta(user_id, TOKEN_META_KEY, value).await
    }

    async fn clear(&self, user_id: UserId) -> Result<usize> {
        let count = self.list(user_id).await?.len();
        self.meta.delete_meta(user_id, TOKEN_META_KEY).await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(digest: &str) -> TokenRecord {
        TokenRecord::new(digest, Utc::now())
    }

    #[tokio::test]
    async fn test_list_empty() {
        let store = MetaTokenStore::in_memory();
        assert!(store.list(UserId(1)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_preserves_order() {
        let store = MetaTokenStore::in_memory();
        store.append(UserId(1), record("a")).await.unwrap();
        store.append(UserId(1), record("b")).await.unwrap();
        store.append(UserId(1), record("a")).await.unwrap();

        let digests: Vec<_> = store
            .list(UserId(1))
            .await
            .unwrap()
            .iter()
            .map(|r| r.digest().unwrap().to_string())
            .collect();
        assert_eq!(digests, vec!["a", "b", "a"]);
    }

    #[tokio::test]
    async fn test_users_isolated() {
        let store = MetaTokenStore::in_memory();
        store.append(UserId(1), record("a")).await.unwrap();
        assert!(store.list(UserId(2)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persisted_shape() {
        let store = MetaTokenStore::in_memory();
        let issued_at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        store
            .append(
                UserId(7),
                TokenRecord::new("digest", issued_at).with_raw_token("raw"),
            )
            .await
            .unwrap();

        let value = store
            .meta()
            .get_meta(UserId(7), TOKEN_META_KEY)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            value,
            json!([{ "token": "raw", "h_token": "digest", "time": 1_700_000_000 }])
        );
    }

    #[tokio::test]
    async fn test_malformed_entries_dropped() {
        let store = MetaTokenStore::in_memory();
        store
            .meta()
            .update_meta(
                UserId(3),
                TOKEN_META_KEY,
                json!(["garbage", null, { "token": "raw" }, { "h_token": "d", "time": 5 }]),
            )
            .await
            .unwrap();

        let records = store.list(UserId(3)).await.unwrap();
        // "garbage" 与 null 无法解码；缺少摘要的记录保留，由验证器跳过
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].digest(), None);
        assert_eq!(records[1].digest(), Some("d"));
    }

    #[tokio::test]
    async fn test_non_array_value_is_empty() {
        let store = MetaTokenStore::in_memory();
        store
            .meta()
            .update_meta(UserId(4), TOKEN_META_KEY, json!("not a list"))
            .await
            .unwrap();
        assert!(store.list(UserId(4)).await.unwrap().is_empty());

        // 追加会用合法集合覆盖损坏的值
        store.append(UserId(4), record("x")).await.unwrap();
        assert_eq!(store.list(UserId(4)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_clear() {
        let store = MetaTokenStore::in_memory();
        store.append(UserId(1), record("a")).await.unwrap();
        store.append(UserId(1), record("b")).await.unwrap();
        assert_eq!(store.clear(UserId(1)).await.unwrap(), 2);
        assert!(store.list(UserId(1)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_interleaved_read_modify_write_loses_one_record() {
        let store = MetaTokenStore::in_memory();

        // 两个请求同时读到空集合，各自追加后写回
        let mut first = store.list(UserId(9)).await.unwrap();
        let mut second = store.list(UserId(9)).await.unwrap();
        first.push(record("first"));
        second.push(record("second"));
        store.replace(UserId(9), first).await.unwrap();
        store.replace(UserId(9), second).await.unwrap();

        let records = store.list(UserId(9)).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].digest(), Some("second"));
    }
}
