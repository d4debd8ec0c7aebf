//! # magiclink
//!
//! 免密码的 Magic Link 登录。
//!
//! 管理员为用户签发一个带随机 token 的链接，用户打开链接后直接以该用户身份登录。
//!
//! ## 功能特性
//!
//! - **Token 编解码**: 原始 token 只以 HMAC-SHA256 摘要形式保存，比对为常量时间
//! - **签发**: 生成 160 位随机 token，追加到用户的 token 集合并拼出兑换链接
//! - **验证**: 按签发顺序比对摘要，第一条匹配即成功
//! - **登录完成**: 建立会话，记录审计事件，按用户能力决定跳转目标
//! - **签发端点**: 会话绑定的 nonce 与 `edit_users` 权限校验
//! - **可选加固**: 一次性兑换、有效期、每用户数量上限、只保存摘要
//!
//! ## 模块
//!
//! | 模块 | 职责 |
//! |------|------|
//! | [`codec`] | 服务端密钥与 token 摘要 |
//! | [`store`] | 用户元数据上的 token 集合 |
//! | [`issuer`] | 签发 token 与兑换链接 |
//! | [`validator`] | 兑换请求验证 |
//! | [`completer`] | 建立会话与跳转 |
//! | [`handler`] | 服务对象与路由表 |
//!
//! ## 快速开始
//!
//! ```rust
//! use magiclink::{ServerSecret, TokenCodec};
//!
//! let codec = TokenCodec::new(ServerSecret::new([7u8; 32]).unwrap());
//! let digest = codec.digest("raw-token");
//!
//! assert!(codec.verify("raw-token", &digest));
//! assert!(!codec.verify("raw-tokeN", &digest));
//! ```
//!
//! ## 配置
//!
//! ```rust
//! use std::time::Duration;
//! use magiclink::MagicLinkConfig;
//!
//! // 默认：链接可重复兑换，无有效期
//! let config = MagicLinkConfig::new("https://example.com/wp-login.php");
//! assert!(!config.consume_on_verify);
//!
//! // 加固：一次性兑换，15 分钟有效
//! let hardened = MagicLinkConfig::high_security("https://example.com/wp-login.php");
//! assert!(hardened.consume_on_verify);
//! assert_eq!(hardened.ttl, Some(Duration::from_secs(15 * 60)));
//! ```
//!
//! 完整的签发与兑换流程见 [`handler`]。

pub mod audit;
pub mod codec;
pub mod completer;
pub mod config;
pub mod context;
pub mod error;
pub mod handler;
pub mod issuer;
pub mod nonce;
pub mod random;
pub mod session;
pub mod store;
pub mod user;
pub mod validator;

pub use error::{Error, Result};

// ============================================================================
// 核心组件导出
// ============================================================================

pub use codec::{ServerSecret, TokenCodec};
pub use completer::{LoginCompleter, LoginOutcome, SiteContext, SiteUrls, default_redirect};
pub use config::{MagicLinkConfig, RawTokenRetention};
pub use issuer::{IssuedLink, TokenIssuer, build_redemption_url};
pub use store::{
    InMemoryUserMetaStore, MetaTokenStore, TOKEN_META_KEY, TokenRecord, TokenStore, UserMetaStore,
};
pub use validator::TokenValidator;

// ============================================================================
// 宿主集成导出
// ============================================================================

pub use audit::{
    AuditEvent, AuditLogger, EventKind, InMemoryAuditLogger, RejectReason, TracingAuditLogger,
};
pub use context::{RequestContext, RequestKind};
pub use handler::{
    AjaxData, AjaxResponse, Collaborators, MagicLinkService, RedemptionRequest, Response,
};
pub use nonce::{NonceConfig, NonceGuard};
pub use session::{Session, SessionConfig, SessionEstablisher, SessionManager, SessionStore};
pub use user::{Capability, InMemoryUserDirectory, User, UserDirectory, UserId};
