//! 请求处理
//!
//! [`MagicLinkService`] 持有全部协作者，是宿主唯一需要构造的对象。
//! [`MagicLinkService::handle`] 是显式的路由表：
//!
//! | 请求类型 | 条件 | 处理 |
//! |----------|------|------|
//! | `Frontend` | 查询参数含 `magic-link` | 兑换链接并登录 |
//! | `Ajax` | 表单 `action=generate_magic_link` | 签发链接 |
//! | 其他 | | 忽略，交给宿主正常处理 |
//!
//! ## 示例
//!
//! ```rust
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! use std::sync::Arc;
//! use magiclink::*;
//!
//! let directory = Arc::new(InMemoryUserDirectory::new());
//! directory
//!     .insert(User::new(42, "alice").with_capability(Capability::Read))
//!     .unwrap();
//!
//! let service = MagicLinkService::new(
//!     MagicLinkConfig::new("https://example.com/wp-login.php"),
//!     ServerSecret::generate().unwrap(),
//!     SiteContext::single(SiteUrls::for_site("https://example.com")),
//!     Collaborators::in_memory(directory),
//! )
//! .unwrap();
//!
//! let link = service.issue_link(UserId(42)).await.unwrap();
//!
//! let ctx = RequestContext::frontend([
//!     ("user_id", "42".to_string()),
//!     ("magic-token", link.token.clone()),
//!     ("magic-link", "1".to_string()),
//! ]);
//! match service.handle(&ctx).await.unwrap() {
//!     Response::Redirect { location, .. } => {
//!         assert_eq!(location, "https://example.com/wp-admin/profile.php")
//!     }
//!     other => panic!("unexpected response: {:?}", other),
//! }
//! # });
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::audit::{AuditEvent, AuditLogger, RejectReason, TracingAuditLogger};
use crate::codec::{ServerSecret, TokenCodec};
use crate::completer::{LoginCompleter, SiteContext};
use crate::config::MagicLinkConfig;
use crate::context::{RequestContext, RequestKind, parse_int_param};
use crate::error::{Error, Result};
use crate::issuer::{IssuedLink, PARAM_FLAG, PARAM_TOKEN, PARAM_USER_ID, TokenIssuer};
use crate::nonce::{GENERATE_LINK_ACTION, NonceConfig, NonceGuard};
use crate::session::{Session, SessionConfig, SessionEstablisher, SessionManager};
use crate::store::{MetaTokenStore, TokenStore};
use crate::user::{Capability, UserDirectory, UserId};
use crate::validator::TokenValidator;

/// 签发端点的 AJAX 动作名
pub const GENERATE_LINK_AJAX_ACTION: &str = "generate_magic_link";

// ============================================================================
// 响应
// ============================================================================

/// AJAX 响应体
///
/// 序列化为 `{"success": true, "data": {"magic_link": "..."}}`
/// 或 `{"success": false, "data": "<message>"}`。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AjaxResponse {
    /// 是否成功
    pub success: bool,
    /// 负载
    pub data: AjaxData,
}

/// AJAX 负载
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AjaxData {
    /// 签发成功
    Link {
        /// 兑换链接
        magic_link: String,
    },
    /// 错误信息
    Message(String),
}

impl AjaxResponse {
    /// 成功响应
    pub fn link(magic_link: impl Into<String>) -> Self {
        Self {
            success: true,
            data: AjaxData::Link {
                magic_link: magic_link.into(),
            },
        }
    }

    /// 失败响应
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: AjaxData::Message(message.into()),
        }
    }
}

/// 处理结果
#[derive(Debug, Clone)]
pub enum Response {
    /// 与本库无关的请求，宿主继续正常处理
    Ignored,
    /// 登录成功，跳转并结束请求
    Redirect {
        /// 跳转地址
        location: String,
        /// 新建立的会话
        session: Session,
    },
    /// 致命错误，显示阻断信息并结束请求
    Fatal {
        /// 面向用户的信息
        message: String,
    },
    /// AJAX JSON 响应
    Json(AjaxResponse),
    /// nonce 或权限校验失败
    Forbidden,
}

impl Response {
    /// 对应的 HTTP 状态码
    pub fn status_code(&self) -> u16 {
        match self {
            Response::Ignored | Response::Json(_) => 200,
            Response::Redirect { .. } => 302,
            Response::Fatal { .. } => 500,
            Response::Forbidden => 403,
        }
    }

    /// 是否结束当前请求
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Response::Ignored)
    }
}

/// 兑换失败时展示给用户的信息
pub fn fatal_message(error: &Error) -> &'static str {
    match error {
        Error::AlreadyAuthenticated => "Invalid magic link token",
        Error::UnknownUser(_) => "Invalid User",
        _ => "Invalid Token",
    }
}

// ============================================================================
// 兑换请求
// ============================================================================

/// 从查询参数解析出的兑换请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedemptionRequest {
    /// 声称的用户 ID
    pub user_id: UserId,
    /// 提交的原始 token
    pub token: String,
}

impl RedemptionRequest {
    /// 解析兑换请求
    ///
    /// # Errors
    ///
    /// 缺少任一必需参数时返回 [`Error::MissingParameters`]
    pub fn parse(ctx: &RequestContext) -> Result<Self> {
        let (Some(_), Some(user_id), Some(token)) = (
            ctx.query_param(PARAM_FLAG),
            ctx.query_param(PARAM_USER_ID),
            ctx.query_param(PARAM_TOKEN),
        ) else {
            return Err(Error::MissingParameters);
        };

        Ok(Self {
            user_id: UserId(parse_int_param(user_id)),
            token: token.to_string(),
        })
    }
}

// ============================================================================
// 服务
// ============================================================================

/// 宿主提供的协作者
#[derive(Clone)]
pub struct Collaborators {
    /// token 存储
    pub store: Arc<dyn TokenStore>,
    /// 用户目录
    pub directory: Arc<dyn UserDirectory>,
    /// 会话建立
    pub sessions: Arc<dyn SessionEstablisher>,
    /// 审计日志
    pub audit: Arc<dyn AuditLogger>,
    /// 签发端点的 nonce
    pub nonces: NonceGuard,
}

impl Collaborators {
    /// 内存存储、内存会话、tracing 审计，用户目录由调用方提供
    pub fn in_memory(directory: Arc<dyn UserDirectory>) -> Self {
        Self {
            store: Arc::new(MetaTokenStore::in_memory()),
            directory,
            sessions: Arc::new(SessionManager::new(SessionConfig::default())),
            audit: Arc::new(TracingAuditLogger),
            nonces: NonceGuard::new(NonceConfig::default()),
        }
    }

    /// 替换 token 存储
    ///
    /// # 参数
    ///
    /// * `store` - 宿主的 token 存储，签发器和验证器共用
    ///
    /// # 示例
    ///
    /// ```rust
    /// use magiclink::{Collaborators, InMemoryUserDirectory, MetaTokenStore};
    /// use std::sync::Arc;
    ///
    /// let store = Arc::new(MetaTokenStore::in_memory());
    /// let collaborators = Collaborators::in_memory(Arc::new(InMemoryUserDirectory::new()))
    ///     .with_store(store);
    /// # let _ = collaborators;
    /// ```
    pub fn with_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.store = store;
        self
    }

    /// 替换会话建立
    ///
    /// # 参数
    ///
    /// * `sessions` - 兑换成功后用来建立登录会话
    pub fn with_sessions(mut self, sessions: Arc<dyn SessionEstablisher>) -> Self {
        self.sessions = sessions;
        self
    }

    /// 替换审计日志
    ///
    /// # 参数
    ///
    /// * `audit` - 接收签发、拒绝、消费和登录事件
    pub fn with_audit(mut self, audit: Arc<dyn AuditLogger>) -> Self {
        self.audit = audit;
        self
    }

    /// 替换 nonce 守卫
    ///
    /// # 参数
    ///
    /// * `nonces` - 多实例部署时应使用共享密钥构造，见 [`NonceConfig::with_secret`]
    pub fn with_nonces(mut self, nonces: NonceGuard) -> Self {
        self.nonces = nonces;
        self
    }
}

/// Magic Link 服务
pub struct MagicLinkService {
    issuer: TokenIssuer,
    validator: TokenValidator,
    completer: LoginCompleter,
    directory: Arc<dyn UserDirectory>,
    audit: Arc<dyn AuditLogger>,
    nonces: NonceGuard,
}

impl MagicLinkService {
    /// 组装服务
    ///
    /// # Errors
    ///
    /// 配置无效时返回 [`Error::Config`]
    pub fn new(
        config: MagicLinkConfig,
        secret: ServerSecret,
        site: SiteContext,
        collaborators: Collaborators,
    ) -> Result<Self> {
        config.validate()?;
        let codec = TokenCodec::new(secret);
        let Collaborators {
            store,
            directory,
            sessions,
            audit,
            nonces,
        } = collaborators;

        Ok(Self {
            issuer: TokenIssuer::new(store.clone(), codec.clone(), config.clone()),
            validator: TokenValidator::new(store, directory.clone(), codec, config),
            completer: LoginCompleter::new(sessions, audit.clone(), site),
            directory,
            audit,
            nonces,
        })
    }

    /// 路由入口
    pub async fn handle(&self, ctx: &RequestContext) -> Result<Response> {
        match ctx.kind {
            RequestKind::Frontend if ctx.query_param(PARAM_FLAG).is_some() => {
                self.handle_redemption(ctx).await
            }
            RequestKind::Ajax
                if ctx.form_param("action") == Some(GENERATE_LINK_AJAX_ACTION) =>
            {
                self.handle_generate(ctx).await
            }
            _ => Ok(Response::Ignored),
        }
    }

    /// 处理兑换请求
    #[instrument(skip_all)]
    pub async fn handle_redemption(&self, ctx: &RequestContext) -> Result<Response> {
        let request = match RedemptionRequest::parse(ctx) {
            Ok(request) => request,
            Err(Error::MissingParameters) => {
                debug!("magic link parameters incomplete, ignoring");
                return Ok(Response::Ignored);
            }
            Err(e) => return Err(e),
        };

        let user = match self
            .validator
            .validate(ctx, request.user_id, &request.token)
            .await
        {
            Ok(user) => user,
            Err(e) => {
                let Some(reason) = RejectReason::from_error(&e) else {
                    return Err(e);
                };
                warn!(user_id = %request.user_id, error = %e, "magic link redemption rejected");
                self.audit.record(AuditEvent::LinkRejected {
                    user_id: request.user_id,
                    reason,
                });
                return Ok(Response::Fatal {
                    message: fatal_message(&e).to_string(),
                });
            }
        };

        if self.validator.config().consume_on_verify {
            self.audit
                .record(AuditEvent::LinkConsumed { user_id: user.id });
        }

        let outcome = self.completer.complete(ctx, &user)?;
        Ok(Response::Redirect {
            location: outcome.redirect_to,
            session: outcome.session,
        })
    }

    /// 处理签发请求
    ///
    /// 会话、nonce、权限都在任何状态变更之前校验。
    #[instrument(skip_all)]
    pub async fn handle_generate(&self, ctx: &RequestContext) -> Result<Response> {
        let session = match self.authorize_issuer(ctx).await {
            Ok(session) => session,
            Err(Error::Forbidden(reason)) => {
                warn!(%reason, "magic link issuance forbidden");
                return Ok(Response::Forbidden);
            }
            Err(e) => return Err(e),
        };

        let Some(raw_user_id) = ctx.form_param(PARAM_USER_ID) else {
            return Ok(Response::Json(AjaxResponse::error("User ID is missing.")));
        };

        let user_id = parse_int_param(raw_user_id);
        if user_id == 0 {
            return Ok(Response::Json(AjaxResponse::error("Invalid user ID.")));
        }

        match self.issue_link_by(UserId(user_id), session.user_id).await {
            Ok(link) => Ok(Response::Json(AjaxResponse::link(link.url))),
            Err(Error::InvalidUser(_)) => Ok(Response::Json(AjaxResponse::error("Invalid User"))),
            Err(e) => {
                warn!(error = %e, "magic link issuance failed");
                Ok(Response::Json(AjaxResponse::error(
                    "Could not generate magic link.",
                )))
            }
        }
    }

    /// 校验签发请求的会话、nonce 与 `edit_users` 权限
    ///
    /// # Errors
    ///
    /// 任一校验失败返回 [`Error::Forbidden`]，nonce 或用户目录本身出错时原样返回
    async fn authorize_issuer<'a>(&self, ctx: &'a RequestContext) -> Result<&'a Session> {
        let session = ctx
            .session
            .as_ref()
            .filter(|s| !s.is_expired())
            .ok_or_else(|| Error::forbidden("no active session"))?;

        let nonce = ctx.form_param("nonce").unwrap_or_default();
        if !self.nonces.verify(nonce, &session.id, GENERATE_LINK_ACTION)? {
            return Err(Error::forbidden(format!(
                "nonce check failed for user {}",
                session.user_id
            )));
        }

        let can_issue = self
            .directory
            .find_by_id(session.user_id)
            .await?
            .is_some_and(|admin| admin.can(&Capability::EditUsers));
        if !can_issue {
            return Err(Error::forbidden(format!(
                "user {} lacks edit_users",
                session.user_id
            )));
        }

        Ok(session)
    }

    /// 直接为用户签发链接（不经过 AJAX 端点）
    pub async fn issue_link(&self, user_id: UserId) -> Result<IssuedLink> {
        self.issue_link_by(user_id, user_id).await
    }

    async fn issue_link_by(&self, user_id: UserId, issued_by: UserId) -> Result<IssuedLink> {
        let user = self.directory.find_by_id(user_id).await?;
        let link = self.issuer.issue(user.as_ref()).await?;
        self.audit.record(AuditEvent::LinkIssued {
            user_id,
            issued_by,
        });
        Ok(link)
    }

    /// 为会话生成签发端点使用的 nonce
    pub fn create_nonce(&self, session: &Session) -> Result<String> {
        self.nonces.create(&session.id, GENERATE_LINK_ACTION)
    }

    /// 用户当前可展示的链接
    pub async fn current_link(&self, user_id: UserId) -> Result<Option<String>> {
        self.issuer.current_link(user_id).await
    }

    /// 清除用户的全部链接
    pub async fn revoke_all(&self, user_id: UserId) -> Result<usize> {
        self.issuer.revoke_all(user_id).await
    }

    /// 签发器
    pub fn issuer(&self) -> &TokenIssuer {
        &self.issuer
    }

    /// 验证器
    pub fn validator(&self) -> &TokenValidator {
        &self.validator
    }
}
