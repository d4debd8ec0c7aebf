//! 登录完成
//!
//! 验证通过后为用户建立会话，通知观察者，并按用户能力决定跳转目标。
//!
//! ## 跳转规则（先匹配者优先）
//!
//! 1. 多站点，用户不属于任何站点且不是超级管理员 → 用户账户管理区
//! 2. 多站点，用户没有 `read` 能力 → 用户仪表盘
//! 3. 用户没有 `edit_posts` 能力 → 有 `read` 时去个人资料页，否则回首页
//! 4. 其他 → 管理后台首页

use std::sync::Arc;
use tracing::{info, instrument};

use crate::audit::{AuditEvent, AuditLogger};
use crate::context::RequestContext;
use crate::error::Result;
use crate::session::{Session, SessionEstablisher};
use crate::user::{Capability, User};

/// 站点上的各个跳转地址
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteUrls {
    /// 管理后台首页
    pub admin_url: String,
    /// 个人资料页
    pub profile_url: String,
    /// 用户账户管理区（多站点）
    pub user_admin_url: String,
    /// 用户仪表盘（多站点）
    pub dashboard_url: String,
    /// 站点首页
    pub home_url: String,
}

impl SiteUrls {
    /// 按常见目录布局从站点根地址推导
    pub fn for_site(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            admin_url: format!("{}/wp-admin/", base),
            profile_url: format!("{}/wp-admin/profile.php", base),
            user_admin_url: format!("{}/wp-admin/user/", base),
            dashboard_url: format!("{}/wp-admin/user/index.php", base),
            home_url: format!("{}/", base),
        }
    }
}

/// 站点上下文
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteContext {
    /// 是否为多站点部署
    pub multisite: bool,
    /// 跳转地址
    pub urls: SiteUrls,
}

impl SiteContext {
    /// 单站点
    pub fn single(urls: SiteUrls) -> Self {
        Self {
            multisite: false,
            urls,
        }
    }

    /// 多站点
    pub fn multisite(urls: SiteUrls) -> Self {
        Self {
            multisite: true,
            urls,
        }
    }
}

/// 计算登录后的默认跳转地址
pub fn default_redirect(user: &User, site: &SiteContext) -> String {
    let urls = &site.urls;
    let can_read = user.can(&Capability::Read);

    if site.multisite && !user.has_active_site && !user.super_admin {
        urls.user_admin_url.clone()
    } else if site.multisite && !can_read {
        urls.dashboard_url.clone()
    } else if !user.can(&Capability::EditPosts) {
        if can_read {
            urls.profile_url.clone()
        } else {
            urls.home_url.clone()
        }
    } else {
        urls.admin_url.clone()
    }
}

/// 登录结果
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    /// 新建立的会话
    pub session: Session,
    /// 跳转地址
    pub redirect_to: String,
}

/// 登录完成器
pub struct LoginCompleter {
    sessions: Arc<dyn SessionEstablisher>,
    audit: Arc<dyn AuditLogger>,
    site: SiteContext,
}

impl LoginCompleter {
    /// 创建登录完成器
    pub fn new(
        sessions: Arc<dyn SessionEstablisher>,
        audit: Arc<dyn AuditLogger>,
        site: SiteContext,
    ) -> Self {
        Self {
            sessions,
            audit,
            site,
        }
    }

    /// 为已验证的用户完成登录
    ///
    /// 会话总是以“记住我”方式建立，cookie 的 secure 标记跟随请求协议。
    #[instrument(skip_all, fields(user_id = user.id.0))]
    pub fn complete(&self, ctx: &RequestContext, user: &User) -> Result<LoginOutcome> {
        let session = self.sessions.establish(user, true, ctx.secure)?;

        self.audit.record(AuditEvent::LoggedIn {
            user_id: user.id,
            login: user.login.clone(),
        });

        let redirect_to = default_redirect(user, &self.site);
        info!(redirect_to = %redirect_to, "magic link login completed");

        Ok(LoginOutcome {
            session,
            redirect_to,
        })
    }

    /// 站点上下文
    pub fn site(&self) -> &SiteContext {
        &self.site
    }
}
