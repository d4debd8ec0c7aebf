//! 请求上下文
//!
//! 请求类型、查询/表单参数、当前会话和协议在入口处一次性确定，
//! 之后以 [`RequestContext`] 显式传给各个处理函数。

use std::collections::HashMap;

use crate::session::Session;

/// 请求类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RequestKind {
    /// 前台页面请求
    #[default]
    Frontend,
    /// 管理后台页面
    AdminBackend,
    /// 后台 AJAX 调用
    Ajax,
    /// REST API
    Rest,
    /// 定时任务
    Cron,
    /// 命令行
    Cli,
}

/// 单个请求的上下文
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// 请求类型
    pub kind: RequestKind,

    /// 查询参数
    pub query: HashMap<String, String>,

    /// 表单参数（POST body）
    pub form: HashMap<String, String>,

    /// 当前已认证会话
    pub session: Option<Session>,

    /// 是否为 HTTPS 请求
    pub secure: bool,
}

impl RequestContext {
    /// 创建指定类型的空上下文
    pub fn new(kind: RequestKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    /// 前台 GET 请求
    pub fn frontend<K, V>(query: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self::new(RequestKind::Frontend).with_query(query)
    }

    /// 后台 AJAX POST 请求
    pub fn ajax<K, V>(form: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self::new(RequestKind::Ajax).with_form(form)
    }

    /// 设置查询参数
    pub fn with_query<K, V>(mut self, query: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.query = query
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    /// 设置表单参数
    pub fn with_form<K, V>(mut self, form: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.form = form
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    /// 设置当前会话
    pub fn with_session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }

    /// 设置是否为 HTTPS
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// 是否已持有未过期的会话
    pub fn is_authenticated(&self) -> bool {
        self.session.as_ref().is_some_and(|s| !s.is_expired())
    }

    /// 读取非空查询参数
    pub fn query_param(&self, name: &str) -> Option<&str> {
        non_empty(self.query.get(name))
    }

    /// 读取非空表单参数
    pub fn form_param(&self, name: &str) -> Option<&str> {
        non_empty(self.form.get(name))
    }
}

/// 空字符串和 "0" 都视为缺失
fn non_empty(value: Option<&String>) -> Option<&str> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty() && *v != "0")
}

/// 宽松地解析整数参数
///
/// 取前导数字部分，无法解析时返回 0。
pub fn parse_int_param(raw: &str) -> u64 {
    let digits: String = raw
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_int_param() {
        assert_eq!(parse_int_param("42"), 42);
        assert_eq!(parse_int_param(" 42abc"), 42);
        assert_eq!(parse_int_param("abc"), 0);
        assert_eq!(parse_int_param("-5"), 0);
        assert_eq!(parse_int_param(""), 0);
    }

    #[test]
    fn test_empty_params_are_missing() {
        let ctx = RequestContext::frontend([("a", ""), ("b", "0"), ("c", "1")]);
        assert_eq!(ctx.query_param("a"), None);
        assert_eq!(ctx.query_param("b"), None);
        assert_eq!(ctx.query_param("c"), Some("1"));
        assert_eq!(ctx.query_param("d"), None);
    }

    #[test]
    fn test_anonymous_by_default() {
        let ctx = RequestContext::ajax([("user_id", "1")]);
        assert_eq!(ctx.kind, RequestKind::Ajax);
        assert!(!ctx.is_authenticated());
        assert_eq!(ctx.form_param("user_id"), Some("1"));
    }
}
