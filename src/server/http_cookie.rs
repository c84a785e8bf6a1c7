//! HTTP Cookie
//!
//! 解析请求中的 `Cookie` 头，生成响应中的 `Set-Cookie` 头

use std::fmt;

/// SameSite 属性
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

/// 响应 Cookie
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpCookie {
    pub name: String,
    pub value: String,
    /// 存活秒数，None 表示会话 Cookie
    pub max_age: Option<u64>,
    pub path: Option<String>,
    pub domain: Option<String>,
    pub comment: Option<String>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<SameSite>,
}

impl HttpCookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            max_age: None,
            path: None,
            domain: None,
            comment: None,
            secure: false,
            http_only: false,
            same_site: None,
        }
    }

    pub fn with_max_age(mut self, seconds: u64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    pub fn with_same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = Some(same_site);
        self
    }

    /// 渲染为 `Set-Cookie` 头的值
    pub fn to_header_value(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for HttpCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)?;
        if let Some(comment) = &self.comment {
            write!(f, "; Comment={}", comment)?;
        }
        if let Some(max_age) = self.max_age {
            let expires = std::time::SystemTime::now() + std::time::Duration::from_secs(max_age);
            write!(f, "; Max-Age={}; Expires={}", max_age, httpdate::fmt_http_date(expires))?;
        }
        if let Some(domain) = &self.domain {
            write!(f, "; Domain={}", domain)?;
        }
        if let Some(path) = &self.path {
            write!(f, "; Path={}", path)?;
        }
        if self.secure {
            f.write_str("; Secure")?;
        }
        if self.http_only {
            f.write_str("; HttpOnly")?;
        }
        if let Some(same_site) = self.same_site {
            write!(f, "; SameSite={}", same_site.as_str())?;
        }
        Ok(())
    }
}

/// 解析 `Cookie` 请求头，返回 (名称, 值) 列表，忽略没有 `=` 的片段
pub fn parse_cookie_header(value: &str) -> Vec<(String, String)> {
    value
        .split(';')
        .filter_map(|part| {
            let (name, value) = part.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            let value = value.trim().trim_matches('"');
            Some((name.to_string(), value.to_string()))
        })
        .collect()
}
