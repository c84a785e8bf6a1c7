//! 按路径前缀分发请求
//!
//! 最长前缀优先，前缀只在路径段边界上匹配（`/api` 匹配 `/api/x`，不匹配 `/apix`）。
//! 配置了会话存储时，每个请求在分发前都会取得或创建会话。

use std::sync::Arc;

use crate::error::RatResult;
use crate::server::http_request::HttpRequest;
use crate::server::http_response::HttpResponse;
use crate::server::request_handler::RequestHandler;
use crate::server::session_store::HttpSessionStore;
use crate::utils::logger::debug;

/// 路径前缀请求分发器
#[derive(Default)]
pub struct RequestMapper {
    routes: Vec<(String, Arc<dyn RequestHandler>)>,
    fallback: Option<Arc<dyn RequestHandler>>,
    sessions: Option<Arc<HttpSessionStore>>,
}

impl RequestMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册路径前缀
    pub fn route(mut self, prefix: impl Into<String>, handler: Arc<dyn RequestHandler>) -> Self {
        let mut prefix = prefix.into();
        if !prefix.starts_with('/') {
            prefix.insert(0, '/');
        }
        self.routes.push((prefix, handler));
        // 较长的前缀先匹配
        self.routes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        self
    }

    /// 没有前缀匹配时使用的处理器，通常是静态文件控制器
    pub fn fallback(mut self, handler: Arc<dyn RequestHandler>) -> Self {
        self.fallback = Some(handler);
        self
    }

    pub fn with_session_store(mut self, sessions: Arc<HttpSessionStore>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn session_store(&self) -> Option<&Arc<HttpSessionStore>> {
        self.sessions.as_ref()
    }

    fn find(&self, path: &str) -> Option<&Arc<dyn RequestHandler>> {
        self.routes
            .iter()
            .find(|(prefix, _)| prefix_matches(prefix, path))
            .map(|(_, handler)| handler)
            .or(self.fallback.as_ref())
    }
}

fn prefix_matches(prefix: &str, path: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => prefix.ends_with('/') || rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

impl RequestHandler for RequestMapper {
    fn service(&self, request: &HttpRequest, response: &mut HttpResponse<'_>) -> RatResult<()> {
        if let Some(sessions) = &self.sessions {
            sessions.get_session(request, response, true);
        }

        match self.find(request.path()) {
            Some(handler) => handler.service(request, response),
            None => {
                debug!("🔍 [RequestMapper] 未匹配的路径: {}", request.path());
                response.send_status_page(404)?;
                Ok(())
            }
        }
    }
}
