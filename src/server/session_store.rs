//! 会话存储
//!
//! 通过 Cookie 将请求关联到 [`HttpSession`]，并由后台线程定期清理过期会话。
//! 存储以 `Arc` 形式注入到需要会话的处理器中，不存在全局实例。

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{self, Sender};
use dashmap::DashMap;

use crate::server::config::SessionStoreConfig;
use crate::server::http_cookie::HttpCookie;
use crate::server::http_request::HttpRequest;
use crate::server::http_response::HttpResponse;
use crate::server::session::HttpSession;
use crate::utils::logger::{debug, info};

/// 会话存储
pub struct HttpSessionStore {
    sessions: Arc<DashMap<String, HttpSession>>,
    config: SessionStoreConfig,
    cleanup: Mutex<Option<(Sender<()>, JoinHandle<()>)>>,
}

impl HttpSessionStore {
    /// 创建存储并启动过期清理线程
    pub fn new(config: SessionStoreConfig) -> Arc<Self> {
        let sessions: Arc<DashMap<String, HttpSession>> = Arc::new(DashMap::new());
        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(1);

        let worker_sessions = sessions.clone();
        let expiration = config.expiration();
        let interval = Duration::from_millis(config.cleanup_interval.max(1));
        let spawned = std::thread::Builder::new()
            .name("rat-session-cleanup".to_string())
            .spawn(move || {
                let ticker = channel::tick(interval);
                loop {
                    channel::select! {
                        recv(shutdown_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            remove_expired_from(&worker_sessions, expiration);
                        }
                    }
                }
                debug!("🛑 [SessionStore] 清理线程已退出");
            });

        let cleanup = match spawned {
            Ok(handle) => Some((shutdown_tx, handle)),
            Err(e) => {
                crate::utils::logger::error!("❌ [SessionStore] 无法启动清理线程: {}", e);
                None
            }
        };

        Arc::new(Self {
            sessions,
            config,
            cleanup: Mutex::new(cleanup),
        })
    }

    pub fn config(&self) -> &SessionStoreConfig {
        &self.config
    }

    /// 取得请求关联的会话 ID
    ///
    /// 本次响应中已设置的 Cookie 优先于请求 Cookie；ID 不在存储中时返回 None
    pub fn get_session_id(&self, request: &HttpRequest, response: &HttpResponse<'_>) -> Option<String> {
        let cookie_name = &self.config.cookie_name;
        let candidate = response
            .cookie(cookie_name)
            .map(|c| c.value.clone())
            .or_else(|| request.cookie(cookie_name).map(str::to_string))?;

        if self.sessions.contains_key(&candidate) {
            Some(candidate)
        } else {
            debug!("🔍 [SessionStore] 未知的会话 ID: {}", candidate);
            None
        }
    }

    /// 取得或创建会话
    ///
    /// 找到会话时刷新访问时间与 Cookie；找不到且 `allow_create` 为 false 时返回空会话
    pub fn get_session(
        &self,
        request: &HttpRequest,
        response: &mut HttpResponse<'_>,
        allow_create: bool,
    ) -> HttpSession {
        if let Some(id) = self.get_session_id(request, response) {
            let existing = self.sessions.get(&id).map(|entry| entry.value().clone());
            if let Some(session) = existing {
                session.set_last_access();
                response.set_cookie(self.session_cookie(&id));
                return session;
            }
        }

        if !allow_create {
            return HttpSession::null();
        }

        let session = HttpSession::new(true);
        let id = session.get_id();
        self.sessions.insert(id.clone(), session.clone());
        response.set_cookie(self.session_cookie(&id));
        debug!("🆕 [SessionStore] 创建会话: {}", id);
        session
    }

    /// 按 ID 查找会话，不存在时返回空会话
    pub fn get_session_by_id(&self, id: &str) -> HttpSession {
        let session = self.sessions.get(id).map(|entry| entry.value().clone());
        match session {
            Some(session) => {
                session.set_last_access();
                session
            }
            None => HttpSession::null(),
        }
    }

    pub fn remove_session(&self, session: &HttpSession) {
        if !session.is_null() {
            self.sessions.remove(&session.get_id());
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// 立即清理过期会话，返回清理数量
    pub fn remove_expired(&self) -> usize {
        remove_expired_from(&self.sessions, self.config.expiration())
    }

    /// 停止清理线程
    pub fn shutdown(&self) {
        let cleanup = self
            .cleanup
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some((shutdown_tx, handle)) = cleanup {
            let _ = shutdown_tx.send(());
            let _ = handle.join();
        }
    }

    fn session_cookie(&self, id: &str) -> HttpCookie {
        let mut cookie = HttpCookie::new(self.config.cookie_name.clone(), id)
            .with_max_age(self.config.expiration_time / 1000)
            .with_path(self.config.cookie_path.clone())
            .http_only(true);
        if let Some(domain) = &self.config.cookie_domain {
            cookie = cookie.with_domain(domain.clone());
        }
        if let Some(comment) = &self.config.cookie_comment {
            cookie = cookie.with_comment(comment.clone());
        }
        cookie
    }
}

impl Drop for HttpSessionStore {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn remove_expired_from(sessions: &DashMap<String, HttpSession>, expiration: Duration) -> usize {
    let before = sessions.len();
    sessions.retain(|_, session| {
        session
            .get_last_access()
            .map(|last| last.elapsed() < expiration)
            .unwrap_or(false)
    });
    let removed = before.saturating_sub(sessions.len());
    if removed > 0 {
        info!("🧹 [SessionStore] 清理过期会话 {} 个", removed);
    }
    removed
}
