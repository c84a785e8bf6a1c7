//! 连接处理器池
//!
//! 按需创建处理器直到 `max_threads`，由定时线程每隔 `cleanup_interval`
//! 回收一个超出 `min_threads` 的空闲处理器。所有集合操作由同一把互斥锁串行化。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use crossbeam::channel::{self, Sender};

use crate::error::RatResult;
use crate::server::config::ListenerConfig;
use crate::server::connection_handler::{ConnectionHandler, HandlerContext};
use crate::server::request_handler::RequestHandler;
use crate::utils::logger::{debug, error, info};

struct PoolInner {
    handlers: Mutex<Vec<Arc<ConnectionHandler>>>,
    context: Arc<HandlerContext>,
    next_id: AtomicUsize,
}

impl PoolInner {
    fn lock(&self) -> MutexGuard<'_, Vec<Arc<ConnectionHandler>>> {
        self.handlers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn cleanup(&self) -> bool {
        let reaped = {
            let mut handlers = self.lock();
            let idle = handlers.iter().filter(|h| !h.is_busy()).count();
            if idle <= self.context.config.min_threads {
                return false;
            }
            // 在锁内把空闲处理器置为忙碌，确保它不会被同时分配出去
            match handlers.iter().position(|h| h.try_claim()) {
                Some(index) => handlers.swap_remove(index),
                None => return false,
            }
        };

        info!(
            "🧹 [HandlerPool] 回收空闲处理器 #{}，剩余 {} 个",
            reaped.id(),
            self.lock().len()
        );
        // 锁外等待工作线程退出
        reaped.stop();
        true
    }
}

/// 连接处理器池
pub struct ConnectionHandlerPool {
    inner: Arc<PoolInner>,
    cleanup: Mutex<Option<(Sender<()>, JoinHandle<()>)>>,
}

impl ConnectionHandlerPool {
    /// 创建处理器池并启动回收定时线程
    pub fn new(
        config: Arc<ListenerConfig>,
        request_handler: Arc<dyn RequestHandler>,
        tls: Option<Arc<rustls::ServerConfig>>,
    ) -> RatResult<Self> {
        config.validate()?;
        let interval = config.cleanup_interval();
        let inner = Arc::new(PoolInner {
            handlers: Mutex::new(Vec::new()),
            context: Arc::new(HandlerContext {
                config,
                request_handler,
                tls,
            }),
            next_id: AtomicUsize::new(1),
        });

        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(1);
        let timer_inner = inner.clone();
        let timer = std::thread::Builder::new()
            .name("rat-pool-cleanup".to_string())
            .spawn(move || {
                let ticker = channel::tick(interval);
                loop {
                    channel::select! {
                        recv(shutdown_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            timer_inner.cleanup();
                        }
                    }
                }
                debug!("🛑 [HandlerPool] 回收线程已退出");
            })
            .map_err(|e| crate::error::RatError::WorkerPoolError(format!("无法启动回收线程: {}", e)))?;

        Ok(Self {
            inner,
            cleanup: Mutex::new(Some((shutdown_tx, timer))),
        })
    }

    /// 取得一个空闲处理器（已标记为忙碌）
    ///
    /// 没有空闲处理器时在上限内新建一个；已达上限返回 None
    pub fn acquire_handler(&self) -> Option<Arc<ConnectionHandler>> {
        let mut handlers = self.inner.lock();

        if let Some(handler) = handlers.iter().find(|h| h.try_claim()) {
            return Some(handler.clone());
        }

        let max_threads = self.inner.context.config.max_threads;
        if handlers.len() >= max_threads {
            return None;
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        match ConnectionHandler::spawn(id, self.inner.context.clone()) {
            Ok(handler) => {
                let handler = Arc::new(handler);
                handler.try_claim();
                handlers.push(handler.clone());
                debug!("➕ [HandlerPool] 新建处理器 #{}，共 {} 个", id, handlers.len());
                Some(handler)
            }
            Err(e) => {
                error!("❌ [HandlerPool] 创建处理器失败: {}", e);
                None
            }
        }
    }

    /// 回收一个超出空闲下限的处理器，返回是否回收
    pub fn cleanup(&self) -> bool {
        self.inner.cleanup()
    }

    pub fn handler_count(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn idle_count(&self) -> usize {
        self.inner.lock().iter().filter(|h| !h.is_busy()).count()
    }

    pub fn max_threads(&self) -> usize {
        self.inner.context.config.max_threads
    }

    /// 停止回收线程与全部处理器，等待正在处理的连接完成
    pub fn shutdown(&self) {
        let cleanup = self
            .cleanup
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some((shutdown_tx, timer)) = cleanup {
            let _ = shutdown_tx.send(());
            let _ = timer.join();
        }

        let handlers: Vec<Arc<ConnectionHandler>> = self.inner.lock().drain(..).collect();
        if !handlers.is_empty() {
            info!("🛑 [HandlerPool] 停止 {} 个处理器", handlers.len());
        }
        for handler in handlers {
            handler.stop();
        }
    }
}

impl Drop for ConnectionHandlerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::http_request::HttpRequest;
    use crate::server::http_response::HttpResponse;
    use crate::server::request_handler::handler_fn;

    fn pool(min_threads: usize, max_threads: usize) -> ConnectionHandlerPool {
        let config = ListenerConfig {
            min_threads,
            max_threads,
            // 测试中手动调用 cleanup
            cleanup_interval: 3_600_000,
            ..ListenerConfig::default()
        };
        let handler = handler_fn(|_: &HttpRequest, response: &mut HttpResponse<'_>| {
            response.write(b"ok", true)?;
            Ok(())
        });
        ConnectionHandlerPool::new(Arc::new(config), handler, None).unwrap()
    }

    #[test]
    fn test_never_exceeds_max_threads() {
        let pool = pool(0, 3);
        let acquired: Vec<_> = (0..3).map(|_| pool.acquire_handler().unwrap()).collect();
        assert_eq!(pool.handler_count(), 3);
        assert!(acquired.iter().all(|h| h.is_busy()));

        assert!(pool.acquire_handler().is_none());
        assert_eq!(pool.handler_count(), 3);
    }

    #[test]
    fn test_idle_handlers_are_reused() {
        let pool = pool(0, 3);
        let first = pool.acquire_handler().unwrap();
        let first_id = first.id();
        first.release();
        assert_eq!(pool.idle_count(), 1);

        let again = pool.acquire_handler().unwrap();
        assert_eq!(again.id(), first_id);
        assert_eq!(pool.handler_count(), 1);
    }

    #[test]
    fn test_cleanup_reaps_one_idle_handler_per_pass() {
        let pool = pool(1, 4);
        let handlers: Vec<_> = (0..4).map(|_| pool.acquire_handler().unwrap()).collect();
        for handler in &handlers {
            handler.release();
        }
        drop(handlers);
        assert_eq!(pool.idle_count(), 4);

        assert!(pool.cleanup());
        assert_eq!(pool.handler_count(), 3);
        assert!(pool.cleanup());
        assert!(pool.cleanup());
        assert_eq!(pool.handler_count(), 1);
        // 已到空闲下限
        assert!(!pool.cleanup());
        assert_eq!(pool.handler_count(), 1);
    }

    #[test]
    fn test_cleanup_never_reaps_busy_handlers() {
        let pool = pool(0, 3);
        let busy: Vec<_> = (0..2).map(|_| pool.acquire_handler().unwrap()).collect();
        let idle = pool.acquire_handler().unwrap();
        idle.release();
        let idle_id = idle.id();
        drop(idle);

        assert!(pool.cleanup());
        assert_eq!(pool.handler_count(), 2);
        assert!(!pool.cleanup());
        assert_eq!(pool.handler_count(), 2);
        assert!(busy.iter().all(|h| h.is_busy() && h.id() != idle_id));
    }

    #[test]
    fn test_timer_reaps_incrementally() {
        let config = ListenerConfig {
            min_threads: 0,
            max_threads: 3,
            cleanup_interval: 20,
            ..ListenerConfig::default()
        };
        let handler = handler_fn(|_: &HttpRequest, _: &mut HttpResponse<'_>| Ok(()));
        let pool = ConnectionHandlerPool::new(Arc::new(config), handler, None).unwrap();
        let handlers: Vec<_> = (0..3).map(|_| pool.acquire_handler().unwrap()).collect();
        for handler in &handlers {
            handler.release();
        }
        drop(handlers);

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(3);
        while pool.handler_count() > 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(pool.handler_count(), 0);
    }

    #[test]
    fn test_shutdown_stops_everything() {
        let pool = pool(0, 2);
        let handler = pool.acquire_handler().unwrap();
        handler.release();
        pool.shutdown();
        assert_eq!(pool.handler_count(), 0);
        // 处理器已停止，不能再投递连接
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let _client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        assert!(handler.handle_connection(server).is_err());
    }
}
