//! HTTP 监听器
//!
//! 接受线程只负责 accept 和分配：从处理器池取得空闲处理器并把套接字交给它；
//! 池已满时直接写回 503 并关闭连接，从不排队。

use std::io::Write;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::{RatError, RatResult};
use crate::server::config::ListenerConfig;
use crate::server::connection_handler_pool::ConnectionHandlerPool;
use crate::server::request_handler::RequestHandler;
use crate::server::tls::load_server_config;
use crate::utils::logger::{debug, error, info, warn};
use crate::utils::net::resolve_bind_addr;

/// 池已满时写回的固定响应
pub const REJECT_RESPONSE: &[u8] =
    b"HTTP/1.1 503 too many connections\r\nConnection: close\r\n\r\nToo many connections\r\n";

struct Running {
    local_addr: SocketAddr,
    stopping: Arc<AtomicBool>,
    accept: JoinHandle<()>,
    pool: Arc<ConnectionHandlerPool>,
}

/// HTTP 监听器
pub struct HttpListener {
    config: Arc<ListenerConfig>,
    request_handler: Arc<dyn RequestHandler>,
    running: Mutex<Option<Running>>,
}

impl HttpListener {
    pub fn new(config: ListenerConfig, request_handler: Arc<dyn RequestHandler>) -> Self {
        Self {
            config: Arc::new(config),
            request_handler,
            running: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 绑定端口并启动接受线程
    ///
    /// 绑定或证书加载失败时记录错误并返回，监听器保持未监听状态
    pub fn start(&self) -> RatResult<()> {
        let mut running = self.lock();
        if running.is_some() {
            debug!("ℹ️ [Listener] 已在监听，忽略重复启动");
            return Ok(());
        }

        self.config.validate()?;

        let tls = match (&self.config.ssl_key_file, &self.config.ssl_cert_file) {
            (Some(key), Some(cert)) => match load_server_config(key, cert) {
                Ok(tls) => Some(tls),
                Err(e) => {
                    error!("❌ [Listener] TLS 配置失败: {}", e);
                    return Err(e);
                }
            },
            _ => None,
        };

        let addr = resolve_bind_addr(&self.config.host, self.config.port);
        let listener = TcpListener::bind(addr).map_err(|e| {
            error!("❌ [Listener] 无法绑定 {}: {}", addr, e);
            RatError::ConfigError(format!("无法绑定 {}: {}", addr, e))
        })?;
        let local_addr = listener.local_addr()?;

        let pool = Arc::new(ConnectionHandlerPool::new(
            self.config.clone(),
            self.request_handler.clone(),
            tls.clone(),
        )?);
        let stopping = Arc::new(AtomicBool::new(false));

        let accept_pool = pool.clone();
        let accept_stopping = stopping.clone();
        let accept = std::thread::Builder::new()
            .name("rat-listener".to_string())
            .spawn(move || accept_loop(listener, accept_pool, accept_stopping))
            .map_err(|e| RatError::NetworkError(format!("无法启动接受线程: {}", e)))?;

        info!(
            "🚀 [Listener] 正在监听 {}://{}",
            if tls.is_some() { "https" } else { "http" },
            local_addr
        );
        *running = Some(Running {
            local_addr,
            stopping,
            accept,
            pool,
        });
        Ok(())
    }

    pub fn is_listening(&self) -> bool {
        self.lock().is_some()
    }

    /// 实际绑定的地址（端口为 0 时由系统分配）
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock().as_ref().map(|r| r.local_addr)
    }

    pub fn pool(&self) -> Option<Arc<ConnectionHandlerPool>> {
        self.lock().as_ref().map(|r| r.pool.clone())
    }

    /// 停止接受新连接，关闭处理器池
    pub fn stop(&self) {
        let running = self.lock().take();
        let Some(running) = running else {
            return;
        };

        running.stopping.store(true, Ordering::Release);
        // 用一次本地连接唤醒阻塞在 accept 上的线程
        let wake_addr = match running.local_addr.ip() {
            IpAddr::V4(ip) if ip.is_unspecified() => SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), running.local_addr.port()),
            IpAddr::V6(ip) if ip.is_unspecified() => SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), running.local_addr.port()),
            _ => running.local_addr,
        };
        if let Err(e) = TcpStream::connect_timeout(&wake_addr, Duration::from_secs(1)) {
            warn!("⚠️ [Listener] 唤醒接受线程失败: {}", e);
        }
        if running.accept.join().is_err() {
            error!("❌ [Listener] 接受线程异常退出");
        }

        running.pool.shutdown();
        info!("🛑 [Listener] 已停止监听 {}", running.local_addr);
    }
}

impl Drop for HttpListener {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(listener: TcpListener, pool: Arc<ConnectionHandlerPool>, stopping: Arc<AtomicBool>) {
    for stream in listener.incoming() {
        if stopping.load(Ordering::Acquire) {
            break;
        }
        match stream {
            Ok(stream) => dispatch(&pool, stream),
            Err(e) => {
                warn!("⚠️ [Listener] accept 失败: {}", e);
                // 文件描述符耗尽等错误会立即重复出现
                std::thread::sleep(Duration::from_millis(10));
            }
        }
    }
    debug!("🛑 [Listener] 接受线程已退出");
}

fn dispatch(pool: &ConnectionHandlerPool, stream: TcpStream) {
    let peer = stream.peer_addr().ok();
    match pool.acquire_handler() {
        Some(handler) => {
            debug!("📨 [Listener] 连接 {:?} 分配给处理器 #{}", peer, handler.id());
            if let Err(e) = handler.handle_connection(stream) {
                error!("❌ [Listener] 投递连接失败: {}", e.error);
                reject(e.stream);
            }
        }
        None => {
            warn!("🚫 [Listener] 处理器已满 ({})，拒绝连接 {:?}", pool.max_threads(), peer);
            reject(stream);
        }
    }
}

fn reject(mut stream: TcpStream) {
    let _ = stream.set_write_timeout(Some(Duration::from_secs(1)));
    let _ = stream.write_all(REJECT_RESPONSE);
    let _ = stream.flush();
    let _ = stream.shutdown(Shutdown::Both);
}
