//! 连接处理器
//!
//! 每个处理器拥有一个常驻工作线程和一个单槽收件箱。
//! 监听器把已接受的套接字投递到收件箱，工作线程完整处理该连接
//! （解析请求 → 调用请求处理器 → 写出响应，keep-alive 时循环），
//! 连接结束后把自身标记为空闲，等待下一次分配。

use std::any::Any;
use std::io::{self, BufReader, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use rustls::{ServerConnection, StreamOwned};

use crate::error::{RatError, RatResult};
use crate::server::config::ListenerConfig;
use crate::server::http_request::{HttpRequest, ParseError, RequestLimits};
use crate::server::http_response::HttpResponse;
use crate::server::request_handler::RequestHandler;
use crate::utils::logger::{debug, error, warn};

/// 处理器共享的运行环境
pub(crate) struct HandlerContext {
    pub(crate) config: Arc<ListenerConfig>,
    pub(crate) request_handler: Arc<dyn RequestHandler>,
    pub(crate) tls: Option<Arc<rustls::ServerConfig>>,
}

/// 明文或 TLS 连接
enum Connection {
    Plain(TcpStream),
    Tls(Box<StreamOwned<ServerConnection, TcpStream>>),
}

impl Connection {
    fn new(stream: TcpStream, tls: Option<&Arc<rustls::ServerConfig>>) -> RatResult<Self> {
        match tls {
            None => Ok(Connection::Plain(stream)),
            Some(config) => {
                let conn = ServerConnection::new(config.clone())?;
                Ok(Connection::Tls(Box::new(StreamOwned::new(conn, stream))))
            }
        }
    }

    fn close(&mut self) {
        match self {
            Connection::Plain(stream) => {
                let _ = stream.flush();
                let _ = stream.shutdown(Shutdown::Both);
            }
            Connection::Tls(stream) => {
                stream.conn.send_close_notify();
                let _ = stream.flush();
                let _ = stream.sock.shutdown(Shutdown::Both);
            }
        }
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Connection::Plain(stream) => stream.read(buf),
            Connection::Tls(stream) => stream.read(buf),
        }
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Connection::Plain(stream) => stream.write(buf),
            Connection::Tls(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Connection::Plain(stream) => stream.flush(),
            Connection::Tls(stream) => stream.flush(),
        }
    }
}

/// 连接未能交给工作线程
#[derive(Debug)]
pub struct HandoffError {
    /// 未被处理的套接字
    pub stream: TcpStream,
    pub error: RatError,
}

impl std::fmt::Display for HandoffError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.error.fmt(f)
    }
}

/// 请求处理器调用失败的原因
enum ServiceFailure {
    Error(RatError),
    Panic(String),
}

/// 连接处理器
pub struct ConnectionHandler {
    id: usize,
    busy: Arc<AtomicBool>,
    /// 关闭时置为 None，工作线程随之退出
    inbox: Mutex<Option<Sender<TcpStream>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionHandler {
    /// 创建处理器并启动其工作线程，初始状态为空闲
    pub(crate) fn spawn(id: usize, context: Arc<HandlerContext>) -> RatResult<Self> {
        let (inbox, jobs) = channel::bounded::<TcpStream>(1);
        let busy = Arc::new(AtomicBool::new(false));

        let worker_busy = busy.clone();
        let worker = std::thread::Builder::new()
            .name(format!("rat-handler-{}", id))
            .spawn(move || worker_loop(id, context, jobs, worker_busy))
            .map_err(|e| RatError::WorkerPoolError(format!("无法启动处理线程: {}", e)))?;

        debug!("🧵 [Handler#{}] 处理线程已启动", id);
        Ok(Self {
            id,
            busy,
            inbox: Mutex::new(Some(inbox)),
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// 空闲 → 忙碌；已经忙碌时返回 false
    pub(crate) fn try_claim(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[cfg(test)]
    pub(crate) fn release(&self) {
        self.busy.store(false, Ordering::Release);
    }

    /// 把套接字交给工作线程处理，调用方不会被请求处理阻塞
    ///
    /// 投递失败时处理器恢复空闲，套接字随错误交还给调用方
    pub fn handle_connection(&self, stream: TcpStream) -> Result<(), HandoffError> {
        let inbox = self.inbox.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let (stream, reason) = match inbox.as_ref() {
            None => (stream, format!("处理器 #{} 已停止", self.id)),
            Some(inbox) => match inbox.try_send(stream) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(stream)) => (stream, format!("处理器 #{} 的收件箱已满", self.id)),
                Err(TrySendError::Disconnected(stream)) => {
                    (stream, format!("处理器 #{} 的工作线程已退出", self.id))
                }
            },
        };
        self.busy.store(false, Ordering::Release);
        Err(HandoffError {
            stream,
            error: RatError::WorkerPoolError(reason),
        })
    }

    /// 通知工作线程退出并等待，正在处理的连接会先完成
    pub(crate) fn stop(&self) {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        // 丢弃发送端，工作线程处理完当前连接后退出
        drop(self.inbox.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take());
        if let Some(worker) = worker {
            if worker.join().is_err() {
                error!("❌ [Handler#{}] 工作线程异常退出", self.id);
            }
            debug!("🛑 [Handler#{}] 处理线程已停止", self.id);
        }
    }
}

impl Drop for ConnectionHandler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(id: usize, context: Arc<HandlerContext>, jobs: Receiver<TcpStream>, busy: Arc<AtomicBool>) {
    for stream in jobs.iter() {
        let result = panic::catch_unwind(AssertUnwindSafe(|| serve_connection(id, &context, stream)));
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("⚠️ [Handler#{}] 连接处理失败: {}", id, e),
            Err(payload) => error!("❌ [Handler#{}] 连接处理 panic: {}", id, panic_message(&payload)),
        }
        busy.store(false, Ordering::Release);
    }
}

fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted
    )
}

/// 处理一个连接上的全部请求
fn serve_connection(id: usize, context: &HandlerContext, stream: TcpStream) -> RatResult<()> {
    let peer = stream.peer_addr().ok();
    stream.set_read_timeout(Some(context.config.read_timeout()))?;
    let _ = stream.set_nodelay(true);
    debug!("🔗 [Handler#{}] 开始处理连接: {:?}", id, peer);

    let limits = RequestLimits {
        max_request_size: context.config.max_request_size,
        max_body_size: context.config.max_body_size,
    };
    let connection = Connection::new(stream, context.tls.as_ref())?;
    let mut reader = BufReader::new(connection);

    loop {
        let request = match HttpRequest::read_from(&mut reader, limits, peer) {
            Ok(request) => request,
            Err(e) => {
                match e.status() {
                    Some((code, _)) => {
                        warn!("⚠️ [Handler#{}] 无效请求 {:?}: {}", id, peer, e);
                        let mut response = HttpResponse::new(reader.get_mut(), "HTTP/1.1", false);
                        let _ = response.send_status_page(code);
                    }
                    None => debug!("🔌 [Handler#{}] 连接结束 {:?}: {}", id, peer, e),
                }
                break;
            }
        };

        debug!("📥 [Handler#{}] {} {}", id, request.method(), request.path());
        if dispatch(id, context, &request, reader.get_mut()) {
            break;
        }
    }

    reader.get_mut().close();
    debug!("✅ [Handler#{}] 连接已关闭: {:?}", id, peer);
    Ok(())
}

/// 调用请求处理器并完成响应，返回是否需要关闭连接
fn dispatch(id: usize, context: &HandlerContext, request: &HttpRequest, writer: &mut Connection) -> bool {
    let keep_alive = request.wants_keep_alive();

    let (outcome, headers_sent, close) = {
        let mut response = HttpResponse::new(&mut *writer, request.version(), keep_alive);
        response.set_head_only(request.method() == "HEAD");

        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| {
            context.request_handler.service(request, &mut response)
        })) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ServiceFailure::Error(e)),
            Err(payload) => Err(ServiceFailure::Panic(panic_message(&payload))),
        };

        if outcome.is_ok() && !response.has_sent_last_part() {
            if let Err(e) = response.write(&[], true) {
                debug!("🔌 [Handler#{}] 结束响应失败: {}", id, e);
                return true;
            }
        }
        (outcome, response.has_sent_headers(), response.should_close())
    };

    let failure = match outcome {
        Ok(()) => return close,
        Err(failure) => failure,
    };

    match &failure {
        ServiceFailure::Error(RatError::IoError(e)) if is_disconnect(e) => {
            debug!("🔌 [Handler#{}] 客户端提前断开: {}", id, e);
            return true;
        }
        ServiceFailure::Error(e) => {
            error!("❌ [Handler#{}] 请求处理失败 {} {}: {}", id, request.method(), request.path(), e);
        }
        ServiceFailure::Panic(message) => {
            error!("❌ [Handler#{}] 请求处理 panic {} {}: {}", id, request.method(), request.path(), message);
        }
    }

    if !headers_sent {
        let mut response = HttpResponse::new(&mut *writer, request.version(), false);
        let _ = response.send_status_page(500);
    }
    true
}
