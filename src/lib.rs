//! RAT HTTPD
//!
//! 可嵌入的多线程 HTTP 服务器，提供：
//! - 有上限的连接处理线程池，池满时立即返回 503
//! - 引用计数的会话与基于 Cookie 的会话存储
//! - 带内存缓存的静态文件服务

pub mod error;
pub mod server;
pub mod utils;

pub use error::{RatError, RatResult};
pub use server::{
    handler_fn, HttpListener, HttpRequest, HttpResponse, HttpSession, HttpSessionStore, RequestHandler,
    RequestMapper, Settings, StaticFileController,
};
