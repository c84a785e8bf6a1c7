//! RAT HTTPD 服务器模块
//!
//! 阻塞式多线程 HTTP/1.1 服务器：监听器 → 处理器池 → 请求处理器

pub mod config;
pub mod connection_handler;
pub mod connection_handler_pool;
pub mod file_cache;
pub mod http_cookie;
pub mod http_request;
pub mod http_response;
pub mod listener;
pub mod mime;
pub mod request_handler;
pub mod request_mapper;
pub mod session;
pub mod session_store;
pub mod static_file_controller;
pub mod tls;

pub use config::{ListenerConfig, SessionStoreConfig, Settings, StaticFileConfig};
pub use connection_handler::ConnectionHandler;
pub use connection_handler_pool::ConnectionHandlerPool;
pub use http_cookie::HttpCookie;
pub use http_request::HttpRequest;
pub use http_response::HttpResponse;
pub use listener::HttpListener;
pub use request_handler::{handler_fn, RequestHandler};
pub use request_mapper::RequestMapper;
pub use session::HttpSession;
pub use session_store::HttpSessionStore;
pub use static_file_controller::StaticFileController;
