//! 请求处理器接口
//!
//! 每个连接处理线程都会并发调用同一个处理器实例，
//! 实现者需要自行同步内部可变状态

use std::sync::Arc;

use crate::error::RatResult;
use crate::server::http_request::HttpRequest;
use crate::server::http_response::HttpResponse;

/// 请求处理器
pub trait RequestHandler: Send + Sync {
    /// 处理一个请求；返回错误时由连接处理器转换为 500 响应
    fn service(&self, request: &HttpRequest, response: &mut HttpResponse<'_>) -> RatResult<()>;
}

impl<T: RequestHandler + ?Sized> RequestHandler for Arc<T> {
    fn service(&self, request: &HttpRequest, response: &mut HttpResponse<'_>) -> RatResult<()> {
        (**self).service(request, response)
    }
}

/// 闭包处理器
pub struct FnHandler<F> {
    f: F,
}

impl<F> RequestHandler for FnHandler<F>
where
    F: Fn(&HttpRequest, &mut HttpResponse<'_>) -> RatResult<()> + Send + Sync,
{
    fn service(&self, request: &HttpRequest, response: &mut HttpResponse<'_>) -> RatResult<()> {
        (self.f)(request, response)
    }
}

/// 将闭包包装为共享的请求处理器
pub fn handler_fn<F>(f: F) -> Arc<dyn RequestHandler>
where
    F: Fn(&HttpRequest, &mut HttpResponse<'_>) -> RatResult<()> + Send + Sync + 'static,
{
    Arc::new(FnHandler { f })
}
