//! HTTP/1.x 请求解析
//!
//! 从阻塞的字节流中读取一个完整请求：请求行、请求头、请求体。
//! 请求行与请求头共享 `max_request_size` 预算，请求体受 `max_body_size` 限制。

use std::collections::HashMap;
use std::io::{self, BufRead, Read};
use std::net::SocketAddr;

use bytes::Bytes;
use thiserror::Error;

use crate::server::http_cookie::parse_cookie_header;

/// 请求行前允许跳过的空行数
const MAX_LEADING_EMPTY_LINES: usize = 8;

/// 请求解析失败的原因
#[derive(Debug, Error)]
pub enum ParseError {
    /// 对端在发送任何请求数据前关闭了连接
    #[error("连接已关闭")]
    Closed,
    /// 读取超时，`partial` 表示是否已收到部分请求
    #[error("读取超时 (partial={partial})")]
    Timeout { partial: bool },
    #[error("请求过大")]
    TooLarge,
    #[error("请求格式错误: {0}")]
    Malformed(String),
    #[error("IO错误: {0}")]
    Io(#[from] io::Error),
}

impl ParseError {
    /// 需要回写给客户端的状态码，`None` 表示直接关闭连接
    pub fn status(&self) -> Option<(u16, &'static str)> {
        match self {
            ParseError::Closed | ParseError::Io(_) => None,
            ParseError::Timeout { partial: false } => None,
            ParseError::Timeout { partial: true } => Some((408, "Request Timeout")),
            ParseError::TooLarge => Some((413, "Request Entity Too Large")),
            ParseError::Malformed(_) => Some((400, "Bad Request")),
        }
    }
}

/// 请求大小限制
#[derive(Debug, Clone, Copy)]
pub struct RequestLimits {
    pub max_request_size: usize,
    pub max_body_size: usize,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            max_request_size: 16_000,
            max_body_size: 1_000_000,
        }
    }
}

/// HTTP 请求
#[derive(Debug, Clone)]
pub struct HttpRequest {
    method: String,
    path: String,
    raw_path: String,
    query_string: String,
    version: String,
    headers: HashMap<String, Vec<String>>,
    parameters: HashMap<String, Vec<String>>,
    cookies: HashMap<String, String>,
    body: Bytes,
    peer_addr: Option<SocketAddr>,
}

impl HttpRequest {
    /// 构造一个不经过网络的请求（进程内调用与测试）
    pub fn new(method: &str, target: &str) -> Self {
        let (raw_path, query) = split_target(target);
        let mut request = Self {
            method: method.to_ascii_uppercase(),
            path: decode_component(raw_path).unwrap_or_else(|| raw_path.to_string()),
            raw_path: raw_path.to_string(),
            query_string: query.to_string(),
            version: "HTTP/1.1".to_string(),
            headers: HashMap::new(),
            parameters: HashMap::new(),
            cookies: HashMap::new(),
            body: Bytes::new(),
            peer_addr: None,
        };
        request.parameters = parse_form_encoded(query);
        request
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.add_header(name, value.to_string());
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self.absorb_body_parameters();
        self
    }

    /// 从流中读取一个请求
    pub fn read_from<R: BufRead>(
        reader: &mut R,
        limits: RequestLimits,
        peer_addr: Option<SocketAddr>,
    ) -> Result<Self, ParseError> {
        let mut budget = limits.max_request_size;

        let mut request_line = read_line(reader, &mut budget, false)?;
        let mut skipped = 0;
        while request_line.is_empty() {
            skipped += 1;
            if skipped > MAX_LEADING_EMPTY_LINES {
                return Err(ParseError::Malformed("请求行前空行过多".to_string()));
            }
            request_line = read_line(reader, &mut budget, true)?;
        }

        let mut parts = request_line.split_whitespace();
        let (method, target, version) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(m), Some(t), Some(v), None) => (m, t, v),
            _ => return Err(ParseError::Malformed(format!("无效的请求行: {}", request_line))),
        };
        if !version.starts_with("HTTP/1.") {
            return Err(ParseError::Malformed(format!("不支持的协议版本: {}", version)));
        }
        if !method.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(ParseError::Malformed(format!("无效的请求方法: {}", method)));
        }

        if !target.starts_with('/') && target != "*" {
            return Err(ParseError::Malformed(format!("请求目标必须以 / 开头: {}", target)));
        }

        let (raw_path, query) = split_target(target);
        let path = decode_component(raw_path)
            .ok_or_else(|| ParseError::Malformed(format!("无法解码请求路径: {}", raw_path)))?;

        let mut request = Self {
            method: method.to_string(),
            path,
            raw_path: raw_path.to_string(),
            query_string: query.to_string(),
            version: version.to_string(),
            headers: HashMap::new(),
            parameters: parse_form_encoded(query),
            cookies: HashMap::new(),
            body: Bytes::new(),
            peer_addr,
        };

        request.read_headers(reader, &mut budget)?;
        request.read_body(reader, limits.max_body_size)?;
        request.absorb_body_parameters();
        Ok(request)
    }

    fn read_headers<R: BufRead>(&mut self, reader: &mut R, budget: &mut usize) -> Result<(), ParseError> {
        let mut last_name: Option<String> = None;
        loop {
            let line = read_line(reader, budget, true)?;
            if line.is_empty() {
                return Ok(());
            }

            // obsolete line folding: 续行追加到上一个头
            if line.starts_with(' ') || line.starts_with('\t') {
                let name = last_name
                    .as_ref()
                    .ok_or_else(|| ParseError::Malformed("首个请求头不能是续行".to_string()))?;
                if let Some(value) = self.headers.get_mut(name).and_then(|v| v.last_mut()) {
                    value.push(' ');
                    value.push_str(line.trim());
                }
                continue;
            }

            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| ParseError::Malformed(format!("无效的请求头: {}", line)))?;
            let name = name.trim();
            if name.is_empty() || name.contains(char::is_whitespace) {
                return Err(ParseError::Malformed(format!("无效的请求头名称: {}", name)));
            }
            let lower = name.to_ascii_lowercase();
            self.add_header(&lower, value.trim().to_string());
            last_name = Some(lower);
        }
    }

    fn read_body<R: BufRead>(&mut self, reader: &mut R, max_body_size: usize) -> Result<(), ParseError> {
        let chunked = self
            .header("transfer-encoding")
            .map(|v| v.to_ascii_lowercase().contains("chunked"))
            .unwrap_or(false);

        if chunked {
            self.body = Bytes::from(read_chunked_body(reader, max_body_size)?);
            return Ok(());
        }

        let length = match self.header("content-length") {
            Some(value) => value
                .trim()
                .parse::<usize>()
                .map_err(|_| ParseError::Malformed(format!("无效的 Content-Length: {}", value)))?,
            None => 0,
        };
        if length == 0 {
            return Ok(());
        }
        if length > max_body_size {
            return Err(ParseError::TooLarge);
        }

        let mut body = vec![0u8; length];
        read_exact(reader, &mut body)?;
        self.body = Bytes::from(body);
        Ok(())
    }

    fn add_header(&mut self, name: &str, value: String) {
        let name = name.to_ascii_lowercase();
        if name == "cookie" {
            for (cookie_name, cookie_value) in parse_cookie_header(&value) {
                self.cookies.insert(cookie_name, cookie_value);
            }
        }
        self.headers.entry(name).or_default().push(value);
    }

    fn absorb_body_parameters(&mut self) {
        let is_form = self
            .header("content-type")
            .map(|v| v.to_ascii_lowercase().starts_with("application/x-www-form-urlencoded"))
            .unwrap_or(false);
        if !is_form || self.body.is_empty() {
            return;
        }
        if let Ok(text) = std::str::from_utf8(&self.body) {
            for (name, values) in parse_form_encoded(text) {
                self.parameters.entry(name).or_default().extend(values);
            }
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// 解码后的路径
    pub fn path(&self) -> &str {
        &self.path
    }

    /// 原始（未解码）路径
    pub fn raw_path(&self) -> &str {
        &self.raw_path
    }

    pub fn query_string(&self) -> &str {
        &self.query_string
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// 首个同名请求头（名称大小写不敏感）
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// 所有同名请求头
    pub fn header_values(&self, name: &str) -> &[String] {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn headers(&self) -> &HashMap<String, Vec<String>> {
        &self.headers
    }

    /// 查询参数或表单参数的首个值
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn parameter_values(&self, name: &str) -> &[String] {
        self.parameters.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn parameters(&self) -> &HashMap<String, Vec<String>> {
        &self.parameters
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn cookies(&self) -> &HashMap<String, String> {
        &self.cookies
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// 按协议版本与 Connection 头判断是否保持连接
    pub fn wants_keep_alive(&self) -> bool {
        let tokens: Vec<String> = self
            .header_values("connection")
            .iter()
            .flat_map(|v| v.split(','))
            .map(|t| t.trim().to_ascii_lowercase())
            .collect();
        if tokens.iter().any(|t| t == "close") {
            return false;
        }
        if self.version == "HTTP/1.0" {
            return tokens.iter().any(|t| t == "keep-alive");
        }
        true
    }
}

fn split_target(target: &str) -> (&str, &str) {
    target.split_once('?').unwrap_or((target, ""))
}

fn decode_component(raw: &str) -> Option<String> {
    urlencoding::decode(raw).ok().map(|s| s.into_owned())
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// 读取一行（去掉 CRLF），并从预算中扣除消耗的字节
fn read_line<R: BufRead>(reader: &mut R, budget: &mut usize, started: bool) -> Result<String, ParseError> {
    let mut line = Vec::new();
    let limit = *budget as u64 + 1;
    let read = match reader.by_ref().take(limit).read_until(b'\n', &mut line) {
        Ok(n) => n,
        Err(e) if is_timeout(&e) => {
            return Err(ParseError::Timeout { partial: started || !line.is_empty() });
        }
        Err(e) => return Err(ParseError::Io(e)),
    };

    if read == 0 {
        return Err(if started {
            ParseError::Malformed("请求未完成时连接被关闭".to_string())
        } else {
            ParseError::Closed
        });
    }
    if read > *budget {
        return Err(ParseError::TooLarge);
    }
    *budget -= read;

    if line.last() != Some(&b'\n') {
        return Err(ParseError::Malformed("请求未完成时连接被关闭".to_string()));
    }
    line.pop();
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    String::from_utf8(line).map_err(|_| ParseError::Malformed("请求头包含非 UTF-8 字节".to_string()))
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), ParseError> {
    reader.read_exact(buf).map_err(|e| {
        if is_timeout(&e) {
            ParseError::Timeout { partial: true }
        } else if e.kind() == io::ErrorKind::UnexpectedEof {
            ParseError::Malformed("请求体不完整".to_string())
        } else {
            ParseError::Io(e)
        }
    })
}

fn read_chunked_body<R: BufRead>(reader: &mut R, max_body_size: usize) -> Result<Vec<u8>, ParseError> {
    let mut body = Vec::new();
    loop {
        // 块大小行与尾部字段共享一个小预算
        let mut line_budget = 1024;
        let size_line = read_line(reader, &mut line_budget, true)?;
        let size_field = size_line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_field, 16)
            .map_err(|_| ParseError::Malformed(format!("无效的块大小: {}", size_line)))?;

        if size == 0 {
            loop {
                let mut trailer_budget = 1024;
                if read_line(reader, &mut trailer_budget, true)?.is_empty() {
                    return Ok(body);
                }
            }
        }
        let end = match body.len().checked_add(size) {
            Some(end) if end <= max_body_size => end,
            _ => return Err(ParseError::TooLarge),
        };

        let start = body.len();
        body.resize(end, 0);
        read_exact(reader, &mut body[start..])?;

        let mut crlf = [0u8; 2];
        read_exact(reader, &mut crlf)?;
        if &crlf != b"\r\n" {
            return Err(ParseError::Malformed("块数据后缺少 CRLF".to_string()));
        }
    }
}

/// 解析 `a=1&b=2` 形式的参数，`+` 视为空格
pub fn parse_form_encoded(text: &str) -> HashMap<String, Vec<String>> {
    let mut params: HashMap<String, Vec<String>> = HashMap::new();
    for pair in text.split('&').filter(|p| !p.is_empty()) {
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        let name = name.replace('+', " ");
        let value = value.replace('+', " ");
        let name = decode_component(&name).unwrap_or(name);
        let value = decode_component(&value).unwrap_or(value);
        params.entry(name).or_default().push(value);
    }
    params
}
