//! HTTP/1.x 响应写出
//!
//! 响应头在第一次 [`HttpResponse::write`] 时发送：
//! - 一次性写完（`last_part = true`）时自动补 `Content-Length`
//! - 分段写出且未指定长度时，HTTP/1.1 使用 chunked 编码，HTTP/1.0 在结束后关闭连接

use std::io::{self, Write};
use std::time::SystemTime;

use crate::server::http_cookie::HttpCookie;

/// 常用状态码的原因短语
pub fn reason_phrase(code: u16) -> &'static str {
    match code {
        100 => "Continue",
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        411 => "Length Required",
        413 => "Request Entity Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// HTTP 响应，直接写入底层连接
pub struct HttpResponse<'a> {
    writer: &'a mut dyn Write,
    version: String,
    keep_alive: bool,
    head_only: bool,
    status_code: u16,
    status_text: String,
    headers: Vec<(String, String)>,
    cookies: Vec<HttpCookie>,
    sent_headers: bool,
    sent_last_part: bool,
    chunked: bool,
    close_delimited: bool,
}

impl<'a> HttpResponse<'a> {
    /// `version` 与 `keep_alive` 来自对应的请求
    pub fn new(writer: &'a mut dyn Write, version: &str, keep_alive: bool) -> Self {
        Self {
            writer,
            version: version.to_string(),
            keep_alive,
            head_only: false,
            status_code: 200,
            status_text: reason_phrase(200).to_string(),
            headers: Vec::new(),
            cookies: Vec::new(),
            sent_headers: false,
            sent_last_part: false,
            chunked: false,
            close_delimited: false,
        }
    }

    /// HEAD 请求：照常计算响应头，但不发送响应体
    pub fn set_head_only(&mut self, head_only: bool) {
        self.head_only = head_only;
    }

    pub fn set_status(&mut self, code: u16, text: &str) {
        self.status_code = code;
        self.status_text = text.to_string();
    }

    /// 使用标准原因短语设置状态码
    pub fn set_status_code(&mut self, code: u16) {
        self.set_status(code, reason_phrase(code));
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    /// 设置响应头，覆盖已有的同名头（名称大小写不敏感）
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.remove_header(name);
        self.headers.push((name.to_string(), value.into()));
    }

    /// 追加响应头，保留已有的同名头
    pub fn add_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.push((name.to_string(), value.into()));
    }

    pub fn remove_header(&mut self, name: &str) {
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// 设置 Cookie，同名 Cookie 会被替换
    pub fn set_cookie(&mut self, cookie: HttpCookie) {
        self.cookies.retain(|c| c.name != cookie.name);
        self.cookies.push(cookie);
    }

    pub fn cookie(&self, name: &str) -> Option<&HttpCookie> {
        self.cookies.iter().find(|c| c.name == name)
    }

    pub fn cookies(&self) -> &[HttpCookie] {
        &self.cookies
    }

    pub fn has_sent_headers(&self) -> bool {
        self.sent_headers
    }

    pub fn has_sent_last_part(&self) -> bool {
        self.sent_last_part
    }

    /// 响应结束后是否必须关闭连接
    pub fn should_close(&self) -> bool {
        if !self.keep_alive || self.close_delimited {
            return true;
        }
        self.header("connection")
            .map(|v| v.to_ascii_lowercase().contains("close"))
            .unwrap_or(false)
    }

    /// 写出响应体片段，`last_part` 为 true 时结束响应
    pub fn write(&mut self, data: &[u8], last_part: bool) -> io::Result<()> {
        if self.sent_last_part {
            return Err(io::Error::other("响应已经结束"));
        }

        if !self.sent_headers {
            if self.header("content-length").is_none() {
                if last_part {
                    self.set_header("Content-Length", data.len().to_string());
                } else if self.version == "HTTP/1.1" {
                    self.chunked = true;
                    self.set_header("Transfer-Encoding", "chunked");
                } else {
                    self.close_delimited = true;
                }
            }
            self.write_headers()?;
        }

        if !self.head_only {
            if self.chunked {
                if !data.is_empty() {
                    write!(self.writer, "{:x}\r\n", data.len())?;
                    self.writer.write_all(data)?;
                    self.writer.write_all(b"\r\n")?;
                }
                if last_part {
                    self.writer.write_all(b"0\r\n\r\n")?;
                }
            } else if !data.is_empty() {
                self.writer.write_all(data)?;
            }
        }

        if last_part {
            self.sent_last_part = true;
            self.writer.flush()?;
        }
        Ok(())
    }

    /// 以纯文本完成一个状态页响应
    pub fn send_status_page(&mut self, code: u16) -> io::Result<()> {
        let text = reason_phrase(code);
        self.set_status(code, text);
        self.set_header("Content-Type", "text/plain; charset=UTF-8");
        let body = format!("{} {}\r\n", code, text);
        self.write(body.as_bytes(), true)
    }

    /// 302 重定向
    pub fn redirect(&mut self, url: &str) -> io::Result<()> {
        self.set_status(302, reason_phrase(302));
        self.set_header("Location", url);
        self.write(b"Redirect", true)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    fn write_headers(&mut self) -> io::Result<()> {
        if self.header("date").is_none() {
            self.set_header("Date", httpdate::fmt_http_date(SystemTime::now()));
        }
        if self.header("connection").is_none() {
            if !self.keep_alive || self.close_delimited {
                self.set_header("Connection", "close");
            } else if self.version == "HTTP/1.0" {
                self.set_header("Connection", "keep-alive");
            }
        }

        let mut head = format!("HTTP/1.1 {} {}\r\n", self.status_code, self.status_text);
        for (name, value) in &self.headers {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        for cookie in &self.cookies {
            head.push_str("Set-Cookie: ");
            head.push_str(&cookie.to_header_value());
            head.push_str("\r\n");
        }
        head.push_str("\r\n");

        self.writer.write_all(head.as_bytes())?;
        self.sent_headers = true;
        Ok(())
    }
}
