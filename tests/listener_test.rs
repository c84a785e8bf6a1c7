//! 监听器端到端测试：通过真实 TCP 连接验证分配、拒绝、静态文件与会话

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use rat_httpd::server::listener::REJECT_RESPONSE;
use rat_httpd::server::{
    handler_fn, HttpListener, HttpRequest, HttpResponse, HttpSessionStore, ListenerConfig, RequestHandler,
    RequestMapper, SessionStoreConfig, StaticFileConfig, StaticFileController,
};

fn listener_config(min_threads: usize, max_threads: usize) -> ListenerConfig {
    ListenerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        min_threads,
        max_threads,
        read_timeout: 3000,
        ..ListenerConfig::default()
    }
}

fn path_echo() -> Arc<dyn RequestHandler> {
    handler_fn(|request: &HttpRequest, response: &mut HttpResponse<'_>| {
        response.set_header("Content-Type", "text/plain");
        response.write(request.path().as_bytes(), true)?;
        Ok(())
    })
}

fn start(config: ListenerConfig, handler: Arc<dyn RequestHandler>) -> (HttpListener, SocketAddr) {
    let listener = HttpListener::new(config, handler);
    listener.start().unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

fn connect(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    stream
}

struct Response {
    head: String,
    body: String,
}

impl Response {
    fn header(&self, name: &str) -> Option<&str> {
        let prefix = format!("{}: ", name.to_ascii_lowercase());
        self.head.lines().find_map(|line| {
            if line.to_ascii_lowercase().starts_with(&prefix) {
                Some(line[prefix.len()..].trim())
            } else {
                None
            }
        })
    }
}

fn read_response(reader: &mut BufReader<TcpStream>) -> Response {
    let mut head = String::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        if line == "\r\n" || line.is_empty() {
            break;
        }
        head.push_str(&line);
    }
    let mut response = Response { head, body: String::new() };
    let length = response
        .header("Content-Length")
        .map(|v| v.parse::<usize>().unwrap())
        .unwrap_or(0);
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).unwrap();
    response.body = String::from_utf8(body).unwrap();
    response
}

fn get(addr: SocketAddr, path: &str) -> Response {
    let mut stream = connect(addr);
    let request = format!("GET {} HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n", path);
    stream.write_all(request.as_bytes()).unwrap();
    read_response(&mut BufReader::new(stream))
}

#[test]
fn test_connection_beyond_pool_gets_503() {
    let (listener, addr) = start(listener_config(0, 2), path_echo());

    // 两个连接占满处理器（不发送请求，处理器阻塞在读取上）
    let mut first = connect(addr);
    let mut second = connect(addr);

    let mut third = connect(addr);
    let mut rejected = Vec::new();
    third.read_to_end(&mut rejected).unwrap();
    assert_eq!(rejected, REJECT_RESPONSE);

    let pool = listener.pool().unwrap();
    assert_eq!(pool.handler_count(), 2);

    for (stream, path) in [(&mut first, "/first"), (&mut second, "/second")] {
        write!(stream, "GET {} HTTP/1.1\r\nConnection: close\r\n\r\n", path).unwrap();
        let response = read_response(&mut BufReader::new(stream.try_clone().unwrap()));
        assert!(response.head.starts_with("HTTP/1.1 200 OK"));
        assert_eq!(response.body, path);
    }

    listener.stop();
    assert!(!listener.is_listening());
}

#[test]
fn test_every_excess_connection_is_rejected() {
    let (listener, addr) = start(listener_config(0, 1), path_echo());
    let _held = connect(addr);

    for _ in 0..3 {
        let mut extra = connect(addr);
        let mut rejected = Vec::new();
        extra.read_to_end(&mut rejected).unwrap();
        assert_eq!(rejected, REJECT_RESPONSE);
    }
    assert_eq!(listener.pool().unwrap().handler_count(), 1);
}

#[test]
fn test_keep_alive_reuses_connection() {
    let (_listener, addr) = start(listener_config(0, 4), path_echo());
    let mut stream = connect(addr);
    let mut reader = BufReader::new(stream.try_clone().unwrap());

    for path in ["/a", "/b", "/c"] {
        write!(stream, "GET {} HTTP/1.1\r\nHost: test\r\n\r\n", path).unwrap();
        let response = read_response(&mut reader);
        assert!(response.head.starts_with("HTTP/1.1 200 OK"));
        assert_eq!(response.body, path);
    }
}

#[test]
fn test_static_files_through_listener() {
    let docroot = tempfile::tempdir().unwrap();
    std::fs::write(docroot.path().join("index.html"), "<h1>home</h1>").unwrap();
    std::fs::create_dir(docroot.path().join("docs")).unwrap();
    std::fs::write(docroot.path().join("docs").join("index.html"), "docs").unwrap();
    std::fs::write(docroot.path().join("notes.txt"), "plain notes").unwrap();

    let controller = StaticFileController::new(&StaticFileConfig {
        path: docroot.path().to_path_buf(),
        ..StaticFileConfig::default()
    });
    let (_listener, addr) = start(listener_config(1, 4), Arc::new(controller));

    let response = get(addr, "/");
    assert!(response.head.starts_with("HTTP/1.1 200 OK"));
    assert_eq!(response.body, "<h1>home</h1>");
    assert_eq!(response.header("Content-Type"), Some("text/html; charset=UTF-8"));
    assert_eq!(response.header("Cache-Control"), Some("max-age=60"));

    assert_eq!(get(addr, "/docs").body, "docs");
    assert_eq!(get(addr, "/notes.txt").body, "plain notes");

    let response = get(addr, "/../secret");
    assert!(response.head.starts_with("HTTP/1.1 403 Forbidden"));
    let response = get(addr, "/docs/%2e%2e/notes.txt");
    assert!(response.head.starts_with("HTTP/1.1 403 Forbidden"));

    let response = get(addr, "/missing.png");
    assert!(response.head.starts_with("HTTP/1.1 404 Not Found"));
}

#[test]
fn test_session_survives_across_requests() {
    let sessions = HttpSessionStore::new(SessionStoreConfig::default());
    let api_sessions = sessions.clone();
    let counter = handler_fn(move |request: &HttpRequest, response: &mut HttpResponse<'_>| {
        let session = api_sessions.get_session(request, response, true);
        let visits = session.get("visits").and_then(|v| v.as_u64()).unwrap_or(0) + 1;
        session.set("visits", visits);
        response.write(visits.to_string().as_bytes(), true)?;
        Ok(())
    });
    let mapper = RequestMapper::new()
        .route("/count", counter)
        .with_session_store(sessions.clone());
    let (_listener, addr) = start(listener_config(0, 2), Arc::new(mapper));

    let mut stream = connect(addr);
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    stream.write_all(b"GET /count HTTP/1.1\r\n\r\n").unwrap();
    let first = read_response(&mut reader);
    assert_eq!(first.body, "1");

    let cookie = first.header("Set-Cookie").unwrap().to_string();
    assert!(cookie.starts_with("sessionid="));
    assert!(cookie.contains("HttpOnly"));
    let pair = cookie.split(';').next().unwrap().to_string();

    write!(stream, "GET /count HTTP/1.1\r\nCookie: {}\r\n\r\n", pair).unwrap();
    let second = read_response(&mut reader);
    assert_eq!(second.body, "2");
    assert_eq!(sessions.session_count(), 1);

    // 未知路由：会话照常建立，返回 404
    let response = get(addr, "/elsewhere");
    assert!(response.head.starts_with("HTTP/1.1 404 Not Found"));
    assert_eq!(sessions.session_count(), 2);
    sessions.shutdown();
}

#[test]
fn test_bind_failure_leaves_listener_stopped() {
    let occupied = TcpListener::bind("127.0.0.1:0").unwrap();
    let config = ListenerConfig {
        port: occupied.local_addr().unwrap().port(),
        ..listener_config(0, 2)
    };
    let listener = HttpListener::new(config, path_echo());
    assert!(listener.start().is_err());
    assert!(!listener.is_listening());
    assert!(listener.local_addr().is_none());
}

#[test]
fn test_stop_releases_port() {
    let (listener, addr) = start(listener_config(1, 2), path_echo());
    assert!(get(addr, "/ping").head.starts_with("HTTP/1.1 200 OK"));
    listener.stop();
    assert!(!listener.is_listening());
    assert!(TcpListener::bind(addr).is_ok());
}

#[test]
fn test_relative_target_cannot_escape_docroot() {
    let base = tempfile::tempdir().unwrap();
    let docroot = base.path().join("www");
    std::fs::create_dir(&docroot).unwrap();
    std::fs::write(docroot.join("index.html"), "home").unwrap();
    std::fs::write(base.path().join("secret.txt"), "TOP SECRET").unwrap();

    let controller = StaticFileController::new(&StaticFileConfig {
        path: docroot,
        ..StaticFileConfig::default()
    });
    let (_listener, addr) = start(listener_config(0, 2), Arc::new(controller));

    for target in ["../secret.txt", "www/../../secret.txt"] {
        let response = get(addr, target);
        assert!(response.head.starts_with("HTTP/1.1 400 Bad Request"), "{}", response.head);
        assert!(!response.body.contains("TOP SECRET"));
    }
    let response = get(addr, "/%2e%2e/secret.txt");
    assert!(response.head.starts_with("HTTP/1.1 403 Forbidden"));
    assert!(!response.body.contains("TOP SECRET"));
}

#[test]
fn test_overflowing_chunk_size_gets_413() {
    let (_listener, addr) = start(listener_config(0, 2), path_echo());
    let mut stream = connect(addr);
    stream
        .write_all(b"POST /up HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\nffffffffffffffff\r\n")
        .unwrap();
    let response = read_response(&mut BufReader::new(stream));
    assert!(response.head.starts_with("HTTP/1.1 413 "), "{}", response.head);
}
