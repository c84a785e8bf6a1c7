//! rat_httpd 命令行入口
//!
//! 从 TOML 配置启动监听器：`/api/session` 返回当前会话的 JSON，其余路径由静态文件控制器提供。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde_json::json;

use rat_httpd::server::{
    handler_fn, HttpListener, HttpRequest, HttpResponse, HttpSessionStore, RequestMapper, Settings,
    StaticFileController,
};
use rat_httpd::utils::logger::{info, Logger};

#[derive(Debug, Parser)]
#[command(name = "rat_httpd", version, about = "嵌入式多线程 HTTP 服务器")]
struct Args {
    /// TOML 配置文件
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 覆盖监听地址
    #[arg(long)]
    host: Option<String>,

    /// 覆盖监听端口
    #[arg(short, long)]
    port: Option<u16>,

    /// 覆盖文档根目录
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// 覆盖日志级别
    #[arg(long)]
    log_level: Option<String>,
}

fn load_settings(args: &Args) -> anyhow::Result<Settings> {
    let mut settings = match &args.config {
        Some(path) => Settings::from_file(path).with_context(|| format!("加载配置 {} 失败", path.display()))?,
        None => Settings::default(),
    };
    if let Some(host) = &args.host {
        settings.listener.host = host.clone();
    }
    if let Some(port) = args.port {
        settings.listener.port = port;
    }
    if let Some(root) = &args.root {
        settings.docroot.path = root.clone();
    }
    if let Some(level) = &args.log_level {
        settings.log.level = level.clone();
    }
    settings.validate()?;
    Ok(settings)
}

fn session_api(sessions: Arc<HttpSessionStore>) -> Arc<dyn rat_httpd::RequestHandler> {
    handler_fn(move |request: &HttpRequest, response: &mut HttpResponse<'_>| {
        let session = sessions.get_session(request, response, true);
        let visits = session.get("visits").and_then(|v| v.as_u64()).unwrap_or(0) + 1;
        session.set("visits", visits);

        let body = json!({
            "id": session.get_id(),
            "values": session.get_all(),
        });
        response.set_header("Content-Type", "application/json; charset=UTF-8");
        response.write(&serde_json::to_vec(&body)?, true)?;
        Ok(())
    })
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let settings = load_settings(&args)?;
    Logger::init(settings.log.clone())?;

    let sessions = HttpSessionStore::new(settings.sessions.clone());
    let files = Arc::new(StaticFileController::new(&settings.docroot));
    let mapper = RequestMapper::new()
        .route("/api/session", session_api(sessions.clone()))
        .fallback(files)
        .with_session_store(sessions.clone());

    let listener = HttpListener::new(settings.listener.clone(), Arc::new(mapper));
    listener.start()?;
    info!("📂 [rat_httpd] 文档根目录: {}", settings.docroot.path.display());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("创建信号运行时失败")?;
    runtime.block_on(tokio::signal::ctrl_c()).context("等待 Ctrl+C 失败")?;

    info!("👋 [rat_httpd] 收到退出信号，正在停止");
    listener.stop();
    sessions.shutdown();
    Ok(())
}
