//! 静态文件控制器
//!
//! 从文档根目录提供文件，小文件进入 [`StaticFileCache`]。
//! 大文件按 64 KiB 分块写出，不会整体读入内存。

use std::fs::File;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::error::RatResult;
use crate::server::config::StaticFileConfig;
use crate::server::file_cache::{CacheEntry, StaticFileCache};
use crate::server::http_request::HttpRequest;
use crate::server::http_response::HttpResponse;
use crate::server::mime::content_type_for;
use crate::server::request_handler::RequestHandler;
use crate::utils::logger::{debug, warn};

/// 单次读写的块大小
const CHUNK_SIZE: usize = 64 * 1024;

/// 文件访问接口
pub trait FileSystem: Send + Sync {
    fn is_dir(&self, path: &Path) -> bool;

    fn exists(&self, path: &Path) -> bool;

    /// 打开文件，返回读取器与文件大小
    fn open(&self, path: &Path) -> io::Result<(Box<dyn Read + Send>, u64)>;
}

/// 本地磁盘
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFileSystem;

impl FileSystem for LocalFileSystem {
    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn open(&self, path: &Path) -> io::Result<(Box<dyn Read + Send>, u64)> {
        let file = File::open(path)?;
        let metadata = file.metadata()?;
        if metadata.is_dir() {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "目录不可读取"));
        }
        Ok((Box::new(file), metadata.len()))
    }
}

/// 静态文件控制器
pub struct StaticFileController {
    docroot: PathBuf,
    encoding: String,
    max_age_secs: u64,
    max_cached_file_size: usize,
    cache: StaticFileCache,
    fs: Arc<dyn FileSystem>,
}

impl StaticFileController {
    pub fn new(config: &StaticFileConfig) -> Self {
        Self::with_file_system(config, Arc::new(LocalFileSystem))
    }

    pub fn with_file_system(config: &StaticFileConfig, fs: Arc<dyn FileSystem>) -> Self {
        debug!(
            "📁 [StaticFile] 文档根目录: {}，缓存 {} 字节 / {} 毫秒",
            config.path.display(),
            config.cache_size,
            config.cache_time
        );
        Self {
            docroot: config.path.clone(),
            encoding: config.encoding.clone(),
            max_age_secs: config.max_age / 1000,
            max_cached_file_size: config.max_cached_file_size,
            cache: StaticFileCache::new(config.cache_size, Duration::from_millis(config.cache_time)),
            fs,
        }
    }

    pub fn cache(&self) -> &StaticFileCache {
        &self.cache
    }

    pub fn docroot(&self) -> &Path {
        &self.docroot
    }

    fn apply_headers(&self, filename: &str, response: &mut HttpResponse<'_>) {
        if let Some(content_type) = content_type_for(filename, &self.encoding) {
            response.set_header("Content-Type", content_type);
        }
        response.set_header("Cache-Control", format!("max-age={}", self.max_age_secs));
    }

    /// 将请求路径映射到文档根目录下的文件，目录映射到其 index.html
    fn resolve(&self, path: &str) -> PathBuf {
        let filename = self.docroot.join(path.trim_start_matches('/'));
        if self.fs.is_dir(&filename) {
            filename.join("index.html")
        } else {
            filename
        }
    }
}

impl RequestHandler for StaticFileController {
    fn service(&self, request: &HttpRequest, response: &mut HttpResponse<'_>) -> RatResult<()> {
        let path = request.path();

        if let Some(entry) = self.cache.lookup(path) {
            debug!("⚡ [StaticFile] 缓存命中: {}", path);
            self.apply_headers(&entry.filename, response);
            response.write(&entry.document, true)?;
            return Ok(());
        }

        if Path::new(path).components().any(|c| c == Component::ParentDir) {
            warn!("🚫 [StaticFile] 拒绝越级路径: {}", path);
            response.send_status_page(403)?;
            return Ok(());
        }

        let filename = self.resolve(path);
        let (mut reader, size) = match self.fs.open(&filename) {
            Ok(opened) => opened,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound && self.fs.exists(&filename) {
                    warn!("🚫 [StaticFile] 无法读取文件 {}: {}", filename.display(), e);
                    response.send_status_page(403)?;
                } else {
                    debug!("❓ [StaticFile] 文件不存在: {}", filename.display());
                    response.send_status_page(404)?;
                }
                return Ok(());
            }
        };

        let filename_str = filename.to_string_lossy().into_owned();
        self.apply_headers(&filename_str, response);
        response.set_header("Content-Length", size.to_string());

        if request.method() == "HEAD" {
            response.write(&[], true)?;
            return Ok(());
        }

        let cacheable = size <= self.max_cached_file_size as u64;
        let mut document = if cacheable { Vec::with_capacity(size as usize) } else { Vec::new() };
        let mut buffer = vec![0u8; CHUNK_SIZE];
        loop {
            let read = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            response.write(&buffer[..read], false)?;
            if cacheable {
                document.extend_from_slice(&buffer[..read]);
            }
        }
        response.write(&[], true)?;

        if cacheable && self.cache.insert(path, CacheEntry::new(document, filename_str)) {
            debug!("💾 [StaticFile] 已缓存: {}", path);
        }
        Ok(())
    }
}
