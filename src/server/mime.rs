//! 静态文件的 Content-Type 映射

/// 扩展名 → MIME 类型，`true` 表示文本类型（需要追加字符集）
const MIME_TABLE: &[(&str, &str, bool)] = &[
    ("png", "image/png", false),
    ("jpg", "image/jpeg", false),
    ("jpeg", "image/jpeg", false),
    ("gif", "image/gif", false),
    ("pdf", "application/pdf", false),
    ("txt", "text/plain", true),
    ("html", "text/html", true),
    ("htm", "text/html", true),
    ("css", "text/css", false),
    ("js", "text/javascript", false),
    ("svg", "image/svg+xml", false),
    ("woff", "font/woff", false),
    ("woff2", "font/woff2", false),
    ("ttf", "application/x-font-ttf", false),
    ("eot", "application/vnd.ms-fontobject", false),
    ("otf", "application/font-otf", false),
    ("json", "application/json", false),
];

/// 按文件扩展名推断 Content-Type，未知扩展名返回 None
pub fn content_type_for(filename: &str, encoding: &str) -> Option<String> {
    let name = filename.rsplit('/').next().unwrap_or(filename);
    let (_, ext) = name.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    MIME_TABLE
        .iter()
        .find(|(e, _, _)| *e == ext)
        .map(|(_, mime, text)| {
            if *text && !encoding.is_empty() {
                format!("{}; charset={}", mime, encoding)
            } else {
                mime.to_string()
            }
        })
}
