//! 监听器的 TLS 配置加载
//!
//! 使用 rustls + ring 作为加密后端，从 PEM 文件读取证书链和私钥

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::ServerConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls_pemfile::{certs, private_key};

use crate::error::{RatError, RatResult};
use crate::utils::crypto_provider::ensure_crypto_provider_installed;
use crate::utils::logger::info;

fn load_certs(path: &Path) -> RatResult<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .map_err(|e| RatError::TlsError(format!("打开证书文件失败 {}: {}", path.display(), e)))?;
    let mut reader = BufReader::new(file);
    let chain = certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| RatError::TlsError(format!("解析证书失败: {}", e)))?;
    if chain.is_empty() {
        return Err(RatError::TlsError(format!("证书文件为空: {}", path.display())));
    }
    Ok(chain)
}

fn load_key(path: &Path) -> RatResult<PrivateKeyDer<'static>> {
    let file = File::open(path)
        .map_err(|e| RatError::TlsError(format!("打开私钥文件失败 {}: {}", path.display(), e)))?;
    let mut reader = BufReader::new(file);
    private_key(&mut reader)
        .map_err(|e| RatError::TlsError(format!("解析私钥失败: {}", e)))?
        .ok_or_else(|| RatError::TlsError(format!("私钥文件为空: {}", path.display())))
}

/// 读取 PEM 证书与私钥，构建仅支持 HTTP/1.1 的服务端配置
pub fn load_server_config(key_path: &Path, cert_path: &Path) -> RatResult<Arc<ServerConfig>> {
    ensure_crypto_provider_installed();

    let chain = load_certs(cert_path)?;
    let key = load_key(key_path)?;
    let chain_len = chain.len();

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(chain, key)?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    info!("🔐 [TLS] 已加载证书 {} ({} 个)", cert_path.display(), chain_len);
    Ok(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_files_are_tls_errors() {
        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("missing.key");
        let cert = dir.path().join("missing.crt");
        assert!(matches!(load_server_config(&key, &cert), Err(RatError::TlsError(_))));
    }

    #[test]
    fn test_empty_pem_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("server.crt");
        let key = dir.path().join("server.key");
        File::create(&cert).unwrap().write_all(b"not a certificate\n").unwrap();
        File::create(&key).unwrap().write_all(b"").unwrap();

        let err = load_server_config(&key, &cert).err().unwrap();
        assert!(err.to_string().contains("证书文件为空"), "{}", err);
    }
}
