use std::sync::Once;

static CRYPTO_PROVIDER_INIT: Once = Once::new();

/// 确保 rustls 的 ring 加密后端只安装一次
///
/// 其他组件已安装进程级默认后端时保持不变
pub fn ensure_crypto_provider_installed() {
    CRYPTO_PROVIDER_INIT.call_once(|| {
        if rustls::crypto::ring::default_provider().install_default().is_err() {
            crate::utils::logger::debug!("🔐 rustls 加密后端已由其他组件安装");
        } else {
            crate::utils::logger::debug!("🔐 rustls ring 加密后端已安装");
        }
    });
}
