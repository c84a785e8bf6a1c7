//! 网络地址工具
//!
//! 监听地址为空或无法解析时，自动选择第一块处于运行状态的非回环 IPv4 网卡

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::utils::logger::{debug, warn};

/// 将配置中的主机名解析为监听地址
///
/// 合法的 IP 字面量原样使用；`localhost` 映射为回环地址；
/// 其他情况走网卡自动发现，找不到时退回未指定地址
pub fn resolve_bind_addr(host: &str, port: u16) -> SocketAddr {
    let host = host.trim();
    if let Ok(ip) = host.parse::<IpAddr>() {
        return SocketAddr::new(ip, port);
    }
    if host.eq_ignore_ascii_case("localhost") {
        return SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
    }

    if !host.is_empty() {
        warn!("⚠️ [Net] 无效的监听地址 '{}'，改为自动选择网卡", host);
    }

    match first_non_loopback_ipv4() {
        Some(ip) => {
            debug!("🔍 [Net] 自动选择网卡地址: {}", ip);
            SocketAddr::new(IpAddr::V4(ip), port)
        }
        None => {
            warn!("⚠️ [Net] 未找到可用的非回环 IPv4 网卡，监听所有地址");
            SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)
        }
    }
}

/// 枚举网卡，返回第一块 UP + RUNNING 且非回环的 IPv4 地址
#[cfg(unix)]
pub fn first_non_loopback_ipv4() -> Option<Ipv4Addr> {
    let mut addrs: *mut libc::ifaddrs = std::ptr::null_mut();
    // SAFETY: getifaddrs 成功时写入链表头，之后必须由 freeifaddrs 释放
    if unsafe { libc::getifaddrs(&mut addrs) } != 0 {
        return None;
    }

    let mut found = None;
    let mut cursor = addrs;
    while !cursor.is_null() {
        // SAFETY: cursor 指向 getifaddrs 返回链表中的有效节点
        let ifa = unsafe { &*cursor };
        let flags = ifa.ifa_flags as libc::c_int;
        let usable = flags & libc::IFF_UP != 0
            && flags & libc::IFF_RUNNING != 0
            && flags & libc::IFF_LOOPBACK == 0;

        if usable && !ifa.ifa_addr.is_null() {
            // SAFETY: ifa_addr 非空，sa_family 字段总是有效
            let family = unsafe { (*ifa.ifa_addr).sa_family } as libc::c_int;
            if family == libc::AF_INET {
                // SAFETY: AF_INET 地址的实际类型为 sockaddr_in
                let sin = unsafe { &*(ifa.ifa_addr as *const libc::sockaddr_in) };
                let ip = Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr));
                if !ip.is_loopback() && !ip.is_unspecified() {
                    found = Some(ip);
                    break;
                }
            }
        }
        cursor = ifa.ifa_next;
    }

    // SAFETY: addrs 来自成功的 getifaddrs 调用，且只释放一次
    unsafe { libc::freeifaddrs(addrs) };
    found
}

/// 非 unix 平台：借助 UDP connect 读取路由选出的本地地址（不发送数据包）
#[cfg(not(unix))]
pub fn first_non_loopback_ipv4() -> Option<Ipv4Addr> {
    let socket = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect((Ipv4Addr::new(192, 0, 2, 1), 9)).ok()?;
    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(ip) if !ip.is_loopback() && !ip.is_unspecified() => Some(ip),
        _ => None,
    }
}
