use serde::{Deserialize, Serialize};
use std::fmt;

/// 网络端点（地址 + 已解析的端口号）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    // 主机名或 IP 地址
    addr: String,
    // 端口号
    port: u16,
}

impl Endpoint {
    pub fn new(addr: impl Into<String>, port: u16) -> Self {
        Self {
            addr: addr.into(),
            port,
        }
    }

    #[inline(always)]
    pub fn addr(&self) -> &str {
        &self.addr
    }

    #[inline(always)]
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // IPv6 字面量需要方括号
        if self.addr.contains(':') {
            write!(f, "[{}]:{}", self.addr, self.port)
        } else {
            write!(f, "{}:{}", self.addr, self.port)
        }
    }
}

/// 转发规则
///
/// 一条规则描述一个本地监听端点以及所有连接要转发到的目标端点。
/// 规则在启动时由配置生成，之后不再修改。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForwardingRule {
    // 本地监听端点
    source: Endpoint,
    // 转发目标端点
    destination: Endpoint,
}

impl ForwardingRule {
    pub fn new(
        source_addr: impl Into<String>,
        source_port: u16,
        dest_addr: impl Into<String>,
        dest_port: u16,
    ) -> Self {
        Self {
            source: Endpoint::new(source_addr, source_port),
            destination: Endpoint::new(dest_addr, dest_port),
        }
    }

    #[inline(always)]
    pub fn source(&self) -> &Endpoint {
        &self.source
    }

    #[inline(always)]
    pub fn destination(&self) -> &Endpoint {
        &self.destination
    }
}

impl fmt::Display for ForwardingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.destination)
    }
}
