use crate::config::ports::PortSpec;
use serde::{Deserialize, Serialize};
use validator::Validate;

// 端点配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "lowercase")]
pub struct EndpointConfig {
    // 主机名或 IP 地址
    #[validate(length(min = 1, message = "Address cannot be empty"))]
    pub addr: String,
    // 端口号或端口名称
    pub port: PortSpec,
}

impl EndpointConfig {
    pub fn new(addr: impl Into<String>, port: impl Into<PortSpec>) -> Self {
        Self {
            addr: addr.into(),
            port: port.into(),
        }
    }
}

// 主机转发配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "lowercase")]
pub struct HostConfig {
    // 本地监听端点
    #[validate(nested)]
    pub source: EndpointConfig,
    // 转发目标端点
    #[validate(nested)]
    pub destination: EndpointConfig,
}
