use crate::{
    config::defaults::{default_backlog, default_buffer_size, default_connect_timeout},
    r#const::{listener_limits, relay_limits},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

// 监听器配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "lowercase")]
pub struct ListenerConfig {
    // 监听队列长度
    #[serde(default = "default_backlog")]
    #[validate(range(
        min = "listener_limits::MIN_BACKLOG",
        max = "listener_limits::MAX_BACKLOG",
        message = "Listener backlog is out of valid range"
    ))]
    pub backlog: u32,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            backlog: default_backlog(),
        }
    }
}

// 转发会话配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "snake_case")]
pub struct RelayConfig {
    // 单次读取块大小（字节）
    #[serde(default = "default_buffer_size")]
    #[validate(range(
        min = "relay_limits::MIN_BUFFER_SIZE",
        max = "relay_limits::MAX_BUFFER_SIZE",
        message = "Relay buffer size is out of valid range"
    ))]
    pub buffer_size: usize,
    // 目标连接超时（秒）
    #[serde(default = "default_connect_timeout")]
    #[validate(range(
        min = "relay_limits::MIN_CONNECT_TIMEOUT",
        max = "relay_limits::MAX_CONNECT_TIMEOUT",
        message = "Relay connect timeout is out of valid range"
    ))]
    pub connect_timeout: u64,
}

impl RelayConfig {
    #[inline(always)]
    pub fn connect_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            connect_timeout: default_connect_timeout(),
        }
    }
}
