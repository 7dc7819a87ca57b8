use crate::r#const::{listener_limits, relay_limits};

// 默认值函数
pub fn default_backlog() -> u32 {
    listener_limits::DEFAULT_BACKLOG
}

pub fn default_buffer_size() -> usize {
    relay_limits::DEFAULT_BUFFER_SIZE
}

pub fn default_connect_timeout() -> u64 {
    relay_limits::DEFAULT_CONNECT_TIMEOUT
}
