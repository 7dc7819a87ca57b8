use std::io;
use std::time::Duration;
use thiserror::Error;

/// 应用错误类型
#[derive(Error, Debug)]
pub enum AppError {
    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),

    /// 监听地址绑定失败
    #[error("Unable to listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// 目标连接失败
    #[error("Transfer {name}: unable to connect to {destination}: {source}")]
    Connect {
        name: String,
        destination: String,
        #[source]
        source: io::Error,
    },

    /// 目标连接超时
    #[error("Transfer {name}: connecting to {destination} timed out after {timeout:?}")]
    ConnectTimeout {
        name: String,
        destination: String,
        timeout: Duration,
    },

    /// 转发过程中的 IO 错误
    #[error("Transfer error: {0}")]
    Transfer(io::Error),

    /// 内部错误
    #[error("Internal error: {0}")]
    Internal(String),
}

