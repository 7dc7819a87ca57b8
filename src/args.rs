use crate::r#const::shutdown_timeout;
use clap::{ArgAction, Parser};
use std::path::PathBuf;

// Forwarder - TCP 端口转发服务
#[derive(Parser, Debug, Clone)]
#[command(
    name = "forwarderd",
    author,
    version,
    about = "A raw TCP port forwarder that exposes internal services through fixed front-end ports.\n\n\
             Key Features:\n\
             - Multiple forwarding rules: each rule binds a local address/port and relays to one destination.\n\
             - Symbolic ports: destinations and sources may name ports (http, https, imaps, smtps, ...).\n\
             - Extensible port table: the configuration file can add or override port names.\n\
             - YAML or JSON configuration, selected by file extension."
)]
pub struct Args {
    // 配置文件路径
    #[clap(
        short,
        long,
        value_name = "FILE",
        default_value = "config.yaml",
        help = "Path to the configuration file (.yaml, .yml or .json)"
    )]
    pub config: PathBuf,

    // 是否输出详细日志
    #[clap(
        short,
        long,
        visible_alias = "debug",
        action = ArgAction::SetTrue,
        help = "Enable verbose (debug) logging"
    )]
    pub verbose: bool,

    // 是否仅测试配置文件
    #[clap(
        short = 't',
        long = "test",
        action = ArgAction::SetTrue,
        help = "Test configuration file for validity and exit"
    )]
    pub test_config: bool,

    // 优雅关闭超时时间（秒）
    #[clap(
        long = "shutdown-timeout",
        value_name = "SECONDS",
        default_value_t = shutdown_timeout::DEFAULT,
        help = "Maximum time in seconds to wait for open transfers on shutdown"
    )]
    pub shutdown_timeout: u64,
}

impl Args {
    // 解析命令行参数
    pub fn parse_args() -> Self {
        Self::parse()
    }

    // 验证参数
    pub fn validation(&self) -> Result<(), String> {
        // 验证关闭超时时间
        if self.shutdown_timeout < shutdown_timeout::MIN
            || self.shutdown_timeout > shutdown_timeout::MAX
        {
            return Err(format!(
                "Shutdown timeout must be between {} and {} seconds",
                shutdown_timeout::MIN,
                shutdown_timeout::MAX
            ));
        }

        Ok(())
    }
}
