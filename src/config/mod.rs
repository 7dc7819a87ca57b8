// 导出子模块
pub mod common;
pub mod defaults;
pub mod hosts;
pub mod ports;
pub mod rule;
pub mod validation;

// 重新导出常用类型
pub use self::common::{ListenerConfig, RelayConfig};
pub use self::hosts::{EndpointConfig, HostConfig};
pub use self::ports::{PortEntry, PortSpec, PortTable};
pub use self::rule::{Endpoint, ForwardingRule};

use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;

// 配置文件格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
}

impl ConfigFormat {
    // 根据文件扩展名判断配置格式
    pub fn from_path(path: &Path) -> Result<Self, AppError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());

        match extension.as_deref() {
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            Some("json") => Ok(ConfigFormat::Json),
            _ => Err(AppError::Config(format!(
                "Configuration file format of {:?} is invalid, expected .yaml, .yml or .json",
                path
            ))),
        }
    }
}

// 配置文件结构
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub struct Config {
    // 端口名称表（与内置表合并）
    #[serde(default)]
    pub ports: PortTable,
    // 转发主机定义
    pub hosts: Vec<HostConfig>,
    // 监听器配置
    #[serde(default)]
    pub listener: ListenerConfig,
    // 转发会话配置
    #[serde(default)]
    pub relay: RelayConfig,
}

impl Config {
    // 从文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, AppError> {
        let path = path.as_ref();
        debug!("Attempting to load configuration from file: {:?}", path);

        // 按扩展名确定格式，不支持的格式在读取文件前就失败
        let format = ConfigFormat::from_path(path)?;

        // 打开并读取文件
        let mut file = File::open(path).map_err(|e| {
            AppError::Config(format!(
                "Unable to open configuration file {:?}: {}",
                path, e
            ))
        })?;

        let mut content = String::new();
        file.read_to_string(&mut content).map_err(|e| {
            AppError::Config(format!(
                "Unable to read configuration file {:?}: {}",
                path, e
            ))
        })?;

        Self::parse(&content, format)
    }

    // 解析配置内容
    pub fn parse(content: &str, format: ConfigFormat) -> Result<Self, AppError> {
        let mut config: Config = match format {
            ConfigFormat::Yaml => serde_yaml::from_str(content)
                .map_err(|e| AppError::Config(format!("Configuration file parsing error: {}", e)))?,
            ConfigFormat::Json => serde_json::from_str(content)
                .map_err(|e| AppError::Config(format!("Configuration file parsing error: {}", e)))?,
        };

        // 预处理配置
        config.post_process();

        // 验证配置
        config.validate()?;

        Ok(config)
    }

    // 预处理配置：将文件中的端口表合并到内置表之上
    fn post_process(&mut self) {
        let overrides = std::mem::take(&mut self.ports);
        let mut ports = PortTable::well_known();
        ports.merge(overrides);
        self.ports = ports;
    }

    /// 生成已解析端口号的转发规则列表
    pub fn rules(&self) -> Result<Vec<ForwardingRule>, AppError> {
        self.hosts
            .iter()
            .enumerate()
            .map(|(index, host)| self.resolve_host(index, host))
            .collect()
    }

    // 解析单个主机配置
    fn resolve_host(&self, index: usize, host: &HostConfig) -> Result<ForwardingRule, AppError> {
        let source_port = self
            .ports
            .resolve(&host.source.port)
            .map_err(|e| with_context(e, &format!("source of host #{}", index)))?;
        let dest_port = self
            .ports
            .resolve(&host.destination.port)
            .map_err(|e| with_context(e, &format!("destination of host #{}", index)))?;

        Ok(ForwardingRule::new(
            host.source.addr.clone(),
            source_port,
            host.destination.addr.clone(),
            dest_port,
        ))
    }
}

// 为配置错误附加上下文
fn with_context(err: AppError, context: &str) -> AppError {
    match err {
        AppError::Config(msg) => AppError::Config(format!("{} for {}", msg, context)),
        other => other,
    }
}
