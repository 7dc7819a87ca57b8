use std::collections::HashSet;

use crate::config::common::{ListenerConfig, RelayConfig};
use crate::error::AppError;
use tracing::debug;
use validator::Validate;

use super::Config;

impl Config {
    // 验证配置
    pub fn validate(&self) -> Result<(), AppError> {
        // 至少需要一个转发主机
        if self.hosts.is_empty() {
            return Err(AppError::Config(
                "No hosts defined, at least one forwarding host is required".to_string(),
            ));
        }

        // 验证主机条目字段
        for (index, host) in self.hosts.iter().enumerate() {
            host.validate().map_err(|e| {
                AppError::Config(format!("Host #{} is invalid: {}", index, e))
            })?;
        }

        // 解析全部端口名称，未知名称在这里报错
        let rules = self.rules()?;

        let mut sources = HashSet::new();
        for (index, rule) in rules.iter().enumerate() {
            // 目标端口不能为 0
            if rule.destination().port() == 0 {
                return Err(AppError::Config(format!(
                    "Destination port of host #{} ({}) must not be 0",
                    index,
                    rule.destination()
                )));
            }

            // 端口 0 由系统分配，不参与重复检查
            if rule.source().port() != 0 && !sources.insert(rule.source().clone()) {
                return Err(AppError::Config(format!(
                    "Source endpoint {} of host #{} is duplicated",
                    rule.source(),
                    index
                )));
            }

            debug!("Host #{} resolved to rule {}", index, rule);
        }

        // 验证监听器配置
        self.validate_listener_config(&self.listener)?;

        // 验证转发会话配置
        self.validate_relay_config(&self.relay)?;

        Ok(())
    }

    // 验证监听器配置，取值范围由 Validate 派生检查
    pub fn validate_listener_config(&self, listener: &ListenerConfig) -> Result<(), AppError> {
        listener
            .validate()
            .map_err(|e| AppError::Config(format!("Listener configuration is invalid: {}", e)))
    }

    // 验证转发会话配置
    pub fn validate_relay_config(&self, relay: &RelayConfig) -> Result<(), AppError> {
        relay
            .validate()
            .map_err(|e| AppError::Config(format!("Relay configuration is invalid: {}", e)))
    }
}
