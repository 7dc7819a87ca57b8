use crate::error::AppError;
use crate::r#const::well_known_ports;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// 主机配置中的端口：数字或端口名称
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortSpec {
    Number(u16),
    Name(String),
}

impl From<u16> for PortSpec {
    fn from(port: u16) -> Self {
        PortSpec::Number(port)
    }
}

impl From<&str> for PortSpec {
    fn from(name: &str) -> Self {
        PortSpec::Name(name.to_string())
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortSpec::Number(port) => write!(f, "{}", port),
            PortSpec::Name(name) => write!(f, "{}", name),
        }
    }
}

// 端口表条目：直接写端口号，或带描述信息的完整条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortEntry {
    Number(u16),
    Detailed {
        port: u16,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        protocol: Option<String>,
    },
}

impl PortEntry {
    #[inline(always)]
    pub fn port(&self) -> u16 {
        match self {
            PortEntry::Number(port) => *port,
            PortEntry::Detailed { port, .. } => *port,
        }
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            PortEntry::Number(_) => None,
            PortEntry::Detailed { description, .. } => description.as_deref(),
        }
    }

    pub fn protocol(&self) -> Option<&str> {
        match self {
            PortEntry::Number(_) => None,
            PortEntry::Detailed { protocol, .. } => protocol.as_deref(),
        }
    }
}

/// 端口名称表
///
/// 将符号端口名（如 `imaps`）映射为端口号。内置表由 [`PortTable::well_known`]
/// 提供，配置文件中的 `ports` 段可以新增或覆盖其中的条目。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortTable(BTreeMap<String, PortEntry>);

impl PortTable {
    /// 内置端口名称表
    pub fn well_known() -> Self {
        Self(
            well_known_ports::ALL
                .iter()
                .map(|(name, port)| (name.to_string(), PortEntry::Number(*port)))
                .collect(),
        )
    }

    pub fn insert(&mut self, name: impl Into<String>, entry: PortEntry) -> Option<PortEntry> {
        self.0.insert(name.into(), entry)
    }

    pub fn get(&self, name: &str) -> Option<&PortEntry> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 用另一张表的条目覆盖当前表
    pub fn merge(&mut self, overrides: PortTable) {
        self.0.extend(overrides.0);
    }

    /// 将端口描述解析为端口号
    ///
    /// 名称优先在表中查找，找不到时再尝试按十进制数字解析。
    pub fn resolve(&self, spec: &PortSpec) -> Result<u16, AppError> {
        match spec {
            PortSpec::Number(port) => Ok(*port),
            PortSpec::Name(name) => {
                if let Some(entry) = self.0.get(name) {
                    return Ok(entry.port());
                }

                name.trim()
                    .parse::<u16>()
                    .map_err(|_| AppError::Config(format!("Unknown port name '{}'", name)))
            }
        }
    }
}
