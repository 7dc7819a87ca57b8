use once_cell::sync::Lazy;
use prometheus::{CounterVec, Encoder, IntGaugeVec, Opts, Registry, TextEncoder};

/// 应用指标
///
/// 所有指标都带有 `rule` 标签，取值为规则的源端点（addr:port）。
pub struct Metrics {
    registry: Registry,
    // 接受的客户端连接计数
    connections_accepted_total: CounterVec,
    // 目标连接失败计数
    connect_errors_total: CounterVec,
    // 转发过程错误计数
    relay_errors_total: CounterVec,
    // 转发字节数
    bytes_forwarded_total: CounterVec,
    // 活跃转发会话数
    active_relays: IntGaugeVec,
    // 被移除的监听器计数
    listeners_retired_total: CounterVec,
}

impl Metrics {
    /// 创建新的指标收集器
    fn new() -> Self {
        let registry = Registry::new();

        // 接受的客户端连接计数
        let connections_accepted_total = CounterVec::new(
            Opts::new(
                "forwarder_connections_accepted_total",
                "Total number of client connections accepted by the listeners.",
            ),
            &["rule"],
        )
        .unwrap();

        // 目标连接失败计数
        let connect_errors_total = CounterVec::new(
            Opts::new(
                "forwarder_connect_errors_total",
                "Total number of failed or timed out connection attempts to destinations.",
            ),
            &["rule"],
        )
        .unwrap();

        // 转发过程错误计数
        let relay_errors_total = CounterVec::new(
            Opts::new(
                "forwarder_relay_errors_total",
                "Total number of transfers that ended because of an I/O error.",
            ),
            &["rule"],
        )
        .unwrap();

        // 转发字节数
        let bytes_forwarded_total = CounterVec::new(
            Opts::new(
                "forwarder_bytes_forwarded_total",
                "Total number of bytes relayed, by direction.",
            ),
            &["rule", "direction"],
        )
        .unwrap();

        // 活跃转发会话数
        let active_relays = IntGaugeVec::new(
            Opts::new(
                "forwarder_active_relays",
                "Number of transfers currently relaying data.",
            ),
            &["rule"],
        )
        .unwrap();

        // 被移除的监听器计数
        let listeners_retired_total = CounterVec::new(
            Opts::new(
                "forwarder_listeners_retired_total",
                "Total number of listeners removed after an exceptional condition.",
            ),
            &["rule"],
        )
        .unwrap();

        // 注册指标
        registry
            .register(Box::new(connections_accepted_total.clone()))
            .unwrap();
        registry
            .register(Box::new(connect_errors_total.clone()))
            .unwrap();
        registry
            .register(Box::new(relay_errors_total.clone()))
            .unwrap();
        registry
            .register(Box::new(bytes_forwarded_total.clone()))
            .unwrap();
        registry.register(Box::new(active_relays.clone())).unwrap();
        registry
            .register(Box::new(listeners_retired_total.clone()))
            .unwrap();

        Self {
            registry,
            connections_accepted_total,
            connect_errors_total,
            relay_errors_total,
            bytes_forwarded_total,
            active_relays,
            listeners_retired_total,
        }
    }

    /// 获取注册表
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// 接受的客户端连接计数
    pub fn connections_accepted_total(&self) -> &CounterVec {
        &self.connections_accepted_total
    }

    /// 目标连接失败计数
    pub fn connect_errors_total(&self) -> &CounterVec {
        &self.connect_errors_total
    }

    /// 转发过程错误计数
    pub fn relay_errors_total(&self) -> &CounterVec {
        &self.relay_errors_total
    }

    /// 转发字节数
    pub fn bytes_forwarded_total(&self) -> &CounterVec {
        &self.bytes_forwarded_total
    }

    /// 活跃转发会话数
    pub fn active_relays(&self) -> &IntGaugeVec {
        &self.active_relays
    }

    /// 被移除的监听器计数
    pub fn listeners_retired_total(&self) -> &CounterVec {
        &self.listeners_retired_total
    }

    /// 以文本格式导出当前指标
    pub fn snapshot(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if encoder.encode(&self.registry.gather(), &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

/// 全局指标实例
pub static METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);
