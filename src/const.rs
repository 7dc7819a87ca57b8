// 应用常量定义

//
// 配置参数限制常量
//

// 应用关闭等待时间限制
pub mod shutdown_timeout {
    // 默认值
    pub const DEFAULT: u64 = 30;
    // 最小值
    pub const MIN: u64 = 1;
    // 最大值
    pub const MAX: u64 = 120;
}

// 监听器配置限制
pub mod listener_limits {
    // 默认监听队列长度
    pub const DEFAULT_BACKLOG: u32 = 2;
    // 最小监听队列长度
    pub const MIN_BACKLOG: u32 = 1;
    // 最大监听队列长度
    pub const MAX_BACKLOG: u32 = 65535;
}

// 转发会话配置限制
pub mod relay_limits {
    // 默认单次读取块大小（字节）
    pub const DEFAULT_BUFFER_SIZE: usize = 4096 * 5;
    // 最小读取块大小（字节）
    pub const MIN_BUFFER_SIZE: usize = 1024;
    // 最大读取块大小（字节）
    pub const MAX_BUFFER_SIZE: usize = 1024 * 1024;
    // 默认目标连接超时（秒）
    pub const DEFAULT_CONNECT_TIMEOUT: u64 = 30;
    // 最小目标连接超时（秒）
    pub const MIN_CONNECT_TIMEOUT: u64 = 1;
    // 最大目标连接超时（秒）
    pub const MAX_CONNECT_TIMEOUT: u64 = 300;
}

// 接受连接限制
pub mod accept_limits {
    // 进程资源耗尽时暂停接受的时间（毫秒）
    pub const EXHAUSTED_BACKOFF_MS: u64 = 100;
}

// 内置端口名称表
pub mod well_known_ports {
    pub const HTTP: (&str, u16) = ("http", 80);
    pub const HTTPS: (&str, u16) = ("https", 443);
    pub const IMAPS: (&str, u16) = ("imaps", 993);
    pub const SMTPS: (&str, u16) = ("smtps", 587);
    pub const LEGACY_SMTPS: (&str, u16) = ("legacy-smtps", 465);
    // 旧配置文件中使用的名称
    pub const SMTPS_OLD: (&str, u16) = ("smtps_old", 465);

    pub const ALL: [(&str, u16); 6] = [HTTP, HTTPS, IMAPS, SMTPS, LEGACY_SMTPS, SMTPS_OLD];
}

//
// 指标标签常量
//

// 转发方向标签
pub mod direction_labels {
    // 客户端到目标
    pub const TO_DESTINATION: &str = "to_destination";
    // 目标到客户端
    pub const TO_CLIENT: &str = "to_client";
}
