use crate::config::{ForwardingRule, RelayConfig};
use crate::error::AppError;
use crate::metrics::METRICS;
use crate::r#const::direction_labels;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};

/// 转发会话的共享上下文
///
/// 调度器创建一次，传给所有会话。会话结束时通过 `completion` 唤醒调度器。
#[derive(Debug, Clone, Default)]
pub struct RelayContext {
    config: RelayConfig,
    completion: Arc<Notify>,
}

impl RelayContext {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            completion: Arc::new(Notify::new()),
        }
    }

    #[inline(always)]
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// 等待任一会话结束
    pub async fn completed(&self) {
        self.completion.notified().await
    }
}

/// 会话结束原因
#[derive(Debug)]
pub enum CloseReason {
    // 客户端关闭了连接
    ClientClosed,
    // 目标关闭了连接
    DestinationClosed,
    // 转发过程出错
    Failed(AppError),
}

impl CloseReason {
    pub fn is_error(&self) -> bool {
        matches!(self, CloseReason::Failed(_))
    }
}

/// 会话结束结果
#[derive(Debug)]
pub struct RelayOutcome {
    // 会话名称（客户端地址:端口）
    pub name: String,
    // 结束原因
    pub reason: CloseReason,
    // 客户端到目标的字节数
    pub bytes_to_destination: u64,
    // 目标到客户端的字节数
    pub bytes_to_client: u64,
}

// 会话与调度器共享的状态
#[derive(Debug)]
struct RelayState {
    alive: AtomicBool,
    bytes_to_destination: AtomicU64,
    bytes_to_client: AtomicU64,
}

impl RelayState {
    fn new() -> Self {
        Self {
            alive: AtomicBool::new(true),
            bytes_to_destination: AtomicU64::new(0),
            bytes_to_client: AtomicU64::new(0),
        }
    }
}

// 会话任务退出时（包括 panic）标记结束并通知调度器
struct CompletionGuard {
    state: Arc<RelayState>,
    completion: Arc<Notify>,
    label: String,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.state.alive.store(false, Ordering::Release);
        METRICS
            .active_relays()
            .with_label_values(&[&self.label])
            .dec();
        self.completion.notify_one();
    }
}

/// 转发会话
///
/// 持有一个客户端连接和一个到目标的连接，在独立任务中双向复制数据，
/// 直到任一端关闭或出错。调度器只持有句柄，不持有 socket。
#[derive(Debug)]
pub struct Relay {
    name: String,
    state: Arc<RelayState>,
    handle: JoinHandle<RelayOutcome>,
}

impl Relay {
    /// 连接规则的目标并启动转发任务
    ///
    /// 目标不可达或连接超时时返回错误，此时客户端连接已被关闭，不会启动任务。
    /// 指标按规则的源端点归类。
    pub async fn connect(
        name: impl Into<String>,
        client: TcpStream,
        rule: &ForwardingRule,
        context: &RelayContext,
    ) -> Result<Self, AppError> {
        let name = name.into();
        let label = rule.source().to_string();
        let destination = rule.destination();
        let timeout = context.config().connect_timeout_duration();

        let connect = TcpStream::connect((destination.addr(), destination.port()));
        let upstream = match tokio::time::timeout(timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                METRICS
                    .connect_errors_total()
                    .with_label_values(&[&label])
                    .inc();
                drop(client);
                return Err(AppError::Connect {
                    name,
                    destination: destination.to_string(),
                    source,
                });
            }
            Err(_) => {
                METRICS
                    .connect_errors_total()
                    .with_label_values(&[&label])
                    .inc();
                drop(client);
                return Err(AppError::ConnectTimeout {
                    name,
                    destination: destination.to_string(),
                    timeout,
                });
            }
        };

        let state = Arc::new(RelayState::new());
        METRICS.active_relays().with_label_values(&[&label]).inc();
        let guard = CompletionGuard {
            state: state.clone(),
            completion: context.completion.clone(),
            label,
        };

        let handle = tokio::spawn(run_transfer(
            name.clone(),
            client,
            upstream,
            context.config().buffer_size,
            guard,
        ));

        Ok(Self {
            name,
            state,
            handle,
        })
    }

    // 获取会话名称
    #[inline(always)]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 会话是否仍在转发
    #[inline(always)]
    pub fn is_active(&self) -> bool {
        self.state.alive.load(Ordering::Acquire)
    }

    // 客户端到目标的字节数
    pub fn bytes_to_destination(&self) -> u64 {
        self.state.bytes_to_destination.load(Ordering::Relaxed)
    }

    // 目标到客户端的字节数
    pub fn bytes_to_client(&self) -> u64 {
        self.state.bytes_to_client.load(Ordering::Relaxed)
    }

    /// 等待会话任务结束并取得结果
    pub async fn join(self) -> RelayOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) => RelayOutcome {
                name: self.name,
                reason: CloseReason::Failed(AppError::Internal(format!(
                    "Transfer task terminated abnormally: {}",
                    e
                ))),
                bytes_to_destination: self.state.bytes_to_destination.load(Ordering::Relaxed),
                bytes_to_client: self.state.bytes_to_client.load(Ordering::Relaxed),
            },
        }
    }
}

// 会话任务主体
async fn run_transfer(
    name: String,
    mut client: TcpStream,
    mut upstream: TcpStream,
    buffer_size: usize,
    guard: CompletionGuard,
) -> RelayOutcome {
    debug!("Starting the transfer: {}", name);

    let result = duplex_copy(
        &name,
        &mut client,
        &mut upstream,
        buffer_size,
        &guard.state,
        &guard.label,
    )
    .await;

    let reason = match result {
        Ok(reason) => reason,
        Err(e) => {
            error!("Transfer {} failed: {}", name, e);
            METRICS
                .relay_errors_total()
                .with_label_values(&[&guard.label])
                .inc();
            CloseReason::Failed(e)
        }
    };

    // 先关闭对端，再关闭触发关闭的一端
    match reason {
        CloseReason::DestinationClosed => {
            drop(client);
            drop(upstream);
        }
        _ => {
            drop(upstream);
            drop(client);
        }
    }

    let outcome = RelayOutcome {
        name,
        reason,
        bytes_to_destination: guard.state.bytes_to_destination.load(Ordering::Relaxed),
        bytes_to_client: guard.state.bytes_to_client.load(Ordering::Relaxed),
    };
    debug!("Finished with transfer: {}", outcome.name);

    // guard 在此释放：标记结束并通知调度器
    drop(guard);
    outcome
}

/// 双向复制数据
///
/// 同时等待两端可读，没有超时。任一端读到 0 字节即视为整个会话结束，
/// 不做半关闭转发。读取到的数据完整写入另一端后才继续等待。
async fn duplex_copy(
    name: &str,
    client: &mut TcpStream,
    upstream: &mut TcpStream,
    buffer_size: usize,
    state: &RelayState,
    label: &str,
) -> Result<CloseReason, AppError> {
    let (mut client_reader, mut client_writer) = client.split();
    let (mut upstream_reader, mut upstream_writer) = upstream.split();

    let mut client_buf = vec![0u8; buffer_size];
    let mut upstream_buf = vec![0u8; buffer_size];

    let to_destination = METRICS
        .bytes_forwarded_total()
        .with_label_values(&[label, direction_labels::TO_DESTINATION]);
    let to_client = METRICS
        .bytes_forwarded_total()
        .with_label_values(&[label, direction_labels::TO_CLIENT]);

    loop {
        tokio::select! {
            result = client_reader.read(&mut client_buf) => {
                let n = result.map_err(AppError::Transfer)?;
                trace!("Receive source {} {}", name, n);
                if n == 0 {
                    return Ok(CloseReason::ClientClosed);
                }
                upstream_writer
                    .write_all(&client_buf[..n])
                    .await
                    .map_err(AppError::Transfer)?;
                state.bytes_to_destination.fetch_add(n as u64, Ordering::Relaxed);
                to_destination.inc_by(n as f64);
            }
            result = upstream_reader.read(&mut upstream_buf) => {
                let n = result.map_err(AppError::Transfer)?;
                trace!("Receive dest {} {}", name, n);
                if n == 0 {
                    return Ok(CloseReason::DestinationClosed);
                }
                client_writer
                    .write_all(&upstream_buf[..n])
                    .await
                    .map_err(AppError::Transfer)?;
                state.bytes_to_client.fetch_add(n as u64, Ordering::Relaxed);
                to_client.inc_by(n as f64);
            }
        }
    }
}
