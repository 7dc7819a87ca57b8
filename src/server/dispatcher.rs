use crate::config::{ForwardingRule, ListenerConfig, RelayConfig};
use crate::error::AppError;
use crate::metrics::METRICS;
use crate::r#const::accept_limits;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::{pin, Pin};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{sleep_until, Instant};
use tokio_graceful_shutdown::{IntoSubsystem, SubsystemHandle};
use tracing::{debug, error, info, warn};

use super::{
    listener::Listener,
    relay::{CloseReason, Relay, RelayContext, RelayOutcome},
    utils::{wait_for_listeners, ListenerEvent},
};

// 调度循环每轮被唤醒的原因
enum Wakeup {
    Listeners(Vec<ListenerEvent>),
    Connected(Result<Result<Relay, AppError>, JoinError>),
    RelayFinished,
    Resume,
    Shutdown,
}

/// 调度器
///
/// 持有全部监听器，接受新连接并为每个连接启动一个转发会话，
/// 同时回收已经结束的会话。连接目标在独立任务中进行，
/// 调度器只在就绪等待处挂起。
#[derive(Debug)]
pub struct Dispatcher {
    // 仍在轮询的监听器
    listeners: Vec<Listener>,
    // 正在连接目标的会话
    connecting: JoinSet<Result<Relay, AppError>>,
    // 已启动且尚未回收的会话
    relays: Vec<Relay>,
    // 会话上下文
    context: RelayContext,
    // 资源耗尽后暂停接受直到该时刻
    paused_until: Option<Instant>,
}

impl Dispatcher {
    /// 为每条规则绑定一个监听器
    ///
    /// 任一规则绑定失败都会返回错误，已绑定的监听器随之关闭。
    pub async fn bind(
        rules: &[ForwardingRule],
        listener_config: &ListenerConfig,
        relay_config: RelayConfig,
    ) -> Result<Self, AppError> {
        let mut listeners = Vec::with_capacity(rules.len());

        for rule in rules {
            let listener = Listener::bind(rule.clone(), listener_config.backlog).await?;
            info!(
                "Listening on {:?} forwarding to {}",
                listener.local_addr(),
                listener.destination()
            );
            listeners.push(listener);
        }

        Ok(Self {
            listeners,
            connecting: JoinSet::new(),
            relays: Vec::new(),
            context: RelayContext::new(relay_config),
            paused_until: None,
        })
    }

    // 获取仍在轮询的监听器
    pub fn listeners(&self) -> &[Listener] {
        &self.listeners
    }

    // 获取全部监听器的实际地址，顺序与规则一致
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners.iter().map(Listener::local_addr).collect()
    }

    // 获取尚未回收的会话数
    pub fn tracked_relays(&self) -> usize {
        self.relays.len()
    }

    /// 运行调度循环
    ///
    /// 循环在所有监听器都被移除或 `shutdown` 完成时退出，
    /// 随后等待所有会话自然结束。
    pub async fn serve<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut shutdown = pin!(shutdown);
        info!("Running the listeners");

        while !self.listeners.is_empty() {
            let wakeup = self.next_wakeup(shutdown.as_mut()).await;
            self.handle(wakeup).await;
        }

        self.drain().await;
        debug!("Forwarder metrics:\n{}", METRICS.snapshot());
    }

    /// 运行一轮调度
    ///
    /// 等待下一个事件（连接就绪、目标连接完成、会话结束或暂停到期），
    /// 处理后回收已结束的会话。
    pub async fn turn(&mut self) {
        let never = pin!(std::future::pending::<()>());
        let wakeup = self.next_wakeup(never).await;
        self.handle(wakeup).await;
    }

    // 等待下一个唤醒原因
    async fn next_wakeup<F>(&mut self, shutdown: Pin<&mut F>) -> Wakeup
    where
        F: Future<Output = ()>,
    {
        let paused_until = self.paused_until;

        tokio::select! {
            events = wait_for_listeners(&self.listeners), if paused_until.is_none() => {
                Wakeup::Listeners(events)
            }
            _ = sleep_until(paused_until.unwrap_or_else(Instant::now)), if paused_until.is_some() => {
                Wakeup::Resume
            }
            Some(joined) = self.connecting.join_next(), if !self.connecting.is_empty() => {
                Wakeup::Connected(joined)
            }
            _ = self.context.completed() => Wakeup::RelayFinished,
            _ = shutdown => Wakeup::Shutdown,
        }
    }

    // 处理一次唤醒，然后回收
    async fn handle(&mut self, wakeup: Wakeup) {
        match wakeup {
            Wakeup::Listeners(events) => self.handle_events(events),
            Wakeup::Connected(joined) => self.track(joined),
            Wakeup::RelayFinished => {}
            Wakeup::Resume => {
                debug!("Resuming accept on {} listener(s)", self.listeners.len());
                self.paused_until = None;
            }
            Wakeup::Shutdown => {
                info!(
                    "Shutdown requested, closing {} listener(s)",
                    self.listeners.len()
                );
                self.listeners.clear();
            }
        }

        self.reap().await;
    }

    // 处理监听器事件：先接受连接，再移除异常的监听器
    fn handle_events(&mut self, events: Vec<ListenerEvent>) {
        let mut failed = Vec::new();

        for event in events {
            match event {
                ListenerEvent::Accepted {
                    index,
                    stream,
                    peer,
                } => self.dispatch(index, stream, peer),
                ListenerEvent::Dropped { index, error } => {
                    warn!(
                        "Connection on {:?} dropped before accept: {}",
                        self.listeners[index].local_addr(),
                        error
                    );
                }
                ListenerEvent::Exhausted { index, error } => {
                    let backoff = Duration::from_millis(accept_limits::EXHAUSTED_BACKOFF_MS);
                    warn!(
                        "Unable to accept on {:?}, pausing for {:?}: {}",
                        self.listeners[index].local_addr(),
                        backoff,
                        error
                    );
                    self.paused_until = Some(Instant::now() + backoff);
                }
                ListenerEvent::Failed { index, error } => {
                    error!(
                        "Exception on listener {:?}, no longer forwarding {}: {}",
                        self.listeners[index].local_addr(),
                        self.listeners[index].rule(),
                        error
                    );
                    failed.push(index);
                }
            }
        }

        // 从后往前移除，保证索引有效
        failed.sort_unstable();
        for index in failed.into_iter().rev() {
            let listener = self.listeners.remove(index);
            METRICS
                .listeners_retired_total()
                .with_label_values(&[&listener.rule().source().to_string()])
                .inc();
        }
    }

    // 为新连接启动转发会话，目标连接在独立任务中进行
    fn dispatch(&mut self, index: usize, stream: TcpStream, peer: SocketAddr) {
        let rule = self.listeners[index].rule().clone();
        let name = peer.to_string();

        info!("Incoming: {} on {}", name, rule.source());
        METRICS
            .connections_accepted_total()
            .with_label_values(&[&rule.source().to_string()])
            .inc();

        let context = self.context.clone();
        self.connecting
            .spawn(async move { Relay::connect(name, stream, &rule, &context).await });
    }

    // 记录目标连接结果，连接失败只记录日志
    fn track(&mut self, joined: Result<Result<Relay, AppError>, JoinError>) {
        match joined {
            Ok(Ok(relay)) => self.relays.push(relay),
            Ok(Err(e)) => error!("{}", e),
            Err(e) => error!("Connect task terminated abnormally: {}", e),
        }
    }

    // 回收已经结束的会话
    async fn reap(&mut self) {
        let (finished, running): (Vec<Relay>, Vec<Relay>) = std::mem::take(&mut self.relays)
            .into_iter()
            .partition(|relay| !relay.is_active());
        self.relays = running;

        for relay in finished {
            debug!("Cleanup {}", relay.name());
            log_outcome(&relay.join().await);
        }
    }

    // 等待进行中的目标连接，再等待所有剩余会话结束
    async fn drain(&mut self) {
        while let Some(joined) = self.connecting.join_next().await {
            self.track(joined);
        }

        for relay in std::mem::take(&mut self.relays) {
            info!("Joining {}", relay.name());
            log_outcome(&relay.join().await);
        }
    }
}

fn log_outcome(outcome: &RelayOutcome) {
    match &outcome.reason {
        CloseReason::ClientClosed => debug!(
            "Transfer {} closed by client ({} bytes to destination, {} bytes to client)",
            outcome.name, outcome.bytes_to_destination, outcome.bytes_to_client
        ),
        CloseReason::DestinationClosed => debug!(
            "Transfer {} closed by destination ({} bytes to destination, {} bytes to client)",
            outcome.name, outcome.bytes_to_destination, outcome.bytes_to_client
        ),
        CloseReason::Failed(e) => debug!("Transfer {} ended with error: {}", outcome.name, e),
    }
}

/// 绑定全部规则并运行到结束
///
/// 所有监听器都被移除且所有会话都结束后返回。绑定失败时不会开始转发。
pub async fn run(
    rules: &[ForwardingRule],
    listener_config: &ListenerConfig,
    relay_config: RelayConfig,
) -> Result<(), AppError> {
    let dispatcher = Dispatcher::bind(rules, listener_config, relay_config).await?;
    dispatcher.serve(std::future::pending()).await;
    Ok(())
}

#[async_trait::async_trait]
impl IntoSubsystem<AppError> for Dispatcher {
    async fn run(self, subsys: SubsystemHandle) -> Result<(), AppError> {
        self.serve(subsys.on_shutdown_requested()).await;

        // 所有监听器都已移除，没有可继续转发的规则
        if !subsys.is_shutdown_requested() {
            warn!("No listeners left, stopping forwarder");
            subsys.request_shutdown();
        }

        Ok(())
    }
}
