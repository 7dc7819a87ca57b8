use super::helpers::{
    round_trip, spawn_echo_server, spawn_recording_server, spawn_saturated_server, unused_addr,
    wait_for_close, STEP_TIMEOUT,
};
use forwarder::{
    config::{ForwardingRule, ListenerConfig, RelayConfig},
    error::AppError,
    server::{run, Dispatcher},
};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

// 绑定规则并在后台运行调度器，返回监听地址、关闭触发器和任务句柄
async fn start_dispatcher(
    rules: &[ForwardingRule],
) -> (Vec<SocketAddr>, oneshot::Sender<()>, JoinHandle<()>) {
    start_dispatcher_with(rules, RelayConfig::default()).await
}

async fn start_dispatcher_with(
    rules: &[ForwardingRule],
    relay_config: RelayConfig,
) -> (Vec<SocketAddr>, oneshot::Sender<()>, JoinHandle<()>) {
    let dispatcher = Dispatcher::bind(rules, &ListenerConfig::default(), relay_config)
        .await
        .unwrap();
    let addrs = dispatcher.local_addrs();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let handle = tokio::spawn(async move {
        dispatcher
            .serve(async move {
                let _ = shutdown_rx.await;
            })
            .await
    });

    (addrs, shutdown_tx, handle)
}

fn loopback_rule(destination: SocketAddr) -> ForwardingRule {
    ForwardingRule::new("127.0.0.1", 0, "127.0.0.1", destination.port())
}

// 逐轮驱动调度器，直到满足条件
async fn turn_until<P>(dispatcher: &mut Dispatcher, done: P)
where
    P: Fn(&Dispatcher) -> bool,
{
    tokio::time::timeout(STEP_TIMEOUT, async {
        while !done(&*dispatcher) {
            dispatcher.turn().await;
        }
    })
    .await
    .expect("dispatcher did not reach the expected state");
}

/// 测试单条规则的回显转发
#[tokio::test]
async fn test_dispatcher_echo_ping() {
    let echo = spawn_echo_server().await;
    let (addrs, shutdown, handle) = start_dispatcher(&[loopback_rule(echo)]).await;

    let mut client = TcpStream::connect(addrs[0]).await.unwrap();
    assert_eq!(round_trip(&mut client, b"ping").await, b"ping");

    drop(client);
    shutdown.send(()).unwrap();
    tokio::time::timeout(STEP_TIMEOUT, handle)
        .await
        .expect("dispatcher did not stop")
        .unwrap();
}

/// 测试同一规则上的多个并发连接
#[tokio::test]
async fn test_dispatcher_multiple_connections_same_rule() {
    let echo = spawn_echo_server().await;
    let (addrs, shutdown, handle) = start_dispatcher(&[loopback_rule(echo)]).await;

    let mut first = TcpStream::connect(addrs[0]).await.unwrap();
    let mut second = TcpStream::connect(addrs[0]).await.unwrap();

    assert_eq!(round_trip(&mut first, b"one").await, b"one");
    assert_eq!(round_trip(&mut second, b"two").await, b"two");
    assert_eq!(round_trip(&mut first, b"three").await, b"three");

    drop(first);
    drop(second);
    shutdown.send(()).unwrap();
    tokio::time::timeout(STEP_TIMEOUT, handle)
        .await
        .unwrap()
        .unwrap();
}

/// 测试两条规则之间没有串流
#[tokio::test]
async fn test_dispatcher_no_cross_talk() {
    let (dest_a, received_a) = spawn_recording_server().await;
    let (dest_b, received_b) = spawn_recording_server().await;
    let (addrs, shutdown, handle) =
        start_dispatcher(&[loopback_rule(dest_a), loopback_rule(dest_b)]).await;
    assert_eq!(addrs.len(), 2);

    let mut client_a = TcpStream::connect(addrs[0]).await.unwrap();
    let mut client_b = TcpStream::connect(addrs[1]).await.unwrap();

    client_a.write_all(b"a1-").await.unwrap();
    client_b.write_all(b"b1-").await.unwrap();
    client_a.write_all(b"a2").await.unwrap();
    client_b.write_all(b"b2").await.unwrap();
    client_a.shutdown().await.unwrap();
    client_b.shutdown().await.unwrap();

    let data_a = tokio::time::timeout(STEP_TIMEOUT, received_a)
        .await
        .unwrap()
        .unwrap();
    let data_b = tokio::time::timeout(STEP_TIMEOUT, received_b)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(data_a, b"a1-a2");
    assert_eq!(data_b, b"b1-b2");

    shutdown.send(()).unwrap();
    tokio::time::timeout(STEP_TIMEOUT, handle)
        .await
        .unwrap()
        .unwrap();
}

/// 测试客户端不发送数据直接关闭时目标连接也被关闭
#[tokio::test]
async fn test_dispatcher_client_close_without_data() {
    let (destination, received) = spawn_recording_server().await;
    let (addrs, shutdown, handle) = start_dispatcher(&[loopback_rule(destination)]).await;

    let client = TcpStream::connect(addrs[0]).await.unwrap();
    drop(client);

    let data = tokio::time::timeout(STEP_TIMEOUT, received)
        .await
        .expect("destination was not closed")
        .unwrap();
    assert!(data.is_empty());

    shutdown.send(()).unwrap();
    tokio::time::timeout(STEP_TIMEOUT, handle)
        .await
        .unwrap()
        .unwrap();
}

/// 测试目标不可达时关闭客户端连接且调度器继续工作
#[tokio::test]
async fn test_dispatcher_survives_unreachable_destination() {
    let dead = unused_addr().await;
    let echo = spawn_echo_server().await;
    let (addrs, shutdown, handle) =
        start_dispatcher(&[loopback_rule(dead), loopback_rule(echo)]).await;

    // 不可达目标：客户端连接被关闭
    let mut refused = TcpStream::connect(addrs[0]).await.unwrap();
    assert!(wait_for_close(&mut refused).await);

    // 另一条规则不受影响
    let mut client = TcpStream::connect(addrs[1]).await.unwrap();
    assert_eq!(round_trip(&mut client, b"still alive").await, b"still alive");

    // 同一规则上的后续连接同样被处理
    let mut refused_again = TcpStream::connect(addrs[0]).await.unwrap();
    assert!(wait_for_close(&mut refused_again).await);

    drop(client);
    shutdown.send(()).unwrap();
    tokio::time::timeout(STEP_TIMEOUT, handle)
        .await
        .unwrap()
        .unwrap();
}

/// 测试任一规则绑定失败时整体启动失败
#[tokio::test]
async fn test_dispatcher_bind_all_or_nothing() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = occupied.local_addr().unwrap().port();
    let rules = vec![
        ForwardingRule::new("127.0.0.1", 0, "127.0.0.1", 9100),
        ForwardingRule::new("127.0.0.1", port, "127.0.0.1", 9100),
    ];

    let result = Dispatcher::bind(&rules, &ListenerConfig::default(), RelayConfig::default()).await;
    assert!(matches!(result, Err(AppError::Bind { .. })));

    let result = run(&rules, &ListenerConfig::default(), RelayConfig::default()).await;
    assert!(matches!(result, Err(AppError::Bind { .. })));
}

/// 测试关闭时等待已有会话结束
#[tokio::test]
async fn test_dispatcher_shutdown_waits_for_relays() {
    let echo = spawn_echo_server().await;
    let (addrs, shutdown, handle) = start_dispatcher(&[loopback_rule(echo)]).await;

    let mut client = TcpStream::connect(addrs[0]).await.unwrap();
    assert_eq!(round_trip(&mut client, b"before").await, b"before");

    shutdown.send(()).unwrap();

    // 监听器已关闭，但已有会话继续转发
    assert_eq!(round_trip(&mut client, b"after").await, b"after");
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(!handle.is_finished());

    // 会话结束后调度器退出
    drop(client);
    tokio::time::timeout(STEP_TIMEOUT, handle)
        .await
        .expect("dispatcher did not finish after the last relay")
        .unwrap();

    assert!(TcpStream::connect(addrs[0]).await.is_err());
}

/// 测试某条规则的目标连接挂起时，其他规则照常转发
#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_dispatcher_not_blocked_by_pending_connect() {
    let stalled = spawn_saturated_server().await;
    let echo = spawn_echo_server().await;
    let relay_config = RelayConfig {
        connect_timeout: 1,
        ..RelayConfig::default()
    };
    let (addrs, shutdown, handle) = start_dispatcher_with(
        &[loopback_rule(stalled.addr), loopback_rule(echo)],
        relay_config,
    )
    .await;

    let mut stalled_client = TcpStream::connect(addrs[0]).await.unwrap();
    // 让调度器先接受该连接并开始连接目标
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    let mut client = TcpStream::connect(addrs[1]).await.unwrap();
    assert_eq!(round_trip(&mut client, b"ping").await, b"ping");
    assert!(
        started.elapsed() < Duration::from_millis(500),
        "second rule waited {:?} for a pending connect",
        started.elapsed()
    );

    // 连接超时后客户端连接被关闭
    assert!(wait_for_close(&mut stalled_client).await);

    drop(client);
    shutdown.send(()).unwrap();
    tokio::time::timeout(STEP_TIMEOUT, handle)
        .await
        .unwrap()
        .unwrap();
}

/// 测试结束的会话被回收，监听器保持打开
#[tokio::test]
async fn test_dispatcher_reaps_finished_relays() {
    let echo = spawn_echo_server().await;
    let mut dispatcher = Dispatcher::bind(
        &[loopback_rule(echo)],
        &ListenerConfig::default(),
        RelayConfig::default(),
    )
    .await
    .unwrap();
    let addr = dispatcher.local_addrs()[0];
    assert_eq!(dispatcher.tracked_relays(), 0);

    let mut client = TcpStream::connect(addr).await.unwrap();
    turn_until(&mut dispatcher, |d| d.tracked_relays() == 1).await;
    assert_eq!(round_trip(&mut client, b"ping").await, b"ping");

    drop(client);
    turn_until(&mut dispatcher, |d| d.tracked_relays() == 0).await;
    assert_eq!(dispatcher.listeners().len(), 1);

    // 同一监听器继续接受新连接
    let mut next = TcpStream::connect(addr).await.unwrap();
    turn_until(&mut dispatcher, |d| d.tracked_relays() == 1).await;
    assert_eq!(round_trip(&mut next, b"again").await, b"again");
}

/// 测试出现异常的监听器被移除，其余监听器继续工作
#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_dispatcher_retires_failed_listener() {
    use socket2::SockRef;
    use std::net::Shutdown;

    let echo = spawn_echo_server().await;
    let mut dispatcher = Dispatcher::bind(
        &[loopback_rule(echo), loopback_rule(echo)],
        &ListenerConfig::default(),
        RelayConfig::default(),
    )
    .await
    .unwrap();
    let addrs = dispatcher.local_addrs();

    // 关闭监听 socket 的读方向后 accept 返回 EINVAL
    SockRef::from(&dispatcher.listeners()[0])
        .shutdown(Shutdown::Read)
        .unwrap();

    turn_until(&mut dispatcher, |d| d.listeners().len() == 1).await;
    assert_eq!(dispatcher.local_addrs(), vec![addrs[1]]);

    let mut client = TcpStream::connect(addrs[1]).await.unwrap();
    turn_until(&mut dispatcher, |d| d.tracked_relays() == 1).await;
    assert_eq!(round_trip(&mut client, b"survivor").await, b"survivor");
}

/// 测试所有监听器都被移除后子系统请求关闭
#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_subsystem_stops_when_no_listeners_left() {
    use socket2::SockRef;
    use std::net::Shutdown;
    use tokio_graceful_shutdown::{IntoSubsystem, SubsystemBuilder, Toplevel};

    let echo = spawn_echo_server().await;
    let dispatcher = Dispatcher::bind(
        &[loopback_rule(echo)],
        &ListenerConfig::default(),
        RelayConfig::default(),
    )
    .await
    .unwrap();

    SockRef::from(&dispatcher.listeners()[0])
        .shutdown(Shutdown::Read)
        .unwrap();

    let toplevel = Toplevel::new(|s| async move {
        s.start(SubsystemBuilder::new("dispatcher", move |s| async move {
            dispatcher.run(s).await
        }));
    });

    let result = tokio::time::timeout(
        STEP_TIMEOUT,
        toplevel.handle_shutdown_requests(Duration::from_secs(1)),
    )
    .await
    .expect("forwarder did not stop after its last listener was retired");
    assert!(result.is_ok());
}
