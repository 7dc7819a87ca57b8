use crate::config::Endpoint;
use socket2::{Domain, Protocol, Socket, Type};
use std::future::poll_fn;
use std::io::{self, ErrorKind};
use std::net::SocketAddr;
use std::task::Poll;
use tokio::net::{lookup_host, TcpListener, TcpStream};

use super::listener::Listener;

/// 解析端点地址
///
/// 主机名通过系统解析器解析，可能返回多个地址。
pub async fn resolve_endpoint(endpoint: &Endpoint) -> io::Result<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = lookup_host((endpoint.addr(), endpoint.port()))
        .await?
        .collect();

    if addrs.is_empty() {
        return Err(io::Error::new(
            ErrorKind::NotFound,
            format!("No address found for {}", endpoint),
        ));
    }

    Ok(addrs)
}

/// 创建 TCP 监听器
/// 根据提供的地址和监听队列大小创建一个非阻塞的 TCP 监听器。
pub fn create_tcp_listener(addr: SocketAddr, backlog: i32) -> io::Result<TcpListener> {
    // 根据地址类型确定域
    let domain = if addr.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };

    // 创建 socket
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    // 设置 SO_REUSEADDR 选项，端口仍被其他监听器占用时绑定依然会失败
    socket.set_reuse_address(true)?;

    // 绑定到地址
    socket.bind(&addr.into())?;

    // 开始监听
    socket.listen(backlog)?;

    // 设置为非阻塞模式
    socket.set_nonblocking(true)?;

    // 将 socket2::Socket 转换为 std::net::TcpListener
    let std_listener: std::net::TcpListener = socket.into();

    // 将 std::net::TcpListener 转换为 tokio::net::TcpListener
    TcpListener::from_std(std_listener)
}

/// accept 错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptErrorKind {
    /// 只影响单个待接受的连接
    Dropped,
    /// 进程资源耗尽（文件描述符、内存），监听器本身正常
    Exhausted,
    /// 监听器自身异常，需要移除
    Fatal,
}

/// 判断 accept 错误对监听器的影响
pub fn classify_accept_error(error: &io::Error) -> AcceptErrorKind {
    match error.kind() {
        ErrorKind::ConnectionAborted
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionRefused
        | ErrorKind::Interrupted
        | ErrorKind::WouldBlock
        | ErrorKind::TimedOut => AcceptErrorKind::Dropped,
        ErrorKind::OutOfMemory => AcceptErrorKind::Exhausted,
        _ if is_resource_exhausted(error) => AcceptErrorKind::Exhausted,
        _ => AcceptErrorKind::Fatal,
    }
}

#[cfg(unix)]
fn is_resource_exhausted(error: &io::Error) -> bool {
    matches!(
        error.raw_os_error(),
        Some(libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM)
    )
}

#[cfg(not(unix))]
fn is_resource_exhausted(_error: &io::Error) -> bool {
    false
}

/// 监听器就绪事件
#[derive(Debug)]
pub(super) enum ListenerEvent {
    // 有新的客户端连接
    Accepted {
        index: usize,
        stream: TcpStream,
        peer: SocketAddr,
    },
    // 单个连接在 accept 前已失效，监听器本身正常
    Dropped { index: usize, error: io::Error },
    // 进程资源耗尽，需要暂停接受
    Exhausted { index: usize, error: io::Error },
    // 监听器出现异常，需要移除
    Failed { index: usize, error: io::Error },
}

impl ListenerEvent {
    fn from_error(index: usize, error: io::Error) -> Self {
        match classify_accept_error(&error) {
            AcceptErrorKind::Dropped => ListenerEvent::Dropped { index, error },
            AcceptErrorKind::Exhausted => ListenerEvent::Exhausted { index, error },
            AcceptErrorKind::Fatal => ListenerEvent::Failed { index, error },
        }
    }
}

/// 等待任一监听器就绪
///
/// 同时轮询全部监听器，直到至少一个有待接受的连接或出现异常。
/// 一次返回本轮所有就绪的监听器事件，每个监听器最多一个。
/// 监听器列表为空时永远不会返回。
pub(super) async fn wait_for_listeners(listeners: &[Listener]) -> Vec<ListenerEvent> {
    poll_fn(|cx| {
        let mut events = Vec::new();

        for (index, listener) in listeners.iter().enumerate() {
            match listener.poll_accept(cx) {
                Poll::Ready(Ok((stream, peer))) => events.push(ListenerEvent::Accepted {
                    index,
                    stream,
                    peer,
                }),
                Poll::Ready(Err(error)) => events.push(ListenerEvent::from_error(index, error)),
                Poll::Pending => {}
            }
        }

        if events.is_empty() {
            Poll::Pending
        } else {
            Poll::Ready(events)
        }
    })
    .await
}
