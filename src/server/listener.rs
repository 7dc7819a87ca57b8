use crate::config::{Endpoint, ForwardingRule};
use crate::error::AppError;
use std::io;
use std::net::SocketAddr;
#[cfg(unix)]
use std::os::fd::{AsFd, BorrowedFd};
use std::task::{Context, Poll};
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

use super::utils::{create_tcp_listener, resolve_endpoint};

/// 监听器
///
/// 绑定在规则的源端点上，并记录连接要转发到的目标。
/// 监听器本身不接受连接，由调度器在其就绪时驱动 accept。
#[derive(Debug)]
pub struct Listener {
    // 非阻塞监听 socket
    inner: TcpListener,
    // 对应的转发规则
    rule: ForwardingRule,
    // 实际绑定地址
    local_addr: SocketAddr,
}

impl Listener {
    /// 绑定规则的源端点并开始监听
    ///
    /// 源地址解析出多个地址时依次尝试，全部失败则返回最后一个错误。
    pub async fn bind(rule: ForwardingRule, backlog: u32) -> Result<Self, AppError> {
        let label = rule.source().to_string();

        let addrs = resolve_endpoint(rule.source())
            .await
            .map_err(|source| AppError::Bind {
                addr: label.clone(),
                source,
            })?;

        let mut last_error = None;
        for addr in addrs {
            match create_tcp_listener(addr, backlog as i32) {
                Ok(inner) => {
                    let local_addr = inner.local_addr().map_err(|source| AppError::Bind {
                        addr: label.clone(),
                        source,
                    })?;
                    debug!("Listening on {:?} for rule {}", local_addr, rule);

                    return Ok(Self {
                        inner,
                        rule,
                        local_addr,
                    });
                }
                Err(e) => {
                    debug!("Unable to bind {:?}: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }

        Err(AppError::Bind {
            addr: label,
            source: last_error
                .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no address to bind")),
        })
    }

    // 获取转发目标
    #[inline(always)]
    pub fn destination(&self) -> &Endpoint {
        self.rule.destination()
    }

    // 获取转发规则
    #[inline(always)]
    pub fn rule(&self) -> &ForwardingRule {
        &self.rule
    }

    // 获取实际监听地址
    #[inline(always)]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub(super) fn poll_accept(
        &self,
        cx: &mut Context<'_>,
    ) -> Poll<io::Result<(TcpStream, SocketAddr)>> {
        self.inner.poll_accept(cx)
    }
}

#[cfg(unix)]
impl AsFd for Listener {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.inner.as_fd()
    }
}
