// 子模块定义
mod dispatcher;
mod listener;
mod relay;
mod utils;

// 公共 API 重新导出
pub use dispatcher::{run, Dispatcher};
pub use listener::Listener;
pub use relay::{CloseReason, Relay, RelayContext, RelayOutcome};
pub use utils::{classify_accept_error, create_tcp_listener, resolve_endpoint, AcceptErrorKind};
