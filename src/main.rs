use forwarder::{args::Args, config::Config, server::Dispatcher};
use mimalloc::MiMalloc;
use std::process;
use tokio_graceful_shutdown::{IntoSubsystem, SubsystemBuilder, Toplevel};
use tracing::{error, info};

// 使用 mimalloc 分配器提高内存效率
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn init_logging(args: &Args) {
    let builder = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_line_number(false);

    // 如果启用详细模式，输出调试信息，否则只输出 info 及以上级别
    if args.verbose {
        builder.with_max_level(tracing::Level::DEBUG)
    } else {
        builder.with_max_level(tracing::Level::INFO)
    }
    .init();
}

// 程序入口
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 解析命令行参数
    let args = Args::parse_args();

    // 初始化日志
    init_logging(&args);

    // 验证参数
    if let Err(e) = args.validation() {
        error!("Invalid command line arguments: {}", e);
        process::exit(1);
    }

    info!(
        "Starting Forwarder {} - TCP port forwarding service",
        env!("CARGO_PKG_VERSION")
    );

    // 加载配置
    let config = match Config::from_file(&args.config) {
        Ok(config) => {
            info!("Successfully loaded configuration: {:?}", args.config);
            config
        }
        Err(e) => {
            error!("Failed to load configuration file: {}", e);
            process::exit(1);
        }
    };

    // 生成转发规则（端口名称已在验证时解析过）
    let rules = match config.rules() {
        Ok(rules) => rules,
        Err(e) => {
            error!("Failed to resolve forwarding rules: {}", e);
            process::exit(1);
        }
    };

    // 如果是测试模式，输出解析后的规则后退出
    if args.test_config {
        println!("{}", serde_json::to_string_pretty(&rules)?);
        info!("Configuration file validated successfully");
        return Ok(());
    }

    // 绑定全部监听器，任一失败则退出
    let dispatcher = match Dispatcher::bind(&rules, &config.listener, config.relay.clone()).await
    {
        Ok(dispatcher) => dispatcher,
        Err(e) => {
            error!("Failed to start listeners: {}", e);
            process::exit(1);
        }
    };

    // 创建优雅关闭顶层管理器
    let toplevel = Toplevel::new(|s| async move {
        s.start(SubsystemBuilder::new("dispatcher", move |s| async move {
            dispatcher.run(s).await
        }));
    });

    // 等待关闭
    info!("All listeners started, waiting for connections...");
    match toplevel
        .catch_signals()
        .handle_shutdown_requests(tokio::time::Duration::from_secs(args.shutdown_timeout))
        .await
    {
        Ok(_) => {
            info!("Forwarder shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!("Forwarder shutdown error: {}", e);
            process::exit(1);
        }
    }
}
