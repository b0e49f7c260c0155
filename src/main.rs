//! BOSTARTER 服务主入口

use bostarter::{
    activity::ActivityLogger,
    auth::PasswordHasher,
    clock::{Clock, SystemClock},
    config::{AppConfig, StorageBackend},
    db,
    handlers::health,
    middleware::AppState,
    models::user::RegisterRequest,
    repository::Stores,
    routes, telemetry,
};
use chrono::Duration as ChronoDuration;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;

/// 会话清理间隔（秒）
const SESSION_PURGE_INTERVAL_SECS: u64 = 60;

/// 管理员密码从该环境变量读取，避免出现在命令行历史中
const ADMIN_PASSWORD_ENV: &str = "BOSTARTER_ADMIN_PASSWORD";

enum Command {
    Serve,
    Cleanup,
    CreateAdmin { email: String, nickname: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ===== CLI 参数处理 =====
    let args: Vec<String> = std::env::args().collect();

    let mut command = Command::Serve;
    if args.len() > 1 {
        match args[1].as_str() {
            "--version" => {
                println!("bostarter {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" => {
                print_help();
                return Ok(());
            }
            "cleanup" => command = Command::Cleanup,
            "create-admin" if args.len() == 4 => {
                command = Command::CreateAdmin {
                    email: args[2].clone(),
                    nickname: args[3].clone(),
                }
            }
            _ => {
                eprintln!("未知参数: {}", args[1..].join(" "));
                print_help();
                std::process::exit(1);
            }
        }
    }

    // 按优先级加载：.env.local > .env
    // 生产环境直接设置环境变量
    if let Ok(name) = std::env::var("BOSTARTER_ENV") {
        dotenv::from_filename(format!(".env.{}", name)).ok();
    } else {
        dotenv::from_filename(".env.local").ok();
        dotenv::dotenv().ok();
    }

    health::set_start_time();

    // 1. 加载配置
    let config = AppConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        anyhow::anyhow!("Failed to load configuration: {}", e)
    })?;
    let config = Arc::new(config);

    // 2. 初始化日志与指标
    telemetry::init_telemetry(&config);
    telemetry::init_metrics();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "BOSTARTER starting");

    // 3. 存储
    let (stores, db_pool) = match config.storage.backend {
        StorageBackend::Postgres => {
            let pool = db::create_pool(&config.database).await?;
            db::run_migrations(&pool).await?;
            tracing::info!("Database initialized");
            (Stores::postgres(pool.clone()), Some(pool))
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage, data is lost on restart");
            (Stores::memory(), None)
        }
    };

    // 4. 活动日志与应用状态
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let logger = Arc::new(ActivityLogger::from_config(&config.activity_log, clock.clone()).await);

    let app_state = Arc::new(AppState::new(
        config.clone(),
        stores.clone(),
        db_pool,
        logger.clone(),
        PasswordHasher::new(),
        clock.clone(),
    ));

    match command {
        Command::Serve => {}
        Command::Cleanup => return run_cleanup(&app_state, &stores).await,
        Command::CreateAdmin { email, nickname } => {
            return run_create_admin(&app_state, email, nickname).await
        }
    }

    // 5. 后台任务
    let flush_task = {
        let logger = logger.clone();
        let every = Duration::from_secs(config.activity_log.flush_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                logger.flush_buffer().await;
            }
        })
    };

    let purge_task = {
        let sessions = stores.sessions.clone();
        let clock = clock.clone();
        let lifetime = ChronoDuration::seconds(config.session.lifetime_secs);
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(SESSION_PURGE_INTERVAL_SECS));
            loop {
                ticker.tick().await;
                match sessions.purge_idle(clock.now() - lifetime).await {
                    Ok(0) => {}
                    Ok(purged) => tracing::debug!(purged, "Idle sessions purged"),
                    Err(e) => tracing::error!(error = %e, "Failed to purge sessions"),
                }
            }
        })
    };

    // 6. 启动服务器
    let app = routes::create_router(app_state.clone());
    let addr = &config.server.addr;
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(addr = %addr, "Server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // 7. 停止后台任务并刷新剩余日志
    flush_task.abort();
    purge_task.abort();

    let timeout = Duration::from_secs(config.server.graceful_shutdown_timeout_secs);
    if tokio::time::timeout(timeout, logger.shutdown()).await.is_err() {
        tracing::warn!("Activity log flush timed out during shutdown");
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// 清理过期的安全数据与记住我令牌，供外部定时任务调用
async fn run_cleanup(state: &AppState, stores: &Stores) -> anyhow::Result<()> {
    let report = state.security_service.cleanup_old_data().await;
    let tokens_deleted = stores
        .remember_tokens
        .delete_expired(state.clock.now())
        .await?;

    println!(
        "{}",
        serde_json::json!({
            "security_events_deleted": report.security_events_deleted,
            "rate_limits_deleted": report.rate_limits_deleted,
            "remember_tokens_deleted": tokens_deleted,
        })
    );

    state.activity_logger.shutdown().await;
    Ok(())
}

/// 创建管理员账户；公开注册不接受管理员角色
async fn run_create_admin(state: &AppState, email: String, nickname: String) -> anyhow::Result<()> {
    let password = std::env::var(ADMIN_PASSWORD_ENV)
        .map_err(|_| anyhow::anyhow!("{} is not set", ADMIN_PASSWORD_ENV))?;

    let request = RegisterRequest {
        email,
        nickname,
        password,
        nome: String::new(),
        cognome: String::new(),
        anno_nascita: None,
        luogo_nascita: None,
        tipo_utente: None,
    };

    let admin = state
        .auth_service
        .create_admin(&request)
        .await
        .map_err(|e| anyhow::anyhow!(e.messages().join("; ")))?;

    println!("{}", serde_json::json!({ "id": admin.id, "email": admin.email }));
    Ok(())
}

/// 优雅关闭信号处理
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Ctrl+C received, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Terminate signal received, starting graceful shutdown");
        },
    }
}

/// 打印帮助信息
fn print_help() {
    println!("bostarter {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("用法: bostarter [选项] [命令]");
    println!();
    println!("选项:");
    println!("  --version     打印版本信息并退出");
    println!("  --help        打印此帮助信息并退出");
    println!();
    println!("命令:");
    println!("  cleanup       删除过期的安全事件、限流计数和记住我令牌后退出");
    println!("  create-admin <email> <nickname>");
    println!("                创建管理员账户，密码取自 {}", ADMIN_PASSWORD_ENV);
    println!();
    println!("环境变量:");
    println!("  所有配置通过 BOSTARTER_ 前缀的环境变量完成，层级用 __ 分隔");
    println!("  例如 BOSTARTER_SECURITY__MAX_LOGIN_ATTEMPTS=10");
}
