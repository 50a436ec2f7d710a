use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use taskd::common::{exit_code_for, init_logging, wait_for_shutdown_signal};
use taskd::{commands, Application, ShutdownManager};
use taskd_core::AppConfig;
use tracing::{error, info, warn};

/// 单进程定时任务调度与隔离执行引擎
#[derive(Parser, Debug)]
#[command(name = "taskd")]
#[command(version = "1.0.0")]
#[command(about = "单进程定时任务调度与隔离执行引擎")]
#[command(long_about = "发现任务目录中的任务，按 cron 调度并在隔离的执行单元中运行。不带子命令时以守护进程方式运行。")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// 配置文件路径
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<String>,

    /// 日志级别 (默认: 守护进程使用配置文件中的级别，子命令为 warn)
    #[arg(long, global = true, value_name = "LEVEL")]
    log_level: Option<String>,

    /// 日志格式
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
    Compact,
}

impl LogFormat {
    fn as_str(self) -> &'static str {
        match self {
            LogFormat::Pretty => "pretty",
            LogFormat::Json => "json",
            LogFormat::Compact => "compact",
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 列出发现的任务
    List {
        /// 只显示指定分类
        #[arg(long)]
        category: Option<String>,
        /// 以 JSON 输出
        #[arg(long)]
        json: bool,
    },
    /// 显示生效的调度配置
    Schedules {
        #[arg(long)]
        json: bool,
    },
    /// 启用任务
    Enable {
        /// 任务名称 (分类/名称)
        name: String,
    },
    /// 禁用任务
    Disable {
        /// 任务名称 (分类/名称)
        name: String,
    },
    /// 修改任务的调度
    Schedule {
        /// 任务名称 (分类/名称)
        name: String,
        /// 5 字段 cron 表达式
        cron: String,
        /// 超时时间 (秒)
        #[arg(long)]
        timeout: Option<u64>,
        /// 重试次数
        #[arg(long)]
        retries: Option<u32>,
    },
    /// 立即执行一次任务
    Run {
        /// 任务名称 (分类/名称)
        name: String,
        /// 显示任务结果
        #[arg(short, long)]
        verbose: bool,
        /// 任务配置文件 (JSON 对象)，替换调度配置中的 config
        #[arg(long = "task-config", value_name = "FILE")]
        task_config: Option<PathBuf>,
    },
    /// 执行历史健康检查
    Health {
        #[arg(long)]
        json: bool,
    },
    /// 显示任务最近的执行记录
    History {
        /// 任务名称 (分类/名称)
        name: String,
        /// 显示最近N条记录
        #[arg(short, long, default_value = "10")]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    /// 清理没有对应任务的调度配置
    Prune,
    /// 在子进程中执行内置工作单元
    #[command(name = "exec-builtin", hide = true)]
    ExecBuiltin { entry: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Some(Commands::ExecBuiltin { entry }) = &cli.command {
        return ExitCode::from(commands::exec_builtin(entry));
    }

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("错误: {e:#}");
            ExitCode::from(exit_code_for(&e))
        }
    }
}

async fn run(cli: Cli) -> Result<u8> {
    let config = AppConfig::load(cli.config.as_deref()).context("加载配置失败")?;

    let log_level = match (&cli.log_level, &cli.command) {
        (Some(level), _) => level.clone(),
        (None, None) => config.logging.level.clone(),
        (None, Some(_)) => "warn".to_string(),
    };
    let log_format = cli
        .log_format
        .map(|f| f.as_str().to_string())
        .unwrap_or_else(|| config.logging.format.clone());
    init_logging(&log_level, &log_format)?;

    let Some(command) = cli.command else {
        return run_daemon(config).await;
    };

    let app = Application::new(config).await?;
    match command {
        Commands::List { category, json } => commands::list(&app, category.as_deref(), json).await,
        Commands::Schedules { json } => commands::schedules(&app, json).await,
        Commands::Enable { name } => commands::enable(&app, &name).await,
        Commands::Disable { name } => commands::disable(&app, &name).await,
        Commands::Schedule {
            name,
            cron,
            timeout,
            retries,
        } => commands::schedule(&app, &name, &cron, timeout, retries).await,
        Commands::Run {
            name,
            verbose,
            task_config,
        } => commands::run(&app, &name, verbose, task_config.as_deref()).await,
        Commands::Health { json } => commands::health(&app, json).await,
        Commands::History { name, limit, json } => {
            commands::history(&app, &name, limit, json).await
        }
        Commands::Prune => commands::prune(&app).await,
        Commands::ExecBuiltin { entry } => Ok(commands::exec_builtin(&entry)),
    }
}

/// 守护进程模式
async fn run_daemon(config: AppConfig) -> Result<u8> {
    info!("启动任务调度守护进程");
    let grace = Duration::from_secs(config.engine.shutdown_grace_seconds);

    let app = Application::new(config).await?;
    let shutdown_manager = ShutdownManager::new();
    let shutdown_rx = shutdown_manager.subscribe();

    let mut app_handle = tokio::spawn(async move { app.run(shutdown_rx).await });

    tokio::select! {
        joined = &mut app_handle => {
            // 调度循环在没有收到关闭信号时退出，说明发生了引擎错误
            return Ok(match joined {
                Ok(Ok(())) => 0,
                Ok(Err(e)) => {
                    error!("调度引擎错误，守护进程退出: {}", e);
                    1
                }
                Err(e) => {
                    error!("守护进程任务异常退出: {}", e);
                    1
                }
            });
        }
        signal = wait_for_shutdown_signal() => {
            info!("收到{}信号，开始优雅关闭...", signal);
            shutdown_manager.shutdown(signal);
        }
    }

    // 调度器自身在宽限期后中止剩余任务，这里再留出收尾时间
    match tokio::time::timeout(grace + Duration::from_secs(5), app_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("守护进程已优雅关闭");
            Ok(0)
        }
        Ok(Ok(Err(e))) => {
            error!("关闭时发生调度引擎错误: {}", e);
            Ok(1)
        }
        Ok(Err(e)) => {
            error!("守护进程任务异常退出: {}", e);
            Ok(1)
        }
        Err(_) => {
            warn!("守护进程关闭超时，强制退出");
            Ok(1)
        }
    }
}
