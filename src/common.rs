use anyhow::{bail, Context, Result};
use taskd_core::SchedulerError;
use tokio::signal;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

/// 初始化日志系统
///
/// 日志写入 stderr，stdout 留给命令输出。设置了 `RUST_LOG` 时忽略 `log_level`。
pub fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(log_level)
            .with_context(|| format!("无效的日志级别: {log_level}"))?,
    };

    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let fmt_layer: Box<dyn Layer<Registry> + Send + Sync> = match log_format {
        "json" => fmt_layer.json().boxed(),
        "pretty" => fmt_layer.pretty().boxed(),
        "compact" => fmt_layer.compact().boxed(),
        other => bail!("不支持的日志格式: {other}"),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .try_init()
        .with_context(|| format!("初始化{log_format}日志格式失败"))?;
    Ok(())
}

/// 错误对应的进程退出码: 配置和校验错误为 2，其余为 1
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<SchedulerError>())
        .map(|e| e.exit_code() as u8)
        .unwrap_or(1)
}

/// 等待 SIGINT 或 SIGTERM，返回收到的信号名
pub async fn wait_for_shutdown_signal() -> &'static str {
    let interrupt = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}

/// 重新发现任务的信号 (SIGHUP)
pub struct ReloadSignal {
    #[cfg(unix)]
    inner: signal::unix::Signal,
}

impl ReloadSignal {
    #[cfg(unix)]
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            inner: signal::unix::signal(signal::unix::SignalKind::hangup())?,
        })
    }

    #[cfg(not(unix))]
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {})
    }

    #[cfg(unix)]
    pub async fn recv(&mut self) {
        if self.inner.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }

    #[cfg(not(unix))]
    pub async fn recv(&mut self) {
        std::future::pending::<()>().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_for_validation_errors() {
        let err = anyhow::Error::new(SchedulerError::task_not_found("ops/missing"));
        assert_eq!(exit_code_for(&err), 2);

        let err = anyhow::Error::new(SchedulerError::invalid_cron("* *", "字段数量错误"))
            .context("修改调度失败");
        assert_eq!(exit_code_for(&err), 2);

        let err = anyhow::Error::new(SchedulerError::Internal("boom".to_string()));
        assert_eq!(exit_code_for(&err), 1);

        assert_eq!(exit_code_for(&anyhow::anyhow!("plain")), 1);
    }

    #[test]
    fn test_init_logging_rejects_unknown_format() {
        let err = init_logging("info", "xml").unwrap_err();
        assert!(err.to_string().contains("xml"));
    }
}
