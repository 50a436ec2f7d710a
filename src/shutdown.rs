use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info};

/// 守护进程的关闭信号
///
/// 调度循环和应用主循环各自持有一个接收器。关闭只会发生一次，
/// 之后订阅的接收器会立即收到信号。
#[derive(Clone)]
pub struct ShutdownManager {
    tx: broadcast::Sender<()>,
    triggered: Arc<AtomicBool>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            triggered: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        let rx = self.tx.subscribe();
        if !self.is_shutdown() {
            return rx;
        }

        let (tx, rx) = broadcast::channel(1);
        let _ = tx.send(());
        rx
    }

    /// 发出关闭信号，返回本次调用是否真正触发了关闭
    pub fn shutdown(&self, reason: &str) -> bool {
        if self.triggered.swap(true, Ordering::SeqCst) {
            debug!("已经在关闭中，忽略: {}", reason);
            return false;
        }

        info!("开始关闭: {} ({} 个订阅者)", reason, self.tx.receiver_count());
        // 没有订阅者时发送失败
        let _ = self.tx.send(());
        true
    }

    pub fn is_shutdown(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_scheduler_and_app_both_stop() {
        let manager = ShutdownManager::new();
        let mut scheduler_rx = manager.subscribe();
        let mut app_rx = manager.clone().subscribe();

        assert!(manager.shutdown("SIGTERM"));
        assert!(manager.is_shutdown());

        assert!(timeout(Duration::from_millis(100), scheduler_rx.recv()).await.is_ok());
        assert!(timeout(Duration::from_millis(100), app_rx.recv()).await.is_ok());
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_shutdown() {
        let manager = ShutdownManager::new();
        manager.shutdown("SIGINT");

        let mut rx = manager.subscribe();
        assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_ok());
    }

    #[test]
    fn test_second_shutdown_is_ignored() {
        let manager = ShutdownManager::default();
        assert!(manager.shutdown("SIGTERM"));
        assert!(!manager.shutdown("SIGINT"));
    }
}
