use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

/// 优雅关闭信号
///
/// 调度循环、API服务、Worker心跳与任务轮询订阅同一个信号。
/// 发送端被取走即表示已经关闭。
#[derive(Clone)]
pub struct ShutdownManager {
    sender: Arc<Mutex<Option<broadcast::Sender<()>>>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self {
            sender: Arc::new(Mutex::new(Some(sender))),
        }
    }

    /// 关闭之后订阅的接收器会立即收到信号
    pub async fn subscribe(&self) -> broadcast::Receiver<()> {
        match self.sender.lock().await.as_ref() {
            Some(sender) => sender.subscribe(),
            None => {
                let (closed, rx) = broadcast::channel(1);
                let _ = closed.send(());
                rx
            }
        }
    }

    pub async fn shutdown(&self) {
        let Some(sender) = self.sender.lock().await.take() else {
            debug!("关闭信号已发送过");
            return;
        };

        info!("通知 {} 个组件停止", sender.receiver_count());
        let _ = sender.send(());
    }

    pub async fn is_shutdown(&self) -> bool {
        self.sender.lock().await.is_none()
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
    async fn test_every_subscriber_receives_signal() {
        let manager = ShutdownManager::new();
        assert!(!manager.is_shutdown().await);

        let mut scheduler_rx = manager.subscribe().await;
        let mut api_rx = manager.subscribe().await;
        manager.shutdown().await;

        assert!(timeout(Duration::from_millis(100), scheduler_rx.recv()).await.is_ok());
        assert!(timeout(Duration::from_millis(100), api_rx.recv()).await.is_ok());
        assert!(manager.is_shutdown().await);
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_shutdown() {
        let manager = ShutdownManager::new();
        manager.shutdown().await;
        manager.shutdown().await;

        let mut rx = manager.subscribe().await;
        assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_ok());
    }

    #[tokio::test]
    async fn test_clones_share_signal() {
        let manager = ShutdownManager::new();
        let worker_side = manager.clone();
        let mut rx = worker_side.subscribe().await;

        manager.shutdown().await;
        assert!(worker_side.is_shutdown().await);
        assert!(rx.recv().await.is_ok());
    }
}
