use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tracing::debug;

/// Result of one idle check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleVerdict {
    Rearm,
    Disconnect,
}

pub type IdleCheck = Arc<dyn Fn() -> BoxFuture<'static, IdleVerdict> + Send + Sync>;

/// Restartable delayed check. Each [`IdleSupervisor::arm`] throws away the
/// running timer and starts counting from zero again.
pub struct IdleSupervisor {
    timeout: Duration,
    check: IdleCheck,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl IdleSupervisor {
    pub fn new(timeout: Duration, check: IdleCheck) -> Self {
        Self {
            timeout,
            check,
            task: Mutex::new(None),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn arm(&self) {
        let timeout = self.timeout;
        let check = self.check.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(timeout).await;
                match check().await {
                    IdleVerdict::Rearm => debug!("⏲️ Still active, idle timer rearmed"),
                    IdleVerdict::Disconnect => break,
                }
            }
        });

        if let Some(previous) = self.task.lock().replace(handle) {
            previous.abort();
        }
    }

    pub fn cancel(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for IdleSupervisor {
    fn drop(&mut self) {
        self.cancel();
    }
}
