//! 有界重试：固定次数 + 固定间隔，在调用点显式执行（不使用装饰器式隐式重试）

use std::time::Duration;

/// 重试策略（同步调用点使用，例如嵌入请求）
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// 最大尝试次数（含首次），至少 1
    pub max_attempts: u32,
    /// 两次尝试之间的固定等待
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// max_attempts 至少为 1
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// 不重试（测试或失败即放弃的场景）
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// 执行 op，失败则等待 backoff 后重试，直到成功或用尽次数；返回最后一次错误
    pub fn run<T, E, F>(&self, what: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
        E: std::fmt::Display,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(v) => return Ok(v),
                Err(e) if attempt < attempts => {
                    tracing::warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}: {}",
                        what,
                        attempt,
                        attempts,
                        self.backoff,
                        e
                    );
                    if !self.backoff.is_zero() {
                        std::thread::sleep(self.backoff);
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
