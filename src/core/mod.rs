//! 核心层：错误类型、时钟、重试、服务上下文、优雅关闭

pub mod clock;
pub mod context;
pub mod error;
pub mod retry;
pub mod shutdown;

pub use clock::{Clock, ManualClock, SystemClock};
pub use context::ServiceContext;
pub use error::{MemoryError, MemoryResult};
pub use retry::RetryPolicy;
pub use shutdown::{
    SchedulerCleanup, ShutdownCleanup, ShutdownCoordinator, ShutdownManager, ShutdownReason,
    VectorStoreCleanup,
};
