//! 协调原语
//!
//! - `ExtractionMutex` 全局单抽取，FIFO 公平
//! - `LockHeartbeat` 长时间调用期间的租约续期
//! - `CancellationProbe` 各阶段边界的取消检查

pub mod cancellation;
pub mod extraction_mutex;
pub mod heartbeat;

pub use cancellation::CancellationProbe;
pub use extraction_mutex::{ExtractionMutex, ExtractionPermit};
pub use heartbeat::LockHeartbeat;
