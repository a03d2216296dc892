use async_trait::async_trait;

use crate::error::ComponentError;

/// A long-lived service driven by [`App`](super::App).
///
/// `prepare` acquires external resources (connections, pools), `start` begins
/// work, `stop` releases everything. `stop` may be called on a component that
/// was prepared but never started.
#[async_trait]
pub trait Component: Send + Sync + 'static {
    /// Name used in events and in [`ComponentError::GraceExceeded`].
    fn name(&self) -> &str;

    /// Acquires external resources. Failure aborts application startup.
    async fn prepare(&self) -> Result<(), ComponentError>;

    /// Begins work.
    async fn start(&self) -> Result<(), ComponentError>;

    /// Stops work and releases resources.
    async fn stop(&self) -> Result<(), ComponentError>;
}
