//! In-memory store used by the redis tests.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use super::pool::{StoreConnection, StoreConnector, StorePool, Value};
use crate::error::StoreError;

#[derive(Default)]
struct StoreState {
    create_failures: u32,
    create_attempts: u32,
    fail_command: Option<StoreError>,
    commands: Vec<String>,
    released: usize,
    closed: bool,
}

/// Fixed-size pool whose connections record into shared state.
pub(crate) struct MockStore {
    size: usize,
    permits: Arc<Semaphore>,
    state: Arc<Mutex<StoreState>>,
}

impl MockStore {
    pub(crate) fn new(size: usize) -> Arc<Self> {
        Arc::new(Self {
            size,
            permits: Arc::new(Semaphore::new(size)),
            state: Arc::default(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap()
    }

    pub(crate) fn connector(self: &Arc<Self>) -> Arc<dyn StoreConnector> {
        Arc::new(MockConnector(Arc::clone(self)))
    }

    pub(crate) fn pool(self: &Arc<Self>) -> Arc<dyn StorePool> {
        Arc::clone(self) as Arc<dyn StorePool>
    }

    pub(crate) fn fail_creates(&self, n: u32) {
        self.lock().create_failures = n;
    }

    pub(crate) fn create_attempts(&self) -> u32 {
        self.lock().create_attempts
    }

    pub(crate) fn fail_next_command(&self, err: StoreError) {
        self.lock().fail_command = Some(err);
    }

    pub(crate) fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    pub(crate) fn free(&self) -> usize {
        self.permits.available_permits()
    }

    pub(crate) fn released(&self) -> usize {
        self.lock().released
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

struct MockConnector(Arc<MockStore>);

#[async_trait]
impl StoreConnector for MockConnector {
    async fn create_pool(
        &self,
        _dsn: &str,
        _min_size: usize,
        _max_size: usize,
    ) -> Result<Arc<dyn StorePool>, StoreError> {
        let mut st = self.0.lock();
        st.create_attempts += 1;
        if st.create_failures > 0 {
            st.create_failures -= 1;
            return Err(StoreError::Connection("connection refused".into()));
        }
        Ok(self.0.pool())
    }
}

#[async_trait]
impl StorePool for MockStore {
    fn size(&self) -> usize {
        self.size
    }

    fn free_size(&self) -> usize {
        self.free()
    }

    async fn acquire(&self) -> Result<Box<dyn StoreConnection>, StoreError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| StoreError::PoolUnavailable)?;
        permit.forget();
        Ok(Box::new(MockConnection {
            state: Arc::clone(&self.state),
            channels: Mutex::new(Vec::new()),
        }))
    }

    fn release(&self, _conn: Box<dyn StoreConnection>) {
        self.lock().released += 1;
        self.permits.add_permits(1);
    }

    fn close(&self) {
        self.lock().closed = true;
        self.permits.close();
    }

    async fn wait_closed(&self) {}
}

struct MockConnection {
    state: Arc<Mutex<StoreState>>,
    channels: Mutex<Vec<String>>,
}

#[async_trait]
impl StoreConnection for MockConnection {
    async fn execute(&self, command: &str, _args: &[Value]) -> Result<Value, StoreError> {
        let mut st = self.state.lock().unwrap();
        if let Some(err) = st.fail_command.take() {
            return Err(err);
        }
        st.commands.push(command.to_string());
        Ok(Value::Status("OK".into()))
    }

    async fn execute_pubsub(
        &self,
        command: &str,
        channels: &[String],
    ) -> Result<Vec<Value>, StoreError> {
        self.state.lock().unwrap().commands.push(command.to_string());
        let mut subscribed = self.channels.lock().unwrap();
        subscribed.extend(channels.iter().cloned());
        Ok(channels
            .iter()
            .map(|c| Value::Bulk(vec![command.into(), c.clone().into(), Value::Int(1)]))
            .collect())
    }

    fn pubsub_channels(&self) -> Vec<String> {
        self.channels.lock().unwrap().clone()
    }
}
