// src/context.rs

use std::sync::{Mutex, PoisonError};
use std::thread::{self, ThreadId};

use reqwest::Client;
use thiserror::Error;
use tracing::{info, trace};

use crate::transfer::{TransferEvents, TransferRequest, Transport};

const USER_AGENT: &str = concat!("cloud-ping/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("failed to initialize transfer context: {0}")]
    Init(#[from] reqwest::Error),
}

/// Locks guarding the signing primitives, one per id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockId {
    Hmac = 0,
    Rsa,
}

const LOCK_COUNT: usize = LockId::Rsa as usize + 1;

/// One lock per [`LockId`] plus the function used to identify the calling thread.
pub struct LockTable {
    locks: [Mutex<()>; LOCK_COUNT],
    thread_id: fn() -> ThreadId,
}

impl LockTable {
    pub fn new(thread_id: fn() -> ThreadId) -> Self {
        Self {
            locks: std::array::from_fn(|_| Mutex::new(())),
            thread_id,
        }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Run `f` while holding lock `id`.
    pub fn with_lock<R>(&self, id: LockId, f: impl FnOnce() -> R) -> R {
        let lock = &self.locks[id as usize];
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let thread = (self.thread_id)();
        trace!(lock = ?id, thread = ?thread, "lock acquired");
        f()
    }
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new(|| thread::current().id())
    }
}

/// Process-wide state shared by every transfer: the HTTP client and the signing locks.
///
/// Built once before the first request and torn down when dropped.
pub struct ProbeContext {
    transport: Transport,
    locks: LockTable,
}

impl ProbeContext {
    pub fn init() -> Result<Self, ContextError> {
        let builder = Client::builder()
            .user_agent(USER_AGENT)
            .danger_accept_invalid_certs(true)
            .tcp_nodelay(true)
            .pool_max_idle_per_host(0);
        let transport = Transport::new(builder)?;
        let locks = LockTable::default();
        info!("transfer context ready, {} signing locks", locks.len());
        Ok(Self { transport, locks })
    }

    pub fn locks(&self) -> &LockTable {
        &self.locks
    }

    /// Execute one GET and report into `events`. Returns once the transfer completed.
    pub async fn perform_get<E: TransferEvents + ?Sized>(
        &self,
        request: &TransferRequest,
        events: &mut E,
    ) {
        self.transport.perform_get(request, events).await
    }
}

impl Drop for ProbeContext {
    fn drop(&mut self) {
        info!("transfer context shut down");
    }
}
