use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use parabulk::{BatchResponse, CloneError, Connection, ExecuteError};
use tokio::time::sleep;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ServiceRequest {
    Delete(u64),
    Upsert(u64),
}

impl ServiceRequest {
    fn id(&self) -> u64 {
        match self {
            ServiceRequest::Delete(id) | ServiceRequest::Upsert(id) => *id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloneMode {
    Supported,
    Unsupported,
    Broken,
}

#[derive(Default)]
struct ServiceState {
    records: Mutex<BTreeSet<u64>>,
    transient: Mutex<HashMap<u64, u32>>,
    attempts: Mutex<HashMap<u64, u32>>,
    batch_sizes: Mutex<Vec<usize>>,
    batch_failures: Mutex<VecDeque<ExecuteError>>,
    panics: Mutex<BTreeSet<u64>>,
    single_calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    clones: AtomicUsize,
    disposed: AtomicUsize,
}

/// In-memory record service with scripted failures. Clones share state, so
/// every worker sees the same records and the test sees every call.
#[derive(Clone)]
pub struct MockService {
    state: Arc<ServiceState>,
    clone_mode: CloneMode,
    latency: Duration,
    clone_delay: Duration,
}

impl MockService {
    pub fn with_records(ids: impl IntoIterator<Item = u64>) -> Self {
        let state = ServiceState::default();
        state.records.lock().unwrap().extend(ids);
        Self {
            state: Arc::new(state),
            clone_mode: CloneMode::Supported,
            latency: Duration::ZERO,
            clone_delay: Duration::ZERO,
        }
    }

    pub fn clone_mode(mut self, mode: CloneMode) -> Self {
        self.clone_mode = mode;
        self
    }

    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// `try_clone` blocks the calling thread this long, like a handshake.
    pub fn clone_delay(mut self, delay: Duration) -> Self {
        self.clone_delay = delay;
        self
    }

    /// Any call touching `id` panics inside the connection.
    pub fn panic_on(&self, id: u64) {
        self.state.panics.lock().unwrap().insert(id);
    }

    /// The next `count` calls touching `id` fail transiently.
    pub fn fail_transiently(&self, id: u64, count: u32) {
        self.state.transient.lock().unwrap().insert(id, count);
    }

    pub fn fail_next_batch(&self, error: ExecuteError) {
        self.state.batch_failures.lock().unwrap().push_back(error);
    }

    pub fn records(&self) -> BTreeSet<u64> {
        self.state.records.lock().unwrap().clone()
    }

    pub fn attempts(&self, id: u64) -> u32 {
        self.state
            .attempts
            .lock()
            .unwrap()
            .get(&id)
            .copied()
            .unwrap_or(0)
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.state.batch_sizes.lock().unwrap().clone()
    }

    pub fn single_calls(&self) -> usize {
        self.state.single_calls.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.state.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn clones(&self) -> usize {
        self.state.clones.load(Ordering::SeqCst)
    }

    pub fn disposed(&self) -> usize {
        self.state.disposed.load(Ordering::SeqCst)
    }

    fn enter(&self) -> InFlight<'_> {
        let now = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight { state: &self.state }
    }

    fn apply(&self, request: &ServiceRequest) -> Result<u64, ExecuteError> {
        let id = request.id();
        let poisoned = self.state.panics.lock().unwrap().contains(&id);
        if poisoned {
            panic!("corrupt response frame for {id}");
        }
        *self.state.attempts.lock().unwrap().entry(id).or_default() += 1;

        {
            let mut transient = self.state.transient.lock().unwrap();
            if let Some(remaining) = transient.get_mut(&id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(ExecuteError::transient(format!("service busy for {id}")));
                }
            }
        }

        let mut records = self.state.records.lock().unwrap();
        match request {
            ServiceRequest::Delete(id) => {
                if records.remove(id) {
                    Ok(*id)
                } else {
                    Err(ExecuteError::not_found(format!("contact {id} does not exist")))
                }
            }
            ServiceRequest::Upsert(id) => {
                records.insert(*id);
                Ok(*id)
            }
        }
    }
}

struct InFlight<'a> {
    state: &'a ServiceState,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Connection for MockService {
    type Request = ServiceRequest;
    type Response = u64;

    fn execute<'a>(&'a self, request: ServiceRequest) -> BoxFuture<'a, Result<u64, ExecuteError>> {
        Box::pin(async move {
            let _in_flight = self.enter();
            self.state.single_calls.fetch_add(1, Ordering::SeqCst);
            if !self.latency.is_zero() {
                sleep(self.latency).await;
            }
            self.apply(&request)
        })
    }

    fn execute_batch<'a>(
        &'a self,
        requests: Vec<ServiceRequest>,
    ) -> BoxFuture<'a, Result<BatchResponse<u64>, ExecuteError>> {
        Box::pin(async move {
            let _in_flight = self.enter();
            self.state.batch_sizes.lock().unwrap().push(requests.len());
            if !self.latency.is_zero() {
                sleep(self.latency).await;
            }
            let failure = self.state.batch_failures.lock().unwrap().pop_front();
            if let Some(err) = failure {
                return Err(err);
            }
            Ok(requests.iter().map(|request| self.apply(request)).collect())
        })
    }

    fn try_clone(&self) -> Result<Self, CloneError> {
        if !self.clone_delay.is_zero() {
            std::thread::sleep(self.clone_delay);
        }
        match self.clone_mode {
            CloneMode::Supported => {
                self.state.clones.fetch_add(1, Ordering::SeqCst);
                Ok(self.clone())
            }
            CloneMode::Unsupported => Err(CloneError::Unsupported),
            CloneMode::Broken => Err(CloneError::Failed(anyhow::anyhow!("handshake rejected"))),
        }
    }

    fn dispose(&self) {
        self.state.disposed.fetch_add(1, Ordering::SeqCst);
    }
}
