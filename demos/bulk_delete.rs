use std::collections::BTreeSet;
use std::env;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use parabulk::{
    BatchResponse, BulkEngine, CloneError, Connection, EngineConfigBuilder, ErrorRecord,
    ExecuteError, Host, OperationKind, ProgressRecord, RequestOutcome, WorkItem,
};
use serde_json::{json, Value};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

const DEFAULT_RECORD_COUNT: u64 = 2_000;
const DEFAULT_MISSING_EVERY: u64 = 25;
const DEFAULT_THROTTLE_EVERY: u64 = 40;
const DEFAULT_LATENCY_MS: u64 = 15;
const DEFAULT_LOG_DIRECTIVE: &str = "warn";

#[tokio::main]
async fn main() -> Result<()> {
    init_example_tracing();

    let args = ExampleArgs::from_env()?;
    let config = EngineConfigBuilder::from_env()?
        .activity("Deleting contacts")
        .build()?;

    let store = ContactStore::seeded(&args);
    let cancel = CancellationToken::new();
    let stopping = Arc::new(AtomicBool::new(false));
    spawn_ctrl_c_watcher(Arc::clone(&stopping));

    let mut host = ProgressHost::new(build_progress_bar(args.record_count), stopping, args.verbose);
    host.bar.println(format!(
        "Deleting {} contacts with {} workers (batch size {})",
        args.record_count,
        config.max_degree_of_parallelism(),
        config.batch_size()
    ));

    let started = Instant::now();
    let mut engine = BulkEngine::new(config, store.clone(), cancel);
    for id in 0..args.record_count {
        let item = delete_contact(id, args.ignore_absent)?;
        if !engine.queue_operation(item, &mut host) {
            break;
        }
    }
    let summary = engine.wait_for_completion(&mut host).await;

    if summary.cancelled {
        host.bar.abandon_with_message("stopped");
    } else {
        host.bar.finish_with_message("done");
    }
    let seconds = started.elapsed().as_secs_f64();
    host.bar.println(format!(
        "Completed {}/{} deletes with {} errors in {:.2}s ({} service calls, {} contacts left)",
        summary.completed,
        summary.queued,
        summary.errors,
        seconds,
        store.calls.load(Ordering::Relaxed),
        store.remaining()
    ));
    println!("{}", serde_json::to_string(&summary)?);

    Ok(())
}

fn init_example_tracing() {
    if env::var_os("RUST_LOG").is_none() {
        env::set_var("RUST_LOG", DEFAULT_LOG_DIRECTIVE);
    }
    parabulk::init_tracing();
}

fn build_progress_bar(total: u64) -> ProgressBar {
    let bar = ProgressBar::with_draw_target(Some(total), ProgressDrawTarget::stdout_with_hz(12));
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {percent}% {msg}",
    )
    .expect("valid progress bar template")
    .progress_chars("=>-");
    bar.set_style(style);
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

fn spawn_ctrl_c_watcher(stopping: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stopping.store(true, Ordering::SeqCst);
        }
    });
}

fn delete_contact(id: u64, ignore_absent: bool) -> Result<WorkItem<ContactStore>> {
    WorkItem::builder(OperationKind::Delete, "contact", json!({ "contactid": id }))
        .key(id.to_string())
        .ignore_absent(ignore_absent)
        .request(id, move |outcome| match outcome {
            RequestOutcome::Succeeded(_) => None,
            RequestOutcome::Absent => Some(json!({ "contactid": id, "status": "absent" })),
        })
        .build()
}

struct ExampleArgs {
    record_count: u64,
    missing_every: u64,
    throttle_every: u64,
    latency: Duration,
    ignore_absent: bool,
    verbose: bool,
}

impl ExampleArgs {
    fn from_env() -> Result<Self> {
        Ok(Self {
            record_count: parse_env_with_default("PARABULK_RECORDS", DEFAULT_RECORD_COUNT)?,
            missing_every: parse_env_with_default("PARABULK_MISSING_EVERY", DEFAULT_MISSING_EVERY)?,
            throttle_every: parse_env_with_default(
                "PARABULK_THROTTLE_EVERY",
                DEFAULT_THROTTLE_EVERY,
            )?,
            latency: Duration::from_millis(parse_env_with_default(
                "PARABULK_LATENCY_MS",
                DEFAULT_LATENCY_MS,
            )?),
            ignore_absent: parse_env_with_default("PARABULK_IGNORE_ABSENT", false)?,
            verbose: parse_env_with_default("PARABULK_VERBOSE", false)?,
        })
    }
}

fn parse_env_with_default<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("failed to parse {key}={value}")),
        Err(_) => Ok(default),
    }
}

/// Renders engine output on an indicatif bar. Errors and warnings are always
/// printed; verbose lines only when asked for.
struct ProgressHost {
    bar: ProgressBar,
    stopping: Arc<AtomicBool>,
    verbose: bool,
}

impl ProgressHost {
    fn new(bar: ProgressBar, stopping: Arc<AtomicBool>, verbose: bool) -> Self {
        Self {
            bar,
            stopping,
            verbose,
        }
    }
}

impl Host for ProgressHost {
    fn write_verbose(&mut self, text: &str) {
        if self.verbose {
            self.bar.println(text);
        }
    }

    fn write_warning(&mut self, text: &str) {
        self.bar.println(format!("WARNING: {text}"));
    }

    fn write_error(&mut self, record: ErrorRecord) {
        self.bar.println(format!("ERROR: {record}"));
    }

    fn write_progress(&mut self, record: ProgressRecord) {
        self.bar.set_position(record.completed_items);
        self.bar.set_length(record.total_items.max(1));
        self.bar.set_message(record.status);
    }

    fn write_object(&mut self, value: Value) {
        if self.verbose {
            self.bar.println(value.to_string());
        }
    }

    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }
}

/// In-memory contact table standing in for a remote service. Every
/// `missing_every`th contact was never created and every `throttle_every`th
/// call is rejected with a retry hint.
#[derive(Clone)]
struct ContactStore {
    contacts: Arc<Mutex<BTreeSet<u64>>>,
    calls: Arc<AtomicU64>,
    throttle_every: u64,
    latency: Duration,
}

impl ContactStore {
    fn seeded(args: &ExampleArgs) -> Self {
        let contacts = (0..args.record_count)
            .filter(|id| args.missing_every == 0 || id % args.missing_every != 0)
            .collect();
        Self {
            contacts: Arc::new(Mutex::new(contacts)),
            calls: Arc::new(AtomicU64::new(0)),
            throttle_every: args.throttle_every,
            latency: args.latency,
        }
    }

    fn remaining(&self) -> usize {
        self.contacts.lock().map(|contacts| contacts.len()).unwrap_or(0)
    }

    fn throttled(&self) -> bool {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        self.throttle_every > 0 && call % self.throttle_every == 0
    }

    fn delete(&self, id: u64) -> Result<u64, ExecuteError> {
        let mut contacts = self
            .contacts
            .lock()
            .map_err(|_| ExecuteError::fault("contact table poisoned"))?;
        if contacts.remove(&id) {
            Ok(id)
        } else {
            Err(ExecuteError::not_found(format!("contact {id} does not exist")))
        }
    }
}

impl Connection for ContactStore {
    type Request = u64;
    type Response = u64;

    fn execute<'a>(&'a self, id: u64) -> BoxFuture<'a, Result<u64, ExecuteError>> {
        Box::pin(async move {
            sleep(self.latency).await;
            if self.throttled() {
                return Err(ExecuteError::throttled(
                    "request rate exceeded",
                    Duration::from_millis(200),
                ));
            }
            self.delete(id)
        })
    }

    fn execute_batch<'a>(
        &'a self,
        ids: Vec<u64>,
    ) -> BoxFuture<'a, Result<BatchResponse<u64>, ExecuteError>> {
        Box::pin(async move {
            sleep(self.latency * 2).await;
            if self.throttled() {
                return Err(ExecuteError::throttled(
                    "request rate exceeded",
                    Duration::from_millis(500),
                ));
            }
            Ok(ids.into_iter().map(|id| self.delete(id)).collect())
        })
    }

    fn try_clone(&self) -> Result<Self, CloneError> {
        Ok(self.clone())
    }
}
