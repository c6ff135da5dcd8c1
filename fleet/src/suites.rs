//! Suites built into the `fleet` binary.
//!
//! Coordinator and workers resolve suites from the same registry, so a worker
//! process started from this binary can run anything listed here.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context as _;
use bytes::Bytes;
use fleet_core::{
    BenchmarkContext, BenchmarkSuite, Params, RandomBytes, RandomString, Registry,
    SimulationSuite, SimulatorSetup, SuiteContext, Value, Workload, async_trait,
};

pub fn registry() -> Registry {
    let mut registry = Registry::new();
    let _ = registry
        .suite("kv", Kv::default())
        .benchmark("get", kv_get)
        .benchmark("put", kv_put);
    let _ = registry
        .suite("sleep", Sleep)
        .benchmark("fixed", sleep_fixed)
        .benchmark("flaky", sleep_flaky);
    registry.simulation("counter", Counter);
    registry
}

type Store = Arc<Mutex<HashMap<String, Bytes>>>;

/// In-memory key/value store, one per worker.
#[derive(Default)]
struct Kv {
    store: Store,
    connections: AtomicU64,
}

struct KvConn {
    store: Store,
}

impl KvConn {
    fn get(&self, key: &str) -> Option<Bytes> {
        self.store
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
    }

    fn put(&self, key: &str, value: Bytes) {
        self.store
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.to_string(), value);
    }
}

#[async_trait]
impl BenchmarkSuite for Kv {
    async fn setup_worker(&self, ctx: &SuiteContext) -> anyhow::Result<()> {
        let preload = ctx.args.uint("preload", 0)?;
        let conn = self.connect();
        for i in 0..preload {
            conn.put(&format!("key-{i}"), Bytes::from_static(b"value"));
        }
        tracing::info!(worker = ctx.worker, preload, "kv store ready");
        Ok(())
    }

    async fn teardown_worker(&self, ctx: &SuiteContext) -> anyhow::Result<()> {
        let conn = self.connect();
        let keys = conn
            .store
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain()
            .count();
        tracing::info!(
            worker = ctx.worker,
            keys,
            connections = self.connections.load(Ordering::Relaxed),
            "kv store dropped"
        );
        Ok(())
    }
}

impl Kv {
    fn connect(&self) -> KvConn {
        self.connections.fetch_add(1, Ordering::Relaxed);
        KvConn {
            store: self.store.clone(),
        }
    }
}

fn key_params(ctx: &BenchmarkContext) -> anyhow::Result<Params> {
    let keys = ctx.args.uint("keys", 1024)?;
    let key_len = ctx.args.uint("key_size", 16)?;
    Ok(Params::new().with(RandomString::new(keys as usize, key_len as usize)))
}

fn kv_get(kv: Arc<Kv>, ctx: &BenchmarkContext) -> anyhow::Result<Workload> {
    let params = key_params(ctx)?;
    Ok(Workload::with_client(
        params,
        move || {
            let conn = kv.connect();
            async move { Ok(conn) }
        },
        |conn: Arc<KvConn>, args: Vec<Value>| async move {
            let key = args
                .first()
                .and_then(Value::as_str)
                .context("get expects a string key")?;
            let _ = conn.get(key);
            Ok(())
        },
    ))
}

fn kv_put(kv: Arc<Kv>, ctx: &BenchmarkContext) -> anyhow::Result<Workload> {
    let values = ctx.args.uint("values", 64)?;
    let value_size = ctx.args.uint("value_size", 128)?;
    let params = key_params(ctx)?.with(RandomBytes::new(values as usize, value_size as usize));
    Ok(Workload::with_client(
        params,
        move || {
            let conn = kv.connect();
            async move { Ok(conn) }
        },
        |conn: Arc<KvConn>, args: Vec<Value>| async move {
            let (Some(key), Some(value)) = (
                args.first().and_then(Value::as_str),
                args.get(1).and_then(Value::as_bytes),
            ) else {
                anyhow::bail!("put expects a key and a value");
            };
            conn.put(key, Bytes::copy_from_slice(value));
            Ok(())
        },
    ))
}

/// Calls that only sleep, for calibrating the runner itself.
struct Sleep;

impl BenchmarkSuite for Sleep {}

fn sleep_fixed(_: Arc<Sleep>, ctx: &BenchmarkContext) -> anyhow::Result<Workload> {
    let delay = ctx.args.duration("delay", Duration::from_millis(1))?;
    Ok(Workload::new(Params::new(), move |_| async move {
        tokio::time::sleep(delay).await;
        Ok(())
    }))
}

fn sleep_flaky(_: Arc<Sleep>, ctx: &BenchmarkContext) -> anyhow::Result<Workload> {
    let delay = ctx.args.duration("delay", Duration::from_millis(1))?;
    let fail_every = ctx.args.uint("fail_every", 10)?.max(1);
    let calls = Arc::new(AtomicU64::new(0));
    Ok(Workload::new(Params::new(), move |_| {
        let n = calls.fetch_add(1, Ordering::Relaxed) + 1;
        async move {
            tokio::time::sleep(delay).await;
            anyhow::ensure!(n % fail_every != 0, "call {n} failed on purpose");
            Ok(())
        }
    }))
}

/// A shared counter whose operations must never interleave.
struct Counter;

#[async_trait]
impl SimulationSuite for Counter {
    async fn setup_simulator(&self, sim: &mut SimulatorSetup) -> anyhow::Result<()> {
        let value = Arc::new(AtomicI64::new(0));
        let applied = Arc::new(AtomicI64::new(0));

        let (v, a) = (value.clone(), applied.clone());
        sim.operation("increment", Duration::from_millis(100), move |_| {
            let (v, a) = (v.clone(), a.clone());
            async move {
                // Read-modify-write in two steps: only safe when executions never overlap.
                let cur = v.load(Ordering::SeqCst);
                tokio::task::yield_now().await;
                v.store(cur + 1, Ordering::SeqCst);
                a.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })?;

        let (v, a) = (value.clone(), applied.clone());
        sim.operation("decrement", Duration::from_millis(250), move |_| {
            let (v, a) = (v.clone(), a.clone());
            async move {
                let cur = v.load(Ordering::SeqCst);
                tokio::task::yield_now().await;
                v.store(cur - 1, Ordering::SeqCst);
                a.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        })?;

        sim.operation("check", Duration::from_secs(1), move |ctx| {
            let (v, a) = (value.clone(), applied.clone());
            async move {
                let (seen, expected) = (v.load(Ordering::SeqCst), a.load(Ordering::SeqCst));
                ctx.record(vec![
                    Value::from(ctx.operation.as_ref()),
                    Value::from(seen),
                    Value::from(expected),
                ]);
                anyhow::ensure!(seen == expected, "counter is {seen}, expected {expected}");
                Ok(())
            }
        })?;
        Ok(())
    }
}
