use std::collections::BTreeMap;
use std::sync::Arc;

use fleet_value::Value;
use rand::Rng;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

use super::suite::{OperationContext, OperationSpec, SimulatorSetup};
use crate::{Args, Error, Register, Result, Trace};

/// Waits `rate + U(0,1) * jitter * rate`. A jitter that is not a positive finite
/// number counts as `1.0`.
#[must_use]
pub fn jittered(rate: Duration, jitter: f64) -> Duration {
    let factor = if jitter.is_finite() && jitter > 0.0 {
        jitter
    } else {
        1.0
    };
    let u: f64 = rand::thread_rng().gen_range(0.0..1.0);
    let extra = Duration::try_from_secs_f64(rate.as_secs_f64() * u * factor).unwrap_or(Duration::MAX);
    rate.saturating_add(extra)
}

/// A scheduled operation of one simulator.
struct Operation {
    spec: OperationSpec,
    stop: Option<watch::Sender<bool>>,
}

/// One replica of a simulation: a set of independently scheduled operations
/// that never run concurrently with each other.
pub struct Simulator {
    simulation: Arc<str>,
    id: usize,
    args: Arc<Args>,
    lock: Arc<Mutex<()>>,
    operations: Vec<Operation>,
    tasks: Vec<JoinHandle<()>>,
}

impl Simulator {
    /// Builds the simulator from its registered operations, applying per-operation
    /// rate and jitter overrides by name. Unknown names are ignored.
    pub fn new(
        setup: SimulatorSetup,
        rates: &BTreeMap<String, Duration>,
        jitters: &BTreeMap<String, f64>,
    ) -> Result<Self> {
        let ctx = setup.ctx().clone();
        let mut operations = Vec::with_capacity(setup.operations.len());
        for mut spec in setup.operations {
            if let Some(rate) = rates.get(&*spec.name) {
                if rate.is_zero() {
                    return Err(Error::invalid_config(format!(
                        "rate of operation `{}` must be a positive duration",
                        spec.name
                    )));
                }
                spec.rate = *rate;
            }
            if let Some(jitter) = jitters.get(&*spec.name) {
                spec.jitter = *jitter;
            }
            operations.push(Operation { spec, stop: None });
        }

        Ok(Self {
            simulation: Arc::from(ctx.simulation.as_str()),
            id: ctx.simulator,
            args: Arc::new(ctx.args),
            lock: Arc::new(Mutex::new(())),
            operations,
            tasks: Vec::new(),
        })
    }

    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// Names and effective rates of the scheduled operations.
    pub fn operations(&self) -> impl Iterator<Item = (&str, Duration, f64)> {
        self.operations
            .iter()
            .map(|op| (&*op.spec.name, op.spec.rate, op.spec.jitter))
    }

    /// Spawns one task per operation. Traces go to `register`.
    pub fn start(&mut self, register: Arc<dyn Register>) -> Result<()> {
        if self.is_running() {
            return Err(Error::invalid_state(format!(
                "simulator {} of `{}` is already started",
                self.id, self.simulation
            )));
        }

        for op in &mut self.operations {
            let (stop_tx, stop_rx) = watch::channel(false);
            op.stop = Some(stop_tx);

            let task = OperationTask {
                simulation: self.simulation.clone(),
                simulator: self.id,
                args: self.args.clone(),
                lock: self.lock.clone(),
                spec: op.spec.clone(),
                register: register.clone(),
            };
            self.tasks.push(tokio::spawn(task.run(stop_rx)));
        }
        tracing::debug!(
            simulation = %self.simulation,
            simulator = self.id,
            operations = self.operations.len(),
            "simulator started"
        );
        Ok(())
    }

    /// Raises every operation's stop signal and waits for the tasks to exit.
    ///
    /// An operation that is mid-execution finishes its current run first.
    pub async fn stop(&mut self) -> Result<()> {
        if !self.is_running() {
            return Err(Error::invalid_state(format!(
                "simulator {} of `{}` is not started",
                self.id, self.simulation
            )));
        }

        for op in &mut self.operations {
            if let Some(stop) = op.stop.take() {
                stop.send_replace(true);
            }
        }
        for task in self.tasks.drain(..) {
            if let Err(err) = task.await {
                tracing::warn!(simulation = %self.simulation, error = %err, "operation task failed");
            }
        }
        tracing::debug!(simulation = %self.simulation, simulator = self.id, "simulator stopped");
        Ok(())
    }
}

impl Drop for Simulator {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

struct OperationTask {
    simulation: Arc<str>,
    simulator: usize,
    args: Arc<Args>,
    lock: Arc<Mutex<()>>,
    spec: OperationSpec,
    register: Arc<dyn Register>,
}

impl OperationTask {
    async fn run(self, mut stop: watch::Receiver<bool>) {
        loop {
            let wait = jittered(self.spec.rate, self.spec.jitter);
            tokio::select! {
                () = tokio::time::sleep(wait) => {}
                _ = stop.changed() => break,
            }

            let guard = self.lock.lock().await;
            // Stop may have been raised while another operation held the lock.
            if *stop.borrow() {
                break;
            }

            let ctx = OperationContext::new(
                self.simulation.clone(),
                self.simulator,
                self.spec.name.clone(),
                self.args.clone(),
                self.register.clone(),
            );
            let started = Instant::now();
            let res = (self.spec.f)(ctx).await;
            drop(guard);

            let mut trace = Trace::from_iter([
                Value::from(&*self.simulation),
                Value::from(self.simulator),
                Value::from(&*self.spec.name),
                Value::from(res.is_ok()),
            ]);
            match res {
                Ok(()) => {
                    tracing::trace!(
                        operation = %self.spec.name,
                        elapsed = ?started.elapsed(),
                        "operation succeeded"
                    );
                }
                Err(err) => {
                    let msg = format!("{err:#}");
                    tracing::debug!(operation = %self.spec.name, error = %msg, "operation failed");
                    trace.values.push(msg.into());
                }
            }
            self.register.record(trace);
        }
    }
}
