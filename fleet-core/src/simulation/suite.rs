use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fleet_value::Value;

use crate::{Args, BoxFuture, Error, Register, Result, Trace};

/// Scope of simulation-level and simulator-level hooks.
#[derive(Debug, Clone)]
pub struct SimulationContext {
    pub simulation: String,
    /// Index of the worker process, which is also the simulator (replica) id.
    pub simulator: usize,
    pub args: Args,
}

/// Lifecycle hooks of a simulation.
///
/// `setup_simulator` runs once per replica and is where operations get registered;
/// state created there is private to that replica.
#[async_trait]
pub trait SimulationSuite: Send + Sync + 'static {
    async fn setup_simulation(&self, _ctx: &SimulationContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn teardown_simulation(&self, _ctx: &SimulationContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn setup_simulator(&self, sim: &mut SimulatorSetup) -> anyhow::Result<()>;

    async fn teardown_simulator(&self, _ctx: &SimulationContext) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Everything an operation sees when it runs.
#[derive(Clone)]
pub struct OperationContext {
    pub simulation: Arc<str>,
    pub simulator: usize,
    pub operation: Arc<str>,
    pub args: Arc<Args>,
    register: Arc<dyn Register>,
}

impl OperationContext {
    pub(crate) fn new(
        simulation: Arc<str>,
        simulator: usize,
        operation: Arc<str>,
        args: Arc<Args>,
        register: Arc<dyn Register>,
    ) -> Self {
        Self {
            simulation,
            simulator,
            operation,
            args,
            register,
        }
    }

    /// Records a trace through the simulator's register.
    pub fn record(&self, values: Vec<Value>) {
        self.register.record(Trace::new(values));
    }
}

pub type OperationFn =
    Arc<dyn Fn(OperationContext) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

#[derive(Clone)]
pub(crate) struct OperationSpec {
    pub(crate) name: Arc<str>,
    pub(crate) rate: Duration,
    pub(crate) jitter: f64,
    pub(crate) f: OperationFn,
}

/// Collects the operations of one simulator replica.
pub struct SimulatorSetup {
    ctx: SimulationContext,
    pub(crate) operations: Vec<OperationSpec>,
}

impl SimulatorSetup {
    pub(crate) fn new(ctx: SimulationContext) -> Self {
        Self {
            ctx,
            operations: Vec::new(),
        }
    }

    #[must_use]
    pub fn ctx(&self) -> &SimulationContext {
        &self.ctx
    }

    #[must_use]
    pub fn args(&self) -> &Args {
        &self.ctx.args
    }

    #[must_use]
    pub fn simulator(&self) -> usize {
        self.ctx.simulator
    }

    /// Registers an operation waiting between `rate` and `2 * rate` between runs.
    pub fn operation<F, Fut>(&mut self, name: &str, rate: Duration, f: F) -> Result<()>
    where
        F: Fn(OperationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.operation_with_jitter(name, rate, 1.0, f)
    }

    /// Registers an operation waiting `rate + U(0,1) * jitter * rate` between runs.
    ///
    /// A zero or negative jitter counts as `1.0`.
    pub fn operation_with_jitter<F, Fut>(
        &mut self,
        name: &str,
        rate: Duration,
        jitter: f64,
        f: F,
    ) -> Result<()>
    where
        F: Fn(OperationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        if rate.is_zero() {
            return Err(Error::invalid_config(format!(
                "rate of operation `{name}` must be a positive duration"
            )));
        }
        if self.operations.iter().any(|op| &*op.name == name) {
            return Err(Error::invalid_config(format!(
                "operation `{name}` is registered twice"
            )));
        }
        let f: OperationFn = Arc::new(move |ctx| -> BoxFuture<'static, _> { Box::pin(f(ctx)) });
        self.operations.push(OperationSpec {
            name: Arc::from(name),
            rate,
            jitter,
            f,
        });
        Ok(())
    }
}
