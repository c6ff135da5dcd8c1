use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::{Error, Result, Trace};

/// Checks the traces a simulation recorded against a named model.
#[async_trait]
pub trait ModelChecker: Send + Sync {
    /// Fails with [`Error::ModelViolation`] when `traces` do not satisfy `model`.
    async fn check(&self, model: &str, traces: &[Trace]) -> Result<()>;

    /// Whether `model` can be checked at all.
    fn knows(&self, _model: &str) -> bool {
        true
    }
}

/// One in-process model: a predicate over every trace of a job.
pub type ModelFn = Arc<dyn Fn(&[Trace]) -> anyhow::Result<()> + Send + Sync>;

/// Named in-process models.
#[derive(Clone, Default)]
pub struct Models {
    models: BTreeMap<String, ModelFn>,
}

impl Models {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `check` as `name`, replacing an earlier model of that name.
    pub fn model<F>(&mut self, name: &str, check: F) -> &mut Self
    where
        F: Fn(&[Trace]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.models.insert(name.to_string(), Arc::new(check));
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }
}

#[async_trait]
impl ModelChecker for Models {
    async fn check(&self, model: &str, traces: &[Trace]) -> Result<()> {
        let check = self
            .models
            .get(model)
            .ok_or_else(|| Error::not_found("model", model))?;
        check(traces).map_err(|err| Error::ModelViolation(format!("`{model}`: {err:#}")))?;
        tracing::info!(model, traces = traces.len(), "model satisfied");
        Ok(())
    }

    fn knows(&self, model: &str) -> bool {
        self.models.contains_key(model)
    }
}
