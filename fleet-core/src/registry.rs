use std::collections::BTreeMap;
use std::sync::Arc;

use crate::{BenchmarkContext, BenchmarkSuite, Error, Result, SimulationSuite, Workload};

/// Builds the workload of one benchmark for one worker.
pub type BenchmarkFn = Arc<dyn Fn(&BenchmarkContext) -> anyhow::Result<Workload> + Send + Sync>;

#[derive(Clone)]
pub struct BenchmarkEntry {
    pub hooks: Arc<dyn BenchmarkSuite>,
    pub benchmarks: BTreeMap<String, BenchmarkFn>,
}

/// Explicit catalogue of everything a worker can run, keyed by name.
#[derive(Clone, Default)]
pub struct Registry {
    suites: BTreeMap<String, BenchmarkEntry>,
    simulations: BTreeMap<String, Arc<dyn SimulationSuite>>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a benchmark suite; chain [`SuiteBuilder::benchmark`] to add its benchmarks.
    ///
    /// Registering the same name twice replaces the earlier suite.
    pub fn suite<S: BenchmarkSuite>(&mut self, name: &str, suite: S) -> SuiteBuilder<'_, S> {
        let suite = Arc::new(suite);
        self.suites.remove(name);
        let entry = self
            .suites
            .entry(name.to_string())
            .or_insert_with(|| BenchmarkEntry {
                hooks: suite.clone(),
                benchmarks: BTreeMap::new(),
            });
        SuiteBuilder {
            suite,
            benchmarks: &mut entry.benchmarks,
        }
    }

    pub fn simulation<S: SimulationSuite>(&mut self, name: &str, simulation: S) -> &mut Self {
        self.simulations
            .insert(name.to_string(), Arc::new(simulation));
        self
    }

    pub fn benchmark_suite(&self, name: &str) -> Result<&BenchmarkEntry> {
        self.suites
            .get(name)
            .ok_or_else(|| Error::not_found("suite", name))
    }

    pub fn benchmark(&self, suite: &str, benchmark: &str) -> Result<(&BenchmarkEntry, &BenchmarkFn)> {
        let entry = self.benchmark_suite(suite)?;
        let f = entry
            .benchmarks
            .get(benchmark)
            .ok_or_else(|| Error::not_found("benchmark", format!("{suite}.{benchmark}")))?;
        Ok((entry, f))
    }

    pub fn simulation_suite(&self, name: &str) -> Result<&Arc<dyn SimulationSuite>> {
        self.simulations
            .get(name)
            .ok_or_else(|| Error::not_found("simulation", name))
    }

    pub fn suite_names(&self) -> impl Iterator<Item = &str> {
        self.suites.keys().map(String::as_str)
    }

    pub fn simulation_names(&self) -> impl Iterator<Item = &str> {
        self.simulations.keys().map(String::as_str)
    }

    /// Benchmark names of a suite, in order.
    pub fn benchmark_names(&self, suite: &str) -> Result<Vec<String>> {
        Ok(self.benchmark_suite(suite)?.benchmarks.keys().cloned().collect())
    }

    /// The given suite, or every registered suite when `None`.
    pub fn resolve_suites(&self, only: Option<&str>) -> Result<Vec<String>> {
        match only {
            Some(name) => {
                self.benchmark_suite(name)?;
                Ok(vec![name.to_string()])
            }
            None => Ok(self.suites.keys().cloned().collect()),
        }
    }

    /// The given simulation, or every registered simulation when `None`.
    pub fn resolve_simulations(&self, only: Option<&str>) -> Result<Vec<String>> {
        match only {
            Some(name) => {
                self.simulation_suite(name)?;
                Ok(vec![name.to_string()])
            }
            None => Ok(self.simulations.keys().cloned().collect()),
        }
    }
}

pub struct SuiteBuilder<'a, S> {
    suite: Arc<S>,
    benchmarks: &'a mut BTreeMap<String, BenchmarkFn>,
}

impl<S: BenchmarkSuite> SuiteBuilder<'_, S> {
    /// Adds a benchmark whose workload is built from the suite and the benchmark context.
    #[must_use]
    pub fn benchmark<F>(self, name: &str, build: F) -> Self
    where
        F: Fn(Arc<S>, &BenchmarkContext) -> anyhow::Result<Workload> + Send + Sync + 'static,
    {
        let suite = self.suite.clone();
        let f: BenchmarkFn = Arc::new(move |ctx: &BenchmarkContext| build(suite.clone(), ctx));
        self.benchmarks.insert(name.to_string(), f);
        self
    }
}
