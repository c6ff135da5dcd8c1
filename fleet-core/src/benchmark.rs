mod gate;
mod runner;
mod suite;

pub use runner::{RunOptions, RunResult, Verdict, run_benchmark};
pub use suite::{BenchmarkContext, BenchmarkSuite, CallFn, ConnectFn, SuiteContext, Workload};
