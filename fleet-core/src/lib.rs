mod args;
mod benchmark;
mod cluster;
mod config;
mod coordinator;
mod error;
mod exit;
mod model;
mod params;
mod register;
mod registry;
mod simulation;
mod stats;
mod step;
mod worker;

pub mod protocol;

use std::future::Future;
use std::pin::Pin;

pub use args::{Args, join_map, split_map};
pub use benchmark::{
    BenchmarkContext, BenchmarkSuite, CallFn, ConnectFn, RunOptions, RunResult,
    SuiteContext, Verdict, Workload, run_benchmark,
};
pub use cluster::{ClusterProvisioner, JobStatus, LocalCluster, LogStream, WorkerConnector};
pub use config::{
    BenchmarkConfig, ErrorPolicy, JobScope, RequestMode, Role, SimulationConfig, WorkerBootstrap,
    env,
};
pub use coordinator::{
    BenchmarkReport, Coordinator, JobOutput, JobReport, RunOutcome, SimulationReport,
};
pub use error::{Error, Result};
pub use exit::ExitCode;
pub use model::{ModelChecker, ModelFn, Models};
pub use params::{Param, Params, RandomBytes, RandomChoice, RandomString, SetOf};
pub use register::{ChannelRegister, JsonLinesRegister, MemoryRegister, Register, Tee, Trace};
pub use registry::{BenchmarkEntry, BenchmarkFn, Registry, SuiteBuilder};
pub use simulation::{
    OperationContext, OperationFn, SimulationContext, SimulationSuite, Simulator, SimulatorSetup,
    jittered,
};
pub use stats::{LatencySummary, Percentile};
pub use step::Step;
pub use worker::{TraceStream, Worker, WorkerApi};

pub use async_trait::async_trait;
pub use fleet_value::Value;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
