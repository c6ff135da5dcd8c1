//! HTTP/JSON control plane between a coordinator and its workers.
//!
//! Every lifecycle call is `POST /v1/<resource>/<action>` with a JSON body.
//! Failures come back as a non-2xx status carrying the serialized
//! [`fleet_core::Error`]. Starting a simulator answers with an NDJSON stream
//! of traces that ends once the simulator is stopped.

mod client;
mod codec;
mod connector;
mod error;
mod server;

pub use client::{WorkerClient, WorkerClientConfig};
pub use codec::LineDecoder;
pub use connector::StaticConnector;
pub use error::{Error, Result, TransportErrorKind};
pub use server::{WorkerServer, router};

pub const PATH_HEALTH: &str = "/v1/health";
pub const PATH_SUITE_SETUP: &str = "/v1/suite/setup";
pub const PATH_SUITE_TEARDOWN: &str = "/v1/suite/teardown";
pub const PATH_WORKER_SETUP: &str = "/v1/worker/setup";
pub const PATH_WORKER_TEARDOWN: &str = "/v1/worker/teardown";
pub const PATH_BENCHMARK_SETUP: &str = "/v1/benchmark/setup";
pub const PATH_BENCHMARK_TEARDOWN: &str = "/v1/benchmark/teardown";
pub const PATH_BENCHMARK_RUN: &str = "/v1/benchmark/run";
pub const PATH_SIMULATION_SETUP: &str = "/v1/simulation/setup";
pub const PATH_SIMULATION_TEARDOWN: &str = "/v1/simulation/teardown";
pub const PATH_SIMULATOR_SETUP: &str = "/v1/simulator/setup";
pub const PATH_SIMULATOR_TEARDOWN: &str = "/v1/simulator/teardown";
pub const PATH_SIMULATOR_START: &str = "/v1/simulator/start";
pub const PATH_SIMULATOR_STOP: &str = "/v1/simulator/stop";

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_NDJSON: &str = "application/x-ndjson";
