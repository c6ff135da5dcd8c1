//! Request payloads of the worker control plane.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Args, RunOptions};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteRequest {
    pub suite: String,
    #[serde(default)]
    pub args: Args,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkRequest {
    pub suite: String,
    pub benchmark: String,
    #[serde(default)]
    pub args: Args,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    pub suite: String,
    pub benchmark: String,
    #[serde(default)]
    pub args: Args,
    pub options: RunOptions,
}

impl RunRequest {
    #[must_use]
    pub fn benchmark(&self) -> BenchmarkRequest {
        BenchmarkRequest {
            suite: self.suite.clone(),
            benchmark: self.benchmark.clone(),
            args: self.args.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationRequest {
    pub simulation: String,
    #[serde(default)]
    pub args: Args,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatorRequest {
    pub simulation: String,
    #[serde(default)]
    pub args: Args,
    #[serde(default)]
    pub rates: BTreeMap<String, Duration>,
    #[serde(default)]
    pub jitters: BTreeMap<String, f64>,
}

impl SimulatorRequest {
    #[must_use]
    pub fn simulation(&self) -> SimulationRequest {
        SimulationRequest {
            simulation: self.simulation.clone(),
            args: self.args.clone(),
        }
    }
}
