mod simulator;
mod suite;

pub use simulator::{Simulator, jittered};
pub use suite::{
    OperationContext, OperationFn, SimulationContext, SimulationSuite, SimulatorSetup,
};
