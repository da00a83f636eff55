pub mod args;
pub mod simulate;

pub use args::{Args, Command};
pub use simulate::{run_simulation, EchoFactory, EchoRunner, EchoSession, SimulationOptions};
