//! Inverse-kinematics rig for a CAN-bridged robotic arm.
//!
//! Forward kinematics and a CCD solver drive the rig from a dragged target, while a
//! reconciler keeps bridge telemetry, in-progress edits and solver output from
//! overwriting each other.

pub mod angle;
pub mod bridge;
pub mod ccd;
pub mod chain;
pub mod config;
pub mod protocol;
pub mod reconcile;
pub mod rig;
pub mod server;

pub use ccd::{CcdConfig, CcdSolver, SolveReport};
pub use chain::{ArmConvention, KinematicChain};
pub use protocol::{Command, TelemetrySnapshot};
pub use reconcile::{Reconciler, RigSnapshot};
