pub mod calibration;
pub mod command_executor;
pub mod config;
pub mod controller;
pub mod error;
pub mod geometry;
pub mod hardware;
pub mod logging;
pub mod models;
pub mod pid;
pub mod routines;
pub mod safety;
pub mod state_monitor;
pub mod step_size;

pub use controller::{AlignmentController, LoopSettings, LoopState};
pub use error::{ConcurrencyViolation, ControlError};
pub use geometry::{OpticalGeometry, compute_angular_extent, compute_correction};
