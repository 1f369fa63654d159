// pic3d - numerical core of a three-dimensional electrostatic particle-in-cell kernel

//! Numerical core of a three-dimensional electrostatic particle-in-cell
//! (PIC) kernel: tile-based charge deposition, the particle push,
//! cross-tile particle reorder, a real-to-complex 3-D FFT, and the
//! Fourier-space Poisson solve.
//!
//! This crate is the inner hot loop only. Initial particle sampling,
//! diagnostics, checkpointing, and time-step control are left to the
//! caller; see [`step::Simulation`] for the one entry point that
//! sequences a full step.
//!
//! ```text
//! Push -> Reorder -> Deposit -> Guard-accumulate
//!      -> FFT_fwd -> Poisson -> FFT_inv -> Guard-replicate
//! ```

pub mod deposit;
pub mod error;
pub mod fft;
pub mod grid;
mod helpers;
pub mod particles;
pub mod poisson;
pub mod push;
pub mod reorder;
pub mod step;
pub mod tile;

pub use error::PicError;
pub use grid::{Field3, Field4, GridSpec};
pub use particles::ParticleTile;
pub use push::{BoundaryPolicy, PushParams};
pub use step::{Simulation, StepEnergies, StepIrc};
pub use tile::TileLayout;
