// pic3d - numerical core of a 3D electrostatic particle-in-cell kernel

//! Error types for the parts of the core that can fail at setup time.
//!
//! Capacity overflow (`irc` in the original protocol) is deliberately
//! *not* modeled here: it is a retry signal, not a fault, and is carried
//! as a plain report value alongside the mutated buffers (see
//! [`crate::reorder::ReorderReport`] and [`crate::push::PushReport`]).
//! Invariant breaches (a particle outside its tile on entry to deposit,
//! a NaN surfacing in the push) are fatal and use `assert!`/
//! `debug_assert!` directly, since there is no recovery path for them.

use thiserror::Error;

/// Shape and configuration errors raised once at setup time, before any
/// per-step work begins.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PicError {
    /// An extended grid dimension did not satisfy `Nxe >= Nx + 1` (or the
    /// analogous constraint in y or z).
    #[error("extended grid dimension {axis} = {extended} does not satisfy >= {logical} + 1")]
    GridTooSmall {
        /// Which axis failed the check (`"x"`, `"y"`, or `"z"`).
        axis: &'static str,
        /// The extended (guard-cell-inclusive) dimension that was given.
        extended: usize,
        /// The logical (physical) dimension it must exceed.
        logical: usize,
    },
    /// A logical grid dimension was not a power of two, which the FFT
    /// requires.
    #[error("dimension {axis} = {value} is not a power of two")]
    NotPowerOfTwo {
        /// Which axis failed the check.
        axis: &'static str,
        /// The offending value.
        value: usize,
    },
    /// Tile size does not evenly divide the logical grid on some axis.
    #[error("tile size {tile} does not divide grid dimension {axis} = {grid}")]
    TileDoesNotDivideGrid {
        /// Which axis failed the check.
        axis: &'static str,
        /// The grid dimension on that axis.
        grid: usize,
        /// The tile size on that axis.
        tile: usize,
    },
    /// `nppmx` (or another SIMD-blocked bound) was not a multiple of the
    /// required lane count.
    #[error("{name} = {value} is not a multiple of the lane width {lanes}")]
    NotLaneAligned {
        /// Name of the offending bound (`"nppmx"`, `"npbmx"`, ...).
        name: &'static str,
        /// The value that was given.
        value: usize,
        /// The required lane width.
        lanes: usize,
    },
    /// A buffer did not have the length its shape implies.
    #[error("buffer {name} has length {actual}, expected {expected}")]
    BufferWrongLength {
        /// Name of the offending buffer.
        name: &'static str,
        /// The length the buffer actually had.
        actual: usize,
        /// The length it was expected to have.
        expected: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_are_human_readable() {
        let e = PicError::GridTooSmall { axis: "x", extended: 4, logical: 4 };
        assert_eq!(
            e.to_string(),
            "extended grid dimension x = 4 does not satisfy >= 4 + 1"
        );
    }
}
