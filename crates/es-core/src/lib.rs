//! es-core: Shared types and the frame contract for EarShot
//!
//! This crate provides the foundational types used across all EarShot crates:
//! the network frame constants, 3D math for poses and zones, and the common
//! error type.

mod error;
mod frame;
mod math;
mod zone;

pub use error::*;
pub use frame::*;
pub use math::*;
pub use zone::*;
