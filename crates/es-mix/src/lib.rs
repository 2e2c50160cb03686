//! es-mix: Spatial mixing for the EarShot server
//!
//! Two layers:
//! - `spatialize` is a pure function mapping one (source, listener) pair to
//!   mix parameters: an attenuation coefficient, an inter-aural delay and a
//!   weak-channel amplitude ratio.
//! - the mixer accumulates every audible source into a listener's stereo
//!   output block with saturating 16-bit arithmetic.

mod block;
mod mix;
mod spatial;

pub use block::*;
pub use mix::*;
pub use spatial::*;
