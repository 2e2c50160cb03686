//! es-stream: Per-source audio streams for the EarShot mixer
//!
//! Each connected source (an avatar microphone or an injector) feeds a
//! jitter-absorbing ring of 16-bit PCM with an attached pose and a trailing
//! loudness estimate. The packet thread writes, the mix loop reads; the ring
//! cursors are the only hot-path synchronization between the two.

mod positional;
mod ring;
mod source;

pub use positional::*;
pub use ring::*;
pub use source::*;
