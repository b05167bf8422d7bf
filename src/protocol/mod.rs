//! Wire-level protocol pieces: MQTT packet codec, telemetry payload, topics
//! and the device identity they are built from.

pub mod buffer;
pub mod codec;
pub mod identity;
pub mod telemetry;
pub mod topics;

pub use buffer::*;
pub use codec::*;
pub use identity::*;
pub use telemetry::*;
pub use topics::*;
