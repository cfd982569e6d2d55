// Xeryon XD piezo stage controllers
//
// Provides:
// - ASCII line protocol (command formatting, reply decoding, line transport)
// - Stage catalog and status word decoding
// - Axis and controller state with poll/move/home/stop operations
// - Process-wide controller registry

pub mod axis;
pub mod controller;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod stages;
pub mod status;

#[cfg(test)]
pub(crate) mod mock_serial;

pub use axis::{Axis, ParameterLink};
pub use controller::{Controller, PollPeriods, MAX_AXES, axis_prefix};
pub use error::{ErrorKind, Result, XdError};
pub use protocol::{
    Command, LinePort, LineTransport, SerialTransport, Transport, Value, ValueKind,
};
pub use registry::{ControllerRegistry, registry};
pub use stages::StageProfile;
pub use status::StatusFlags;
