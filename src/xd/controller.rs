// XD controller: one serial line shared by up to 12 axes
//
// The transport is guarded by a single fair (FIFO) lock, so poll steps and
// motion commands from any thread are serialized in submission order. Each
// axis has its own lock as well; motion commands and stage changes on an axis
// hold it for their whole duration.
//
// All methods block, and those taking an axis or transport lock panic when
// called from an async context. From async code call them inside
// spawn_blocking.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::axis::{Axis, ParameterLink};
use super::error::{Result, XdError};
use super::protocol::{self, Command, SerialTransport, Transport, Value, ValueKind};
use crate::config::{DEFAULT_IDLE_POLL, DEFAULT_MOVING_POLL, FORCED_FAST_POLLS};

/// Largest supported axis count (XD-19)
pub const MAX_AXES: usize = 12;

/// Axis letters of the XD-M (up to 3 axes)
const XD_M_AXES: [char; 3] = ['X', 'Y', 'Z'];

/// Axis letters of the XD-19 (up to 12 axes)
const XD_19_AXES: [char; MAX_AXES] = ['A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L'];

/// Command prefix for `index` on a controller with `count` axes
///
/// Single-axis controllers take bare commands.
pub fn axis_prefix(index: usize, count: usize) -> Option<char> {
    match count {
        0 | 1 => None,
        2..=3 => XD_M_AXES.get(index).copied(),
        _ => XD_19_AXES.get(index).copied(),
    }
}

/// Poll intervals while any axis moves and while all are idle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollPeriods {
    pub moving: Duration,
    pub idle: Duration,
}

impl Default for PollPeriods {
    fn default() -> Self {
        Self {
            moving: DEFAULT_MOVING_POLL,
            idle: DEFAULT_IDLE_POLL,
        }
    }
}

pub struct Controller {
    name: String,
    transport: Mutex<Box<dyn Transport>>,
    axes: Vec<Mutex<Axis>>,
    periods: PollPeriods,
    forced_fast_polls: AtomicU32,
    firmware_version: Option<String>,
    serial_number: Option<String>,
}

impl Controller {
    /// Open a serial port and create the controller
    pub fn open(
        name: &str,
        port_name: &str,
        baudrate: u32,
        axis_count: usize,
        periods: PollPeriods,
    ) -> Result<Self> {
        if axis_count == 0 || axis_count > MAX_AXES {
            return Err(XdError::InvalidAxisCount {
                count: axis_count,
                max: MAX_AXES,
            });
        }
        info!("Opening XD controller '{}' on {}", name, port_name);
        let transport = SerialTransport::open(port_name, baudrate)?;
        Self::with_transport(name, Box::new(transport), axis_count, periods)
    }

    /// Create the controller on an already open transport
    pub fn with_transport(
        name: &str,
        mut transport: Box<dyn Transport>,
        axis_count: usize,
        periods: PollPeriods,
    ) -> Result<Self> {
        if axis_count == 0 || axis_count > MAX_AXES {
            return Err(XdError::InvalidAxisCount {
                count: axis_count,
                max: MAX_AXES,
            });
        }

        // Diagnostics only; a silent controller is still usable
        let firmware_version = handshake(transport.as_mut(), Command::Soft);
        let serial_number = handshake(transport.as_mut(), Command::Srno);
        info!(
            "XD controller '{}': {} axes, firmware {}, serial {}",
            name,
            axis_count,
            firmware_version.as_deref().unwrap_or("?"),
            serial_number.as_deref().unwrap_or("?")
        );

        let axes = (0..axis_count).map(|i| Mutex::new(Axis::new(i))).collect();

        Ok(Self {
            name: name.to_string(),
            transport: Mutex::new(transport),
            axes,
            periods,
            forced_fast_polls: AtomicU32::new(0),
            firmware_version,
            serial_number,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn axis_count(&self) -> usize {
        self.axes.len()
    }

    pub fn poll_periods(&self) -> PollPeriods {
        self.periods
    }

    pub fn firmware_version(&self) -> Option<&str> {
        self.firmware_version.as_deref()
    }

    pub fn serial_number(&self) -> Option<&str> {
        self.serial_number.as_deref()
    }

    /// Get an axis by index
    ///
    /// The lock is a `tokio::sync::Mutex`; from a blocking thread take it with
    /// `blocking_lock`, from async code with `lock().await`.
    pub fn axis(&self, index: usize) -> Result<&Mutex<Axis>> {
        self.axes.get(index).ok_or(XdError::InvalidAxis {
            index,
            count: self.axes.len(),
        })
    }

    /// Copy of the axis state as of its last operation
    ///
    /// # Panics
    ///
    /// Panics when called from within an async execution context. Use
    /// `spawn_blocking` there.
    pub fn axis_snapshot(&self, index: usize) -> Result<Axis> {
        Ok(self.axis(index)?.blocking_lock().clone())
    }

    fn prefix(&self, index: usize) -> Result<Option<char>> {
        if index >= self.axes.len() {
            return Err(XdError::InvalidAxis {
                index,
                count: self.axes.len(),
            });
        }
        Ok(axis_prefix(index, self.axes.len()))
    }

    fn with_transport_locked<T>(
        &self,
        f: impl FnOnce(&mut dyn Transport) -> Result<T>,
    ) -> Result<T> {
        let mut transport = self.transport.blocking_lock();
        f(transport.as_mut())
    }

    /// Start a move on one axis
    pub fn move_axis(
        &self,
        index: usize,
        position: f64,
        relative: bool,
        min_velocity: f64,
        max_velocity: f64,
        acceleration: f64,
    ) -> Result<()> {
        let mut axis = self.axis(index)?.blocking_lock();
        self.request_fast_polls();
        axis.move_to(self, position, relative, min_velocity, max_velocity, acceleration)
    }

    pub fn home_axis(
        &self,
        index: usize,
        min_velocity: f64,
        max_velocity: f64,
        acceleration: f64,
        forwards: bool,
    ) -> Result<()> {
        let mut axis = self.axis(index)?.blocking_lock();
        self.request_fast_polls();
        axis.home(self, min_velocity, max_velocity, acceleration, forwards)
    }

    pub fn stop_axis(&self, index: usize, acceleration: f64) -> Result<()> {
        let mut axis = self.axis(index)?.blocking_lock();
        self.request_fast_polls();
        axis.stop(self, acceleration)
    }

    pub fn set_tolerances(&self, index: usize, ptol: i64, pto2: i64) -> Result<()> {
        let mut axis = self.axis(index)?.blocking_lock();
        axis.set_tolerances(self, ptol, pto2)
    }

    /// Poll one axis; returns whether it is moving
    pub fn poll_axis(&self, index: usize) -> Result<bool> {
        let mut axis = self.axis(index)?.blocking_lock();
        axis.poll(self)
    }

    /// Poll every axis in index order and return their snapshots
    ///
    /// A failing axis is marked with its problem flag; the remaining axes are
    /// still polled.
    ///
    /// # Panics
    ///
    /// Panics when called from within an async execution context.
    pub fn poll_all(&self) -> Vec<Axis> {
        self.axes
            .iter()
            .map(|slot| {
                let mut axis = slot.blocking_lock();
                let _ = axis.poll(self);
                axis.clone()
            })
            .collect()
    }

    /// Select the stage type of an axis
    ///
    /// The profile is replaced first; if the stage has an encoder resolution
    /// command it is then sent to the device.
    pub fn configure_axis(&self, index: usize, stage: &str) -> Result<()> {
        let mut axis = self.axis(index)?.blocking_lock();
        axis.set_stage(stage);
        let parts = axis
            .profile()
            .encoder_command_parts()
            .map(|(name, value)| (name.to_string(), value.to_string()));

        if let Some((name, value)) = parts {
            self.set_parameter(index, &name, Value::Text(value))?;
        }
        info!("{}: axis {} configured as {}", self.name, index, stage);
        Ok(())
    }

    /// Enable or disable unsolicited status messages
    pub fn set_info_mode(&self, enabled: bool) -> Result<()> {
        self.set_controller_parameter(Command::Info, Value::Int(enabled as i64))
    }

    /// Run the controller LED test
    pub fn test_leds(&self, value: impl Into<Value>) -> Result<()> {
        self.set_controller_parameter(Command::Test, value.into())
    }

    fn set_controller_parameter(&self, command: Command, value: Value) -> Result<()> {
        self.with_transport_locked(|t| {
            protocol::transact(t, None, command.name(), Some(&value)).map(|_| ())
        })
        .inspect_err(|e| warn!("{}: {}", self.name, e))
    }

    /// Keep polling at the moving rate for the next few cycles
    pub fn request_fast_polls(&self) {
        self.forced_fast_polls.store(FORCED_FAST_POLLS, Ordering::SeqCst);
    }

    /// Delay before the next poll cycle
    pub fn next_poll_period(&self, any_moving: bool) -> Duration {
        if any_moving {
            return self.periods.moving;
        }
        let forced = self
            .forced_fast_polls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if forced {
            self.periods.moving
        } else {
            self.periods.idle
        }
    }

    /// Human-readable dump of the controller and all axes
    ///
    /// # Panics
    ///
    /// Panics when called from within an async execution context.
    pub fn report(&self) -> String {
        let mut out = format!(
            "XD controller {}, numAxes={}, moving poll period={:?}, idle poll period={:?}",
            self.name,
            self.axes.len(),
            self.periods.moving,
            self.periods.idle
        );
        for slot in &self.axes {
            out.push('\n');
            out.push_str(&slot.blocking_lock().report());
        }
        out
    }
}

impl ParameterLink for Controller {
    fn set_parameter(&self, axis: usize, command: &str, value: Value) -> Result<()> {
        let prefix = self.prefix(axis)?;
        self.with_transport_locked(|t| protocol::transact(t, prefix, command, Some(&value)))
            .map(|_| ())
            .inspect_err(|e| warn!("{}: {}", self.name, e))
    }

    fn get_parameter(&self, axis: usize, command: &str, kind: ValueKind) -> Result<Value> {
        let prefix = self.prefix(axis)?;
        self.with_transport_locked(|t| protocol::query(t, prefix, command, kind))
            .inspect_err(|e| warn!("{}: {}", self.name, e))
    }
}

fn handshake(transport: &mut dyn Transport, command: Command) -> Option<String> {
    match protocol::query(transport, None, command.name(), ValueKind::Text) {
        Ok(value) => value.as_str().map(str::to_string),
        Err(e) => {
            warn!("Cannot read {} from controller: {}", command, e);
            None
        }
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("name", &self.name)
            .field("axes", &self.axes.len())
            .field("periods", &self.periods)
            .finish()
    }
}
