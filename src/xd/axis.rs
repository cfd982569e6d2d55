// One motion channel on an XD controller
//
// The axis owns its calibration and the last-known-good readbacks. All device
// traffic goes through a ParameterLink, which the controller implements.

use tracing::{debug, warn};

use super::error::{Result, XdError};
use super::protocol::{Command, Value, ValueKind};
use super::stages::{self, StageProfile};
use super::status::StatusFlags;

/// Transaction entry points an axis needs from its controller
pub trait ParameterLink {
    /// Set `command` on axis `axis` to `value`
    fn set_parameter(&self, axis: usize, command: &str, value: Value) -> Result<()>;

    /// Query `command` on axis `axis`, decoding the reply as `kind`
    fn get_parameter(&self, axis: usize, command: &str, kind: ValueKind) -> Result<Value>;
}

#[derive(Debug, Clone)]
pub struct Axis {
    index: usize,
    stage_name: Option<String>,
    profile: StageProfile,
    status_word: u32,
    flags: StatusFlags,
    encoder_position: f64,
    target_position: f64,
    target_velocity: i64,
    excitation_frequency: i64,
    problem: bool,
}

impl Axis {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            stage_name: None,
            profile: StageProfile::unscaled(),
            status_word: 0,
            flags: StatusFlags::default(),
            encoder_position: 0.0,
            target_position: 0.0,
            target_velocity: 0,
            excitation_frequency: 0,
            problem: false,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn profile(&self) -> &StageProfile {
        &self.profile
    }

    pub fn stage_name(&self) -> Option<&str> {
        self.stage_name.as_deref()
    }

    pub fn status_word(&self) -> u32 {
        self.status_word
    }

    pub fn flags(&self) -> &StatusFlags {
        &self.flags
    }

    pub fn encoder_position(&self) -> f64 {
        self.encoder_position
    }

    pub fn target_position(&self) -> f64 {
        self.target_position
    }

    pub fn target_velocity(&self) -> i64 {
        self.target_velocity
    }

    pub fn excitation_frequency(&self) -> i64 {
        self.excitation_frequency
    }

    /// True when the last poll cycle failed
    pub fn problem(&self) -> bool {
        self.problem
    }

    /// Replace the calibration profile via the stage catalog
    pub fn set_stage(&mut self, type_name: &str) {
        self.profile = stages::lookup(type_name);
        self.stage_name = Some(type_name.to_string());
        debug!("Axis {} stage set to {}", self.index, type_name);
    }

    /// Device velocity setpoint for a physical velocity
    pub fn device_velocity(&self, max_velocity: f64) -> i64 {
        (max_velocity * self.profile.encoder_resolution * self.profile.velocity_factor as f64)
            .round() as i64
    }

    /// Start a move
    ///
    /// `min_velocity` and `acceleration` are accepted for interface symmetry;
    /// the device has no acceleration control in this protocol.
    /// If the velocity setpoint is accepted but the target is not, the error is
    /// returned as-is and the velocity change stays in effect.
    pub fn move_to(
        &mut self,
        link: &impl ParameterLink,
        position: f64,
        relative: bool,
        _min_velocity: f64,
        max_velocity: f64,
        _acceleration: f64,
    ) -> Result<()> {
        let velocity = self.device_velocity(max_velocity);
        link.set_parameter(self.index, Command::Sspd.name(), Value::Int(velocity))?;

        let command = if relative { Command::Step } else { Command::Dpos };
        let target = Value::Int(position.round() as i64);
        if let Err(e) = link.set_parameter(self.index, command.name(), target) {
            warn!(
                "Axis {}: velocity set to {} but {} failed: {}",
                self.index, velocity, command, e
            );
            return Err(e);
        }
        Ok(())
    }

    /// Start an index search in the given direction
    pub fn home(
        &mut self,
        link: &impl ParameterLink,
        _min_velocity: f64,
        _max_velocity: f64,
        _acceleration: f64,
        forwards: bool,
    ) -> Result<()> {
        link.set_parameter(self.index, Command::Indx.name(), Value::Int(forwards as i64))
    }

    /// Drive outputs to zero volts immediately; position is not held
    pub fn stop(&mut self, link: &impl ParameterLink, _acceleration: f64) -> Result<()> {
        link.set_parameter(self.index, Command::Zero.name(), Value::Int(0))
    }

    /// Set both position tolerances
    pub fn set_tolerances(
        &mut self,
        link: &impl ParameterLink,
        ptol: i64,
        pto2: i64,
    ) -> Result<()> {
        link.set_parameter(self.index, Command::Ptol.name(), Value::Int(ptol))?;
        link.set_parameter(self.index, Command::Pto2.name(), Value::Int(pto2))
    }

    /// Read back status, positions, velocity and frequency
    ///
    /// Returns whether the axis is moving. Fields updated before a failing
    /// query keep their new values; later fields keep the previous cycle's.
    pub fn poll(&mut self, link: &impl ParameterLink) -> Result<bool> {
        let result = self.poll_registers(link);
        self.problem = result.is_err();
        if let Err(ref e) = result {
            warn!("Axis {} poll skipped: {}", self.index, e);
        }
        result.map(|_| self.flags.is_moving())
    }

    fn poll_registers(&mut self, link: &impl ParameterLink) -> Result<()> {
        let stat = link.get_parameter(self.index, Command::Stat.name(), ValueKind::Int)?;
        self.set_status(status_word(&stat)?);

        let epos = link.get_parameter(self.index, Command::Epos.name(), ValueKind::Float)?;
        self.encoder_position = epos.as_f64().unwrap_or(self.encoder_position);

        let dpos = link.get_parameter(self.index, Command::Dpos.name(), ValueKind::Float)?;
        self.target_position = dpos.as_f64().unwrap_or(self.target_position);

        let sspd = link.get_parameter(self.index, Command::Sspd.name(), ValueKind::Int)?;
        self.target_velocity = sspd.as_i64().unwrap_or(self.target_velocity);

        let freq = link.get_parameter(self.index, Command::Freq.name(), ValueKind::Int)?;
        self.excitation_frequency = freq.as_i64().unwrap_or(self.excitation_frequency);

        Ok(())
    }

    pub(crate) fn set_status(&mut self, word: u32) {
        self.status_word = word;
        self.flags = StatusFlags::decode(word);
    }

    pub fn report(&self) -> String {
        format!(
            "axis {} stage {}\n{}\nstatus 0x{:08X} moving {} problem {}",
            self.index,
            self.stage_name.as_deref().unwrap_or("(default)"),
            self.profile.report(),
            self.status_word,
            self.flags.is_moving(),
            self.problem
        )
    }
}

fn status_word(value: &Value) -> Result<u32> {
    let raw = value.as_i64().unwrap_or(-1);
    u32::try_from(raw).map_err(|_| {
        XdError::protocol(
            Command::Stat.name(),
            &value.to_string(),
            "status word out of range",
        )
    })
}
