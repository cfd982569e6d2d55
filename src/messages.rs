// Message types exchanged with the host control layer

use serde::{Deserialize, Serialize};

use crate::xd::{Axis, StatusFlags};

// Motion request from host -> runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisRequest {
    pub controller: String,
    pub axis: usize,
    #[serde(flatten)]
    pub action: AxisAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AxisAction {
    Move {
        position: f64,
        #[serde(default)]
        relative: bool,
        #[serde(default)]
        min_velocity: f64,
        max_velocity: f64,
        #[serde(default)]
        acceleration: f64,
    },
    Home {
        #[serde(default)]
        min_velocity: f64,
        #[serde(default)]
        max_velocity: f64,
        #[serde(default)]
        acceleration: f64,
        forwards: bool,
    },
    Stop {
        #[serde(default)]
        acceleration: f64,
    },
    SetStage {
        stage: String,
    },
}

/// Per-axis fields published to the host after every poll
///
/// Motor-record style fields are derived from the status flags here; the raw
/// flags are published alongside so the host can apply its own mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisReadback {
    pub controller: String,
    pub axis: usize,
    pub done: bool,
    pub moving: bool,
    pub closed_loop: bool,
    pub has_encoder: bool,
    pub homed: bool,
    pub high_limit: bool,
    pub low_limit: bool,
    pub following_error: bool,
    pub problem: bool,
    pub at_home: bool,
    pub encoder_position: f64,
    pub target_position: f64,
    pub velocity: i64,
    pub frequency: i64,
    pub status_word: u32,
    #[serde(skip_deserializing)]
    pub flags: StatusFlags,
}

impl AxisReadback {
    pub fn from_axis(controller: &str, axis: &Axis) -> Self {
        let flags = *axis.flags();
        Self {
            controller: controller.to_string(),
            axis: axis.index(),
            done: flags.position_reached,
            moving: flags.is_moving(),
            closed_loop: flags.closed_loop,
            has_encoder: true,
            homed: flags.encoder_valid,
            high_limit: flags.at_right_end,
            low_limit: flags.at_left_end,
            following_error: flags.error_limit,
            problem: axis.problem() || flags.encoder_error,
            at_home: flags.encoder_at_index,
            encoder_position: axis.encoder_position(),
            target_position: axis.target_position(),
            velocity: axis.target_velocity(),
            frequency: axis.excitation_frequency(),
            status_word: axis.status_word(),
            flags,
        }
    }
}

/// Readback topic for one axis
pub fn readback_topic(controller: &str, axis: usize) -> String {
    format!(
        "{}/{}/{}/readback",
        crate::config::TOPIC_READBACK_BASE,
        controller,
        axis
    )
}
