// Status word decoding
//
// Bit table (bits 0, 2, 3 and 11 are reserved):
//   1 amp enabled        9 searching index
//   4 force zero        10 position reached
//   5 motor on          12 encoder error
//   6 closed loop       13 scanning
//   7 encoder at index  14 at left end
//   8 encoder valid     15 at right end
//                       16 error limit
//                       17 searching optimal frequency

use serde::Serialize;

pub const AMP_ENABLED: u32 = 1;
pub const FORCE_ZERO: u32 = 4;
pub const MOTOR_ON: u32 = 5;
pub const CLOSED_LOOP: u32 = 6;
pub const ENCODER_AT_INDEX: u32 = 7;
pub const ENCODER_VALID: u32 = 8;
pub const SEARCHING_INDEX: u32 = 9;
pub const POSITION_REACHED: u32 = 10;
pub const ENCODER_ERROR: u32 = 12;
pub const SCANNING: u32 = 13;
pub const AT_LEFT_END: u32 = 14;
pub const AT_RIGHT_END: u32 = 15;
pub const ERROR_LIMIT: u32 = 16;
pub const SEARCHING_OPTIMAL_FREQUENCY: u32 = 17;

/// Semantic flags decoded from one status word
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusFlags {
    pub amp_enabled: bool,
    pub force_zero: bool,
    pub motor_on: bool,
    pub closed_loop: bool,
    pub encoder_at_index: bool,
    pub encoder_valid: bool,
    pub searching_index: bool,
    pub position_reached: bool,
    pub encoder_error: bool,
    pub scanning: bool,
    pub at_left_end: bool,
    pub at_right_end: bool,
    pub error_limit: bool,
    pub searching_optimal_frequency: bool,
}

#[inline]
fn bit(word: u32, n: u32) -> bool {
    word & (1 << n) != 0
}

impl StatusFlags {
    pub fn decode(word: u32) -> Self {
        Self {
            amp_enabled: bit(word, AMP_ENABLED),
            force_zero: bit(word, FORCE_ZERO),
            motor_on: bit(word, MOTOR_ON),
            closed_loop: bit(word, CLOSED_LOOP),
            encoder_at_index: bit(word, ENCODER_AT_INDEX),
            encoder_valid: bit(word, ENCODER_VALID),
            searching_index: bit(word, SEARCHING_INDEX),
            position_reached: bit(word, POSITION_REACHED),
            encoder_error: bit(word, ENCODER_ERROR),
            scanning: bit(word, SCANNING),
            at_left_end: bit(word, AT_LEFT_END),
            at_right_end: bit(word, AT_RIGHT_END),
            error_limit: bit(word, ERROR_LIMIT),
            searching_optimal_frequency: bit(word, SEARCHING_OPTIMAL_FREQUENCY),
        }
    }

    pub fn is_moving(&self) -> bool {
        !self.position_reached
    }

    /// Advisory error overlay; does not replace the motion state
    pub fn has_error(&self) -> bool {
        self.error_limit || self.encoder_error
    }
}

/// Decode a status word
pub fn decode(word: u32) -> StatusFlags {
    StatusFlags::decode(word)
}
