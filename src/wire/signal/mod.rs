//! The signal-state byte carried in the third field of a frame.
//!
//! Bit 0 is always set so the byte can never collide with the frame terminator.

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalColor {
    Red,
    Yellow,
    Green,
}

impl SignalColor {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Red => "red",
            Self::Yellow => "yellow",
            Self::Green => "green",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LampState {
    On,
    Blink,
    Off,
}

impl LampState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Blink => "blink",
            Self::Off => "off",
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignalState(u8);

impl SignalState {
    pub const BASE: u8 = 0b0000_0001;
    pub const BLINK: u8 = 0b0000_0010;
    pub const RED: u8 = 0b0000_0100;
    pub const YELLOW: u8 = 0b0000_1000;
    pub const GREEN: u8 = 0b0001_0000;
    pub const LAMP_ON: u8 = 0b0010_0000;
    pub const LAMP_OFF: u8 = 0b0100_0000;

    /// What a controller answers to acknowledge a state change.
    pub const ACK: Self = Self::new(0);

    pub const fn new(flags: u8) -> Self {
        Self(flags | Self::BASE)
    }

    /// Keeps the byte exactly as received, base bit or not.
    pub fn from_wire(byte: u8) -> Self {
        Self(byte)
    }

    pub fn compose(color: SignalColor, lamp: LampState) -> Self {
        let color_bit = match color {
            SignalColor::Red => Self::RED,
            SignalColor::Yellow => Self::YELLOW,
            SignalColor::Green => Self::GREEN,
        };
        let lamp_bit = match lamp {
            LampState::On => Self::LAMP_ON,
            LampState::Blink => Self::BLINK,
            LampState::Off => Self::LAMP_OFF,
        };
        Self::new(color_bit | lamp_bit)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    fn has(self, flag: u8) -> bool {
        self.0 & flag == flag
    }

    /// First colour found, checked red, yellow, green.
    pub fn color(self) -> Option<SignalColor> {
        if self.has(Self::RED) {
            Some(SignalColor::Red)
        } else if self.has(Self::YELLOW) {
            Some(SignalColor::Yellow)
        } else if self.has(Self::GREEN) {
            Some(SignalColor::Green)
        } else {
            None
        }
    }

    pub fn lamp(self) -> Option<LampState> {
        if self.has(Self::LAMP_OFF) {
            Some(LampState::Off)
        } else if self.is_blinking() {
            Some(LampState::Blink)
        } else if self.has(Self::LAMP_ON) {
            Some(LampState::On)
        } else {
            None
        }
    }

    pub fn is_blinking(self) -> bool {
        self.has(Self::BLINK)
    }

    pub fn is_ack(self) -> bool {
        self == Self::ACK
    }

    /// Whether the byte is exactly what `compose` yields for its colour and lamp.
    pub fn is_controller_state(self) -> bool {
        match (self.color(), self.lamp()) {
            (Some(color), Some(lamp)) => self == Self::compose(color, lamp),
            _ => false,
        }
    }
}

impl Default for SignalState {
    fn default() -> Self {
        Self::ACK
    }
}

impl fmt::Display for SignalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ack() {
            return write!(f, "ack");
        }
        match (self.color(), self.lamp()) {
            (Some(color), Some(lamp)) if self.is_controller_state() => {
                write!(f, "{}/{}", color.as_str(), lamp.as_str())
            }
            _ => write!(f, "raw {:#04x}", self.0),
        }
    }
}

impl fmt::Debug for SignalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignalState({:#010b})", self.0)
    }
}
