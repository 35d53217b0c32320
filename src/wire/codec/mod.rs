use std::fmt;

use crate::wire::signal::SignalState;

pub const MAX_FRAME_SIZE_BYTES: usize = 32;
pub const FIELD_DELIMITER: u8 = b'|';
pub const FRAME_TERMINATOR: u8 = b'\0';
pub const RESERVED_BYTES: [u8; 4] = [FIELD_DELIMITER, FRAME_TERMINATOR, b'[', b']'];

const ERROR_TRUE: u8 = b'T';
const ERROR_FALSE: u8 = b'F';

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Reader,
    Writer,
    Shutdown,
    Unknown,
}

impl Role {
    pub fn from_wire(byte: u8) -> Self {
        match byte {
            b'R' | b'r' => Self::Reader,
            b'W' | b'w' => Self::Writer,
            b'X' | b'x' => Self::Shutdown,
            _ => Self::Unknown,
        }
    }

    pub fn to_wire(self) -> Option<u8> {
        match self {
            Self::Reader => Some(b'R'),
            Self::Writer => Some(b'W'),
            Self::Shutdown => Some(b'X'),
            Self::Unknown => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reader => "reader",
            Self::Writer => "writer",
            Self::Shutdown => "shutdown",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SignalMessage {
    pub role: Role,
    pub error: bool,
    pub state: SignalState,
}

impl Default for SignalMessage {
    fn default() -> Self {
        Self {
            role: Role::Unknown,
            error: false,
            state: SignalState::default(),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum CodecError {
    EmptyFrame,
    FrameTooLarge { size: usize, limit: usize },
    MissingTerminator,
    UnencodableRole,
    ReservedStateByte { byte: u8 },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyFrame => write!(f, "frame is empty"),
            Self::FrameTooLarge { size, limit } => {
                write!(f, "frame size {size} exceeds limit {limit}")
            }
            Self::MissingTerminator => write!(f, "frame is not null-terminated"),
            Self::UnencodableRole => write!(f, "unknown role has no wire representation"),
            Self::ReservedStateByte { byte } => {
                write!(f, "state byte {byte:#04x} collides with a reserved character")
            }
        }
    }
}

impl std::error::Error for CodecError {}

pub fn check_frame(frame: &[u8]) -> Result<(), CodecError> {
    if frame.is_empty() {
        return Err(CodecError::EmptyFrame);
    }
    if frame.len() > MAX_FRAME_SIZE_BYTES {
        return Err(CodecError::FrameTooLarge {
            size: frame.len(),
            limit: MAX_FRAME_SIZE_BYTES,
        });
    }
    if frame[frame.len() - 1] != FRAME_TERMINATOR {
        return Err(CodecError::MissingTerminator);
    }
    Ok(())
}

pub fn is_valid_frame(frame: &[u8]) -> bool {
    check_frame(frame).is_ok()
}

/// Splits a valid frame into role, error flag and state byte.
///
/// Only structural problems are errors. Unexpected field content degrades to
/// `Role::Unknown` or to the field's default.
pub fn decode(frame: &[u8]) -> Result<SignalMessage, CodecError> {
    check_frame(frame)?;

    let content_len = frame
        .iter()
        .position(|byte| *byte == FRAME_TERMINATOR)
        .unwrap_or(frame.len());
    let mut fields = frame[..content_len].splitn(3, |byte| *byte == FIELD_DELIMITER);

    let mut message = SignalMessage::default();
    if let Some(&first) = fields.next().and_then(|field| field.first()) {
        message.role = Role::from_wire(first);
    }
    if let Some(&flag) = fields.next().and_then(|field| field.first()) {
        message.error = flag == ERROR_TRUE;
    }
    if let Some(&state) = fields.next().and_then(|field| field.first()) {
        message.state = SignalState::from_wire(state);
    }

    Ok(message)
}

pub fn encode(role: Role, error: bool, state: SignalState) -> Result<Vec<u8>, CodecError> {
    let role_byte = role.to_wire().ok_or(CodecError::UnencodableRole)?;
    let state_byte = state.bits();
    if RESERVED_BYTES.contains(&state_byte) {
        return Err(CodecError::ReservedStateByte { byte: state_byte });
    }

    let error_byte = if error { ERROR_TRUE } else { ERROR_FALSE };
    Ok(vec![
        role_byte,
        FIELD_DELIMITER,
        error_byte,
        FIELD_DELIMITER,
        state_byte,
        FRAME_TERMINATOR,
    ])
}
