//! Wire protocol: `<role>|<error>|<state>\0`, at most 32 bytes per frame.

pub mod codec;
pub mod session;
pub mod signal;
