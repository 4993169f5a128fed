//! Session context and messaging
//!
//! The session context carries everything one recognition run needs and is
//! owned by that run alone. Session events report capture progress to the
//! consuming layer.

pub mod messages;
pub mod state;

pub use messages::SessionEvent;
pub use state::SessionContext;
