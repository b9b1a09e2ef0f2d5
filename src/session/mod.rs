//! Session lifecycle
//!
//! [`Supervisor`] owns everything a running session holds: the reverse
//! tunnel, the local listener, the device server process, and the streaming
//! task. [`SessionPhase`] is the externally visible lifecycle.

pub mod cancel;
pub mod state;
pub mod supervisor;

pub use cancel::{CancelOnDrop, StartCancel};
pub use state::{SessionPhase, SessionState};
pub use supervisor::{MediaConnection, Supervisor};
