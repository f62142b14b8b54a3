use std::collections::HashMap;

pub mod controller;
pub mod registry;

pub use controller::{CallController, Command, CommandReceiver, CommandSender, command_channel};
pub use registry::{CallId, CallRegistry};

/// One leg of a call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Channel {
    /// Ringback has been requested on this leg and not yet stopped.
    pub ringing: bool,
    /// The leg is currently a member of the call's bridge.
    pub joined: bool,
}

/// A logical conversation spanning one or more channels, plus the bridge
/// joining them once both legs are up.
#[derive(Debug, Clone, Default)]
pub struct Call {
    pub channels: HashMap<String, Channel>,
    pub bridge: Option<String>,
}
