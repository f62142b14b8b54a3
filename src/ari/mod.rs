pub mod client;
pub mod event;

pub use client::{AriApi, AriClient, AriError, AriResult};
pub use event::{Event, EventKind};
