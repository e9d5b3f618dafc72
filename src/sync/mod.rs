//! Pairing of captured frames with time-aligned audio

pub mod clip;
pub mod frame;
pub mod manager;

pub use clip::{save_clip, ClipOutcome};
pub use frame::{Frame, FrameHistory, FrameOrigin};
pub use manager::{EngineStatus, SyncManager, SynchronizedSample};
