//! # Core Frame Infrastructure
//!
//! Decoded frames, the per-capture single-frame slot, and the bounded history
//! the pipeline keeps for motion estimation.

pub mod frame;
pub mod frame_history;
pub mod frame_slot;

pub use frame::{CapturedFrame, Frame};
pub use frame_history::FrameHistory;
pub use frame_slot::FrameSlot;
