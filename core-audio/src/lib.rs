//! # Audio Coordination Module
//!
//! The audio half of the slidecast core: assembling playable clips from raw
//! payloads, coordinating the looping background-music channel (ducking and
//! restoring around narration), and firing short sound effects.
//!
//! ## Overview
//!
//! This crate handles:
//! - Clip container detection and the deterministic silent placeholder
//! - Background music volume fades (duck fast, restore slower)
//! - Fire-and-forget sound effects with trigger throttling
//! - The shared global mute flag
//!
//! The dialogue sequencer interacts with background music exclusively through
//! the [`BackgroundDucking`] protocol; playback state and background state
//! never share a lock.

pub mod background;
pub mod clip;
pub mod effects;
pub mod error;

pub use background::{
    BackgroundAudioCoordinator, BackgroundAudioState, BackgroundDucking, GlobalMute,
};
pub use clip::FormatDetector;
pub use effects::{EffectLibrary, SoundEffect, SoundEffectPlayer};
pub use error::{AudioError, Result};
