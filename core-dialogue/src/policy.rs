//! # Autoplay Policy
//!
//! The rule deciding whether narration starts by itself when the deck lands
//! on a slide. Only explicit forward navigation is an implicit "continue the
//! show" signal; autoplaying on a backwards step, a direct jump, or a mere
//! re-render would surprise a presenter backing up or restarting.

use serde::{Deserialize, Serialize};

/// Why the current slide became current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NavigationReason {
    /// Explicit forward step.
    Next,
    /// Explicit backward step.
    Prev,
    /// Jump to an arbitrary slide.
    Direct,
    /// Anything else (initial render, window refocus, programmatic update).
    Other,
}

impl NavigationReason {
    /// Only a forward step reads as "keep the show going".
    pub fn is_forward(&self) -> bool {
        matches!(self, NavigationReason::Next)
    }
}

/// Decide whether a freshly armed manifest should start playing by itself.
///
/// All three conditions must hold: the navigation was an explicit forward
/// step, the manifest actually has lines, and autoplay has not already been
/// attempted for this manifest load.
pub fn autoplay_permitted(
    reason: NavigationReason,
    line_count: usize,
    already_attempted: bool,
) -> bool {
    reason.is_forward() && line_count > 0 && !already_attempted
}
