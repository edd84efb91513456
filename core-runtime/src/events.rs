//! # Event Bus System
//!
//! Event-driven architecture for the slidecast core using
//! `tokio::sync::broadcast`. Playback progress, manifest lifecycle, and the
//! diagnostics the dialogue pipeline routes away from user-facing errors
//! (envelope fallbacks, blocked autoplay, throttled effects) all flow through
//! here as typed events.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐     emit      ┌───────────┐
//! │ LineSequencer ├──────────────>│           │
//! └───────────────┘               │           │
//!                                 │ EventBus  │
//! ┌───────────────┐     emit      │ (broadcast│     subscribe    ┌────────────┐
//! │ Background    ├──────────────>│  channel) ├─────────────────>│ Subscriber │
//! │ Coordinator   │               │           │                  └────────────┘
//! └───────────────┘               │           │
//!                                 │           │     subscribe    ┌────────────┐
//! ┌───────────────┐     emit      │           ├─────────────────>│ Subscriber │
//! │ EffectPlayer  ├──────────────>│           │                  └────────────┘
//! └───────────────┘               └───────────┘
//! ```
//!
//! ## Error Handling
//!
//! The bus uses `tokio::sync::broadcast`, which can produce two errors on the
//! receive side:
//!
//! - **`RecvError::Lagged(n)`**: subscriber was too slow and missed `n`
//!   events. Non-fatal; the subscriber keeps receiving new events.
//! - **`RecvError::Closed`**: all senders dropped. Signal to exit.
//!
//! Emission with no subscribers is not an error worth surfacing; callers use
//! `bus.emit(event).ok()`.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

// Re-export commonly used types
pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// This value balances memory usage with the ability to handle bursts of
/// events (e.g. a fast slide skim emitting load/stop pairs). Subscribers that
/// can't keep up will receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Dialogue playback and manifest lifecycle events
    Dialogue(DialogueEvent),
    /// Background music channel events
    Background(BackgroundEvent),
    /// Sound effect events
    Effect(EffectEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Dialogue(e) => e.description(),
            CoreEvent::Background(e) => e.description(),
            CoreEvent::Effect(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Dialogue(DialogueEvent::ManifestMalformed { .. }) => EventSeverity::Error,
            CoreEvent::Dialogue(
                DialogueEvent::LineFallback { .. }
                | DialogueEvent::LineFailed { .. }
                | DialogueEvent::AutoplayBlocked { .. },
            ) => EventSeverity::Warning,
            CoreEvent::Background(BackgroundEvent::StartBlocked { .. }) => EventSeverity::Warning,
            CoreEvent::Dialogue(
                DialogueEvent::ManifestLoaded { .. } | DialogueEvent::SequenceCompleted { .. },
            ) => EventSeverity::Info,
            CoreEvent::Background(BackgroundEvent::Started | BackgroundEvent::Stopped) => {
                EventSeverity::Info
            }
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    /// Debug-level events (verbose)
    Debug,
    /// Informational events
    Info,
    /// Warning events
    Warning,
    /// Error events
    Error,
}

// ============================================================================
// Dialogue Events
// ============================================================================

/// Why a dialogue line fell back to the silent placeholder clip.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeFallback {
    /// The envelope could not be fetched (network error or HTTP failure).
    FetchFailed,
    /// The envelope JSON matched none of the known payload shapes.
    UnrecognizedShape,
    /// A payload was found but its Base64 content did not decode.
    InvalidPayload,
}

/// Events related to dialogue manifests and line playback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum DialogueEvent {
    /// A manifest fetch started for a slide.
    ManifestLoading {
        /// Slide index the fetch was issued for.
        slide: usize,
    },
    /// A manifest with at least one line was loaded.
    ManifestLoaded {
        /// Slide index the manifest belongs to.
        slide: usize,
        /// Manifest title.
        title: String,
        /// Number of dialogue lines.
        line_count: usize,
    },
    /// No dialogue exists for the slide (missing file, network failure, or
    /// an empty line list). Neutral from the user's point of view.
    ManifestUnavailable {
        /// Slide index the fetch was issued for.
        slide: usize,
    },
    /// The manifest exists but is structurally invalid. A content-authoring
    /// bug, surfaced distinctly from plain unavailability.
    ManifestMalformed {
        /// Slide index the fetch was issued for.
        slide: usize,
        /// What was wrong with the document.
        detail: String,
    },
    /// Playback of a line started.
    LineStarted {
        /// Zero-based line index within the manifest.
        line: usize,
        /// Speaker identifier for the line.
        speaker: String,
    },
    /// A line played through to its natural end.
    LineFinished {
        /// Zero-based line index within the manifest.
        line: usize,
    },
    /// A line's audio could not be obtained; a silent placeholder was
    /// substituted and the sequence continues.
    LineFallback {
        /// Zero-based line index within the manifest.
        line: usize,
        /// Why the placeholder was needed.
        reason: EnvelopeFallback,
    },
    /// The audio engine refused or aborted a line; the sequence advances as
    /// if the line had finished.
    LineFailed {
        /// Zero-based line index within the manifest.
        line: usize,
        /// Engine-reported failure message.
        message: String,
    },
    /// Playback was paused.
    Paused {
        /// Line index playback is parked on.
        line: usize,
    },
    /// Playback resumed from pause.
    Resumed {
        /// Line index playback resumed at.
        line: usize,
    },
    /// Playback was stopped before reaching the end.
    Stopped,
    /// Every line was attempted and the sequence finished.
    SequenceCompleted {
        /// How many lines were started (success or fallback alike).
        lines_attempted: usize,
    },
    /// The host refused to start dialogue audio without a user gesture.
    AutoplayBlocked {
        /// Host-reported refusal message.
        message: String,
    },
}

impl DialogueEvent {
    fn description(&self) -> &str {
        match self {
            DialogueEvent::ManifestLoading { .. } => "Dialogue manifest loading",
            DialogueEvent::ManifestLoaded { .. } => "Dialogue manifest loaded",
            DialogueEvent::ManifestUnavailable { .. } => "No dialogue for slide",
            DialogueEvent::ManifestMalformed { .. } => "Dialogue manifest malformed",
            DialogueEvent::LineStarted { .. } => "Dialogue line started",
            DialogueEvent::LineFinished { .. } => "Dialogue line finished",
            DialogueEvent::LineFallback { .. } => "Dialogue line fell back to placeholder",
            DialogueEvent::LineFailed { .. } => "Dialogue line failed",
            DialogueEvent::Paused { .. } => "Dialogue paused",
            DialogueEvent::Resumed { .. } => "Dialogue resumed",
            DialogueEvent::Stopped => "Dialogue stopped",
            DialogueEvent::SequenceCompleted { .. } => "Dialogue sequence completed",
            DialogueEvent::AutoplayBlocked { .. } => "Dialogue autoplay blocked",
        }
    }
}

// ============================================================================
// Background Music Events
// ============================================================================

/// Events related to the looping background music channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum BackgroundEvent {
    /// The ambient track started looping.
    Started,
    /// The ambient track was stopped.
    Stopped,
    /// The host refused to start the ambient track (autoplay policy).
    StartBlocked {
        /// Host-reported refusal message.
        message: String,
    },
    /// Volume is fading down to make room for dialogue.
    Ducked {
        /// Volume snapshot taken before the duck.
        resting: f32,
        /// Volume the fade is heading to.
        target: f32,
    },
    /// Volume is fading back to its pre-duck level.
    Restored {
        /// Volume the fade is heading to.
        target: f32,
    },
    /// Volume was set directly.
    VolumeChanged {
        /// The new volume.
        volume: f32,
    },
    /// Global mute was toggled.
    MuteChanged {
        /// The new mute state.
        muted: bool,
    },
}

impl BackgroundEvent {
    fn description(&self) -> &str {
        match self {
            BackgroundEvent::Started => "Background music started",
            BackgroundEvent::Stopped => "Background music stopped",
            BackgroundEvent::StartBlocked { .. } => "Background music start blocked",
            BackgroundEvent::Ducked { .. } => "Background music ducked",
            BackgroundEvent::Restored { .. } => "Background music restored",
            BackgroundEvent::VolumeChanged { .. } => "Background volume changed",
            BackgroundEvent::MuteChanged { .. } => "Mute toggled",
        }
    }
}

// ============================================================================
// Sound Effect Events
// ============================================================================

/// Events related to fire-and-forget sound effects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum EffectEvent {
    /// An effect was played.
    Triggered {
        /// Effect name (e.g. "typing", "whoosh").
        effect: String,
    },
    /// A trigger landed inside the minimum inter-trigger window and was
    /// dropped, not queued.
    Throttled {
        /// Effect name.
        effect: String,
    },
    /// An effect was dropped for a non-throttle reason (muted, no clip).
    Skipped {
        /// Effect name.
        effect: String,
        /// Why the trigger was dropped.
        reason: String,
    },
}

impl EffectEvent {
    fn description(&self) -> &str {
        match self {
            EffectEvent::Triggered { .. } => "Sound effect triggered",
            EffectEvent::Throttled { .. } => "Sound effect throttled",
            EffectEvent::Skipped { .. } => "Sound effect skipped",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Uses `tokio::sync::broadcast` internally, which provides:
/// - Multiple producers (clone the `EventBus`)
/// - Multiple consumers (each `subscribe()` creates a new receiver)
/// - Non-blocking sends (events are cloned for each subscriber)
/// - Lagging detection (slow subscribers get `RecvError::Lagged`)
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum number of events to buffer per subscriber.
    ///   When a subscriber falls behind by more than this amount, it will
    ///   receive a `RecvError::Lagged` error.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Creates a new event bus with the default buffer size.
    #[allow(clippy::should_implement_trait)]
    pub fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event.
    /// Returns an error if there are no active subscribers.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber to receive events.
    ///
    /// Each call creates an independent receiver that will receive all future
    /// events. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

/// Type alias for event filter functions.
type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with additional filtering
/// capabilities.
///
/// # Example
///
/// ```rust
/// use core_runtime::events::{EventBus, EventStream, CoreEvent};
///
/// # #[tokio::main]
/// # async fn main() {
/// let event_bus = EventBus::new(100);
/// let stream = EventStream::new(event_bus.subscribe());
///
/// // Filter for dialogue events only
/// let mut dialogue_stream = stream.filter(|event| {
///     matches!(event, CoreEvent::Dialogue(_))
/// });
/// # }
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    /// Creates a new event stream from a receiver.
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Adds a filter function to this stream.
    ///
    /// Only events that match the filter will be returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Receives the next event that passes the filter (if any).
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n`
    /// events. Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;

            let Some(filter) = &self.filter else {
                return Ok(event);
            };

            if filter(&event) {
                return Ok(event);
            }

            // Event didn't match filter, continue to next event
        }
    }

    /// Attempts to receive an event without blocking.
    ///
    /// Returns `None` if no events are currently available.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    let Some(filter) = &self.filter else {
                        return Some(Ok(event));
                    };

                    if filter(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
