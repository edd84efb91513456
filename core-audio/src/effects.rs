//! # Sound Effect Trigger Layer
//!
//! Fire-and-forget short effect sounds used by slide animations. Best
//! effort by design: a trigger that cannot play (muted, throttled, missing
//! clip, host refusal) is dropped silently and reported only as a
//! diagnostic event.

use bridge_traits::audio::{AudioChannel, AudioClip, ChannelStartOptions};
use core_runtime::config::EffectsConfig;
use core_runtime::events::{CoreEvent, EffectEvent, EventBus};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::background::GlobalMute;

/// The short effect sounds the deck's animations can trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SoundEffect {
    Typing,
    Whoosh,
    Pop,
    Success,
}

impl SoundEffect {
    /// Stable name used in events and logs.
    pub fn name(&self) -> &'static str {
        match self {
            SoundEffect::Typing => "typing",
            SoundEffect::Whoosh => "whoosh",
            SoundEffect::Pop => "pop",
            SoundEffect::Success => "success",
        }
    }
}

/// The effect clips available to a deck, keyed by effect.
#[derive(Default, Clone)]
pub struct EffectLibrary {
    clips: HashMap<SoundEffect, AudioClip>,
}

impl EffectLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a clip for an effect, replacing any previous one.
    pub fn with_clip(mut self, effect: SoundEffect, clip: AudioClip) -> Self {
        self.clips.insert(effect, clip);
        self
    }

    /// Look up the clip for an effect.
    pub fn clip(&self, effect: SoundEffect) -> Option<&AudioClip> {
        self.clips.get(&effect)
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }
}

struct EffectsInner {
    channel: Arc<dyn AudioChannel>,
    library: EffectLibrary,
    config: EffectsConfig,
    events: EventBus,
    mute: GlobalMute,
    last_fired: Mutex<HashMap<SoundEffect, Instant>>,
}

/// Fire-and-forget sound effect player.
///
/// Triggers are synchronous from the caller's point of view; playback is
/// spawned and never awaited. Effects that might fire on every animation
/// frame are rate-limited per effect: triggers inside the minimum interval
/// window are dropped, not queued.
#[derive(Clone)]
pub struct SoundEffectPlayer {
    inner: Arc<EffectsInner>,
}

impl SoundEffectPlayer {
    pub fn new(
        channel: Arc<dyn AudioChannel>,
        library: EffectLibrary,
        config: EffectsConfig,
        events: EventBus,
        mute: GlobalMute,
    ) -> Self {
        if library.is_empty() {
            warn!("Effect library is empty; all triggers will be dropped");
        }

        Self {
            inner: Arc::new(EffectsInner {
                channel,
                library,
                config,
                events,
                mute,
                last_fired: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Trigger an effect. Never blocks, never fails.
    pub fn trigger(&self, effect: SoundEffect) {
        let inner = &self.inner;

        if inner.mute.is_muted() {
            self.emit(EffectEvent::Skipped {
                effect: effect.name().to_string(),
                reason: "muted".to_string(),
            });
            return;
        }

        let Some(clip) = inner.library.clip(effect) else {
            debug!(effect = effect.name(), "No clip registered for effect");
            self.emit(EffectEvent::Skipped {
                effect: effect.name().to_string(),
                reason: "no clip registered".to_string(),
            });
            return;
        };

        // Rate limit: a trigger landing inside the window is dropped.
        {
            let mut last_fired = inner.last_fired.lock();
            let now = Instant::now();
            if let Some(previous) = last_fired.get(&effect) {
                if now.duration_since(*previous) < inner.config.min_trigger_interval {
                    self.emit(EffectEvent::Throttled {
                        effect: effect.name().to_string(),
                    });
                    return;
                }
            }
            last_fired.insert(effect, now);
        }

        let clip = clip.clone();
        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            if let Err(e) = inner
                .channel
                .start(clip, ChannelStartOptions::default())
                .await
            {
                // Best effort: a refused effect is a non-event for the user.
                debug!(error = %e, "Effect playback refused");
            }
        });

        self.emit(EffectEvent::Triggered {
            effect: effect.name().to_string(),
        });
    }

    fn emit(&self, event: EffectEvent) {
        self.inner.events.emit(CoreEvent::Effect(event)).ok();
    }
}
