//! Core service façade and slide-awareness orchestration.
//!
//! This crate wires host-provided bridge implementations (HTTP transport and
//! the three audio channels) into the slidecast core and owns the one piece
//! of logic that spans both halves: reacting to slide navigation. Desktop
//! shells typically enable the `desktop-shims` feature (which depends on
//! `bridge-desktop`) to get a real HTTP client; audio channels are always
//! injected by the host.
//!
//! ## Slide awareness
//!
//! Every slide-index change stops whatever was narrating, fetches (or
//! recalls from cache) the new slide's manifest, re-arms the sequencer, and
//! autoplays only on an explicit forward step. Each async continuation
//! carries the focus generation it was issued under and is discarded when a
//! newer navigation has happened in the meantime, so a slow manifest fetch
//! for slide A can never mutate state after slide B became current.

pub mod error;

pub use error::{Result, ServiceError};

use bridge_traits::audio::{AudioChannel, AudioClip};
use bridge_traits::http::HttpClient;
use core_audio::background::{BackgroundAudioCoordinator, BackgroundAudioState, GlobalMute};
use core_audio::effects::{EffectLibrary, SoundEffect, SoundEffectPlayer};
use core_dialogue::envelope::EnvelopeDecoder;
use core_dialogue::manifest::{DialogueManifest, ManifestFetch, ManifestLoader};
use core_dialogue::policy::{autoplay_permitted, NavigationReason};
use core_dialogue::sequencer::{LineSequencer, PlayTrigger, PlaybackSnapshot};
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, EventBus, Receiver};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

#[cfg(feature = "desktop-shims")]
pub use bridge_desktop::ReqwestHttpClient;

// ============================================================================
// Dependencies
// ============================================================================

/// The three logical audio outputs the core drives.
#[derive(Clone)]
pub struct ServiceChannels {
    /// Narrated dialogue lines.
    pub dialogue: Arc<dyn AudioChannel>,
    /// Looping ambient music.
    pub background: Arc<dyn AudioChannel>,
    /// Short fire-and-forget effects.
    pub effects: Arc<dyn AudioChannel>,
}

/// Aggregated handle to all bridge dependencies the core requires.
pub struct ServiceDependencies {
    pub http_client: Arc<dyn HttpClient>,
    pub channels: ServiceChannels,
    pub effect_library: EffectLibrary,
}

impl ServiceDependencies {
    /// Construct a dependency bundle from explicit bridge handles.
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        channels: ServiceChannels,
        effect_library: EffectLibrary,
    ) -> Self {
        Self {
            http_client,
            channels,
            effect_library,
        }
    }
}

// ============================================================================
// Service
// ============================================================================

struct SlideFocus {
    /// Bumped on every accepted slide change; async continuations compare
    /// their captured generation before touching state.
    generation: u64,
    current: Option<usize>,
    /// Manifest cache keyed by slide number. `None` records a slide known
    /// to have no dialogue, so skimming back and forth does not refetch.
    cache: HashMap<usize, Option<Arc<DialogueManifest>>>,
}

struct ServiceInner {
    events: EventBus,
    loader: ManifestLoader,
    sequencer: LineSequencer,
    background: BackgroundAudioCoordinator,
    effects: SoundEffectPlayer,
    focus: Mutex<SlideFocus>,
}

/// Primary façade exposed to host applications.
///
/// Explicitly constructed and explicitly disposed; there is no process-wide
/// audio state behind it. Clone handles share the same core.
#[derive(Clone)]
pub struct PresentationService {
    inner: Arc<ServiceInner>,
}

impl PresentationService {
    /// Create a new service from configuration and bridge dependencies.
    ///
    /// # Errors
    ///
    /// Fails fast when the configuration is invalid.
    pub fn new(config: CoreConfig, deps: ServiceDependencies) -> Result<Self> {
        config.validate()?;

        let events = EventBus::new(config.event_buffer);
        let mute = GlobalMute::new();

        let loader = ManifestLoader::new(
            deps.http_client.clone(),
            config.dialogue.clone(),
            events.clone(),
        );
        let decoder = EnvelopeDecoder::new(
            deps.http_client.clone(),
            config.dialogue.clone(),
            events.clone(),
        );
        let background = BackgroundAudioCoordinator::new(
            deps.channels.background,
            config.background.clone(),
            events.clone(),
            mute.clone(),
        );
        let sequencer = LineSequencer::new(
            deps.channels.dialogue,
            decoder,
            Arc::new(background.clone()),
            events.clone(),
        );
        let effects = SoundEffectPlayer::new(
            deps.channels.effects,
            deps.effect_library,
            config.effects.clone(),
            events.clone(),
            mute.clone(),
        );

        Ok(Self {
            inner: Arc::new(ServiceInner {
                events,
                loader,
                sequencer,
                background,
                effects,
                focus: Mutex::new(SlideFocus {
                    generation: 0,
                    current: None,
                    cache: HashMap::new(),
                }),
            }),
        })
    }

    /// Bring the core up, optionally starting the ambient track.
    ///
    /// A host autoplay refusal for the ambient track is absorbed and
    /// reported as an event; the deck works without music.
    pub async fn init(&self, ambient: Option<AudioClip>) -> Result<()> {
        info!("Presentation core starting");
        if let Some(clip) = ambient {
            self.inner.background.play(clip).await?;
        }
        Ok(())
    }

    /// Tear the core down: stop narration and music.
    pub async fn dispose(&self) -> Result<()> {
        info!("Presentation core shutting down");
        self.inner.sequencer.stop().await?;
        self.inner.background.stop().await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Slide awareness
    // ------------------------------------------------------------------

    /// React to the deck landing on a slide.
    ///
    /// Always (re)loads the slide's manifest (from cache when warm) and
    /// autoplays only when `reason` is an explicit forward step and the
    /// manifest has content. A repeated call with the unchanged index is a
    /// re-render, not a navigation, and does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Dialogue`] for a malformed manifest (the UI
    /// shows its neutral error state); plain absence is not an error.
    pub async fn handle_slide_change(
        &self,
        slide: usize,
        reason: NavigationReason,
    ) -> Result<()> {
        let generation = {
            let mut focus = self.inner.focus.lock();
            if focus.current == Some(slide) {
                debug!(slide, "Slide index unchanged, ignoring");
                return Ok(());
            }
            focus.current = Some(slide);
            focus.generation += 1;
            focus.generation
        };

        debug!(slide, ?reason, "Slide changed");

        // No audio from the previous slide may continue into this one.
        self.inner.sequencer.stop().await?;

        let cached = self.inner.focus.lock().cache.get(&slide).cloned();
        let manifest = match cached {
            Some(entry) => entry,
            None => {
                let fetched = self.inner.loader.load(slide).await;

                let mut focus = self.inner.focus.lock();
                if focus.generation != generation {
                    debug!(slide, "Stale manifest result discarded");
                    return Ok(());
                }

                match fetched {
                    Ok(ManifestFetch::Loaded(manifest)) => {
                        let manifest = Arc::new(manifest);
                        focus.cache.insert(slide, Some(manifest.clone()));
                        Some(manifest)
                    }
                    Ok(ManifestFetch::NotAvailable) => {
                        focus.cache.insert(slide, None);
                        None
                    }
                    Err(e) => {
                        drop(focus);
                        return Err(e.into());
                    }
                }
            }
        };

        let Some(manifest) = manifest else {
            self.inner.sequencer.disarm().await?;
            return Ok(());
        };

        if self.inner.focus.lock().generation != generation {
            debug!(slide, "Navigation superseded before arming");
            return Ok(());
        }
        self.inner.sequencer.arm((*manifest).clone()).await?;

        if autoplay_permitted(reason, manifest.len(), false) {
            if self.inner.focus.lock().generation != generation {
                return Ok(());
            }
            self.inner.sequencer.play(PlayTrigger::Autoplay).await?;
        }

        Ok(())
    }

    /// The slide the core currently considers active.
    pub fn current_slide(&self) -> Option<usize> {
        self.inner.focus.lock().current
    }

    // ------------------------------------------------------------------
    // Dialogue controls
    // ------------------------------------------------------------------

    pub async fn play_dialogue(&self) -> Result<()> {
        Ok(self.inner.sequencer.play(PlayTrigger::Manual).await?)
    }

    pub async fn pause_dialogue(&self) -> Result<()> {
        Ok(self.inner.sequencer.pause().await?)
    }

    pub async fn stop_dialogue(&self) -> Result<()> {
        Ok(self.inner.sequencer.stop().await?)
    }

    pub async fn toggle_dialogue(&self) -> Result<()> {
        Ok(self.inner.sequencer.toggle().await?)
    }

    /// Current playback state for UI binding.
    pub fn dialogue_snapshot(&self) -> PlaybackSnapshot {
        self.inner.sequencer.snapshot()
    }

    // ------------------------------------------------------------------
    // Background music and effects
    // ------------------------------------------------------------------

    pub async fn set_background_volume(&self, volume: f32) -> Result<()> {
        Ok(self.inner.background.set_volume(volume).await?)
    }

    pub async fn toggle_mute(&self) -> Result<bool> {
        Ok(self.inner.background.toggle_mute().await?)
    }

    pub fn background_state(&self) -> BackgroundAudioState {
        self.inner.background.state()
    }

    /// Fire-and-forget sound effect.
    pub fn trigger_effect(&self, effect: SoundEffect) {
        self.inner.effects.trigger(effect);
    }

    // ------------------------------------------------------------------
    // Observability
    // ------------------------------------------------------------------

    /// Subscribe to the core's event stream.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.inner.events.subscribe()
    }
}
