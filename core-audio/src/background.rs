//! # Background Audio Coordinator
//!
//! Manages the looping ambient-music channel and its volume choreography.
//! While narration plays, the music is "ducked" (faded down to a fraction
//! of its resting volume) and restored when narration stops. Fades are
//! stepped linear interpolations rather than hard cuts, and every fade
//! carries a generation number so a newer fade, mute, or direct volume write
//! supersedes an older fade mid-flight instead of fighting it.

use crate::error::{AudioError, Result};
use async_trait::async_trait;
use bridge_traits::audio::{AudioChannel, AudioClip, ChannelStartOptions};
use core_runtime::config::BackgroundConfig;
use core_runtime::events::{BackgroundEvent, CoreEvent, EventBus};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

// ============================================================================
// Ducking protocol
// ============================================================================

/// The protocol the dialogue sequencer uses to talk to background music.
///
/// This is deliberately the entire coupling surface between the two audio
/// domains: the sequencer never sees background volume state, and the
/// coordinator never sees playback state.
#[async_trait]
pub trait BackgroundDucking: Send + Sync {
    /// Fade the background channel down for narration.
    async fn duck(&self);

    /// Fade the background channel back to its pre-duck level.
    async fn restore(&self);
}

// ============================================================================
// Global mute
// ============================================================================

/// Process-wide mute flag shared by background music and sound effects.
#[derive(Clone, Default)]
pub struct GlobalMute {
    muted: Arc<AtomicBool>,
}

impl GlobalMute {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn set(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    /// Flip the flag and return the new state.
    pub fn toggle(&self) -> bool {
        !self.muted.fetch_xor(true, Ordering::Relaxed)
    }
}

// ============================================================================
// Coordinator
// ============================================================================

/// Observable state of the background channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackgroundAudioState {
    /// Current (logical) volume, tracked even while muted.
    pub volume: f32,
    /// Volume snapshot taken when the last duck began.
    pub pre_duck_volume: f32,
    /// Whether global mute is active.
    pub muted: bool,
}

struct Levels {
    volume: f32,
    pre_duck_volume: f32,
    ducked: bool,
}

struct CoordinatorInner {
    channel: Arc<dyn AudioChannel>,
    config: BackgroundConfig,
    events: EventBus,
    mute: GlobalMute,
    levels: Mutex<Levels>,
    // Bumped by every fade, mute, or direct volume write; a fade task that
    // observes a newer generation abandons its remaining steps.
    fade_epoch: AtomicU64,
}

/// Coordinates the looping background-music channel.
///
/// Explicitly constructed and injected; there is no ambient audio singleton.
/// Clone handles share the same channel and state.
#[derive(Clone)]
pub struct BackgroundAudioCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl BackgroundAudioCoordinator {
    pub fn new(
        channel: Arc<dyn AudioChannel>,
        config: BackgroundConfig,
        events: EventBus,
        mute: GlobalMute,
    ) -> Self {
        let initial = config.initial_volume;
        Self {
            inner: Arc::new(CoordinatorInner {
                channel,
                config,
                events,
                mute,
                levels: Mutex::new(Levels {
                    volume: initial,
                    pre_duck_volume: initial,
                    ducked: false,
                }),
                fade_epoch: AtomicU64::new(0),
            }),
        }
    }

    /// Observable background state.
    pub fn state(&self) -> BackgroundAudioState {
        let levels = self.inner.levels.lock();
        BackgroundAudioState {
            volume: levels.volume,
            pre_duck_volume: levels.pre_duck_volume,
            muted: self.inner.mute.is_muted(),
        }
    }

    /// Start looping the ambient track.
    ///
    /// A host autoplay refusal is logged and reported as an event; the show
    /// goes on without music until a user gesture arrives.
    pub async fn play(&self, clip: AudioClip) -> Result<()> {
        let volume = if self.inner.mute.is_muted() {
            0.0
        } else {
            self.inner.levels.lock().volume
        };

        let options = ChannelStartOptions {
            looping: true,
            initial_volume: volume,
        };

        match self.inner.channel.start(clip, options).await {
            Ok(()) => {
                info!("Background music started");
                self.emit(BackgroundEvent::Started);
                Ok(())
            }
            Err(e) if e.is_policy_refusal() => {
                warn!(error = %e, "Background music start refused by host");
                self.emit(BackgroundEvent::StartBlocked {
                    message: e.to_string(),
                });
                Ok(())
            }
            Err(e) => Err(AudioError::Channel(e)),
        }
    }

    /// Stop the ambient track and cancel any in-flight fade.
    pub async fn stop(&self) -> Result<()> {
        self.inner.fade_epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.channel.stop().await?;
        info!("Background music stopped");
        self.emit(BackgroundEvent::Stopped);
        Ok(())
    }

    /// Set the background volume directly, cancelling any fade in flight.
    pub async fn set_volume(&self, volume: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&volume) {
            return Err(AudioError::InvalidVolume(volume));
        }

        self.inner.fade_epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.levels.lock().volume = volume;

        if !self.inner.mute.is_muted() {
            self.inner.channel.set_volume(volume).await?;
        }

        self.emit(BackgroundEvent::VolumeChanged { volume });
        Ok(())
    }

    /// Toggle global mute.
    ///
    /// Muting cancels any in-flight fade and forces the channel to zero; the
    /// logical volume is kept so unmuting picks up where the mix left off.
    pub async fn toggle_mute(&self) -> Result<bool> {
        self.inner.fade_epoch.fetch_add(1, Ordering::SeqCst);
        let muted = self.inner.mute.toggle();

        let target = if muted {
            0.0
        } else {
            self.inner.levels.lock().volume
        };
        self.inner.channel.set_volume(target).await?;

        self.emit(BackgroundEvent::MuteChanged { muted });
        Ok(muted)
    }

    fn emit(&self, event: BackgroundEvent) {
        self.inner.events.emit(CoreEvent::Background(event)).ok();
    }

    fn spawn_fade(&self, target: f32, duration: Duration) {
        let inner = Arc::clone(&self.inner);
        let epoch = inner.fade_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let start = inner.levels.lock().volume;
        let steps = inner.config.fade_steps;
        let step_delay = duration / steps;

        tokio::spawn(async move {
            for step in 1..=steps {
                tokio::time::sleep(step_delay).await;

                // A newer fade, mute, or direct write owns the channel now.
                if inner.fade_epoch.load(Ordering::SeqCst) != epoch {
                    debug!(step, "Fade superseded, abandoning");
                    return;
                }

                let t = step as f32 / steps as f32;
                let volume = start + (target - start) * t;
                inner.levels.lock().volume = volume;

                if !inner.mute.is_muted() {
                    if let Err(e) = inner.channel.set_volume(volume).await {
                        debug!(error = %e, "Fade step failed");
                        return;
                    }
                }
            }
        });
    }
}

#[async_trait]
impl BackgroundDucking for BackgroundAudioCoordinator {
    async fn duck(&self) {
        let (resting, target) = {
            let mut levels = self.inner.levels.lock();
            // A duck during a duck keeps the original snapshot; otherwise a
            // half-faded volume would become the "resting" level.
            if !levels.ducked {
                levels.pre_duck_volume = levels.volume;
                levels.ducked = true;
            }
            (
                levels.pre_duck_volume,
                levels.pre_duck_volume * self.inner.config.duck_fraction,
            )
        };

        debug!(resting, target, "Ducking background music");
        self.emit(BackgroundEvent::Ducked { resting, target });
        self.spawn_fade(target, self.inner.config.duck_duration);
    }

    async fn restore(&self) {
        let target = {
            let mut levels = self.inner.levels.lock();
            levels.ducked = false;
            levels.pre_duck_volume
        };

        debug!(target, "Restoring background music");
        self.emit(BackgroundEvent::Restored { target });
        self.spawn_fade(target, self.inner.config.restore_duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::audio::ManualAudioChannel;

    fn coordinator(
        config: BackgroundConfig,
    ) -> (BackgroundAudioCoordinator, Arc<ManualAudioChannel>) {
        let channel = Arc::new(ManualAudioChannel::new());
        let coordinator = BackgroundAudioCoordinator::new(
            channel.clone(),
            config,
            EventBus::new(16),
            GlobalMute::new(),
        );
        (coordinator, channel)
    }

    fn settle() -> Duration {
        // Longer than any configured fade; tokio auto-advance makes this
        // instant in paused-clock tests.
        Duration::from_secs(2)
    }

    #[tokio::test(start_paused = true)]
    async fn duck_reaches_fraction_of_resting_volume() {
        let (coordinator, _channel) = coordinator(BackgroundConfig::default());

        coordinator.duck().await;
        tokio::time::sleep(settle()).await;

        let state = coordinator.state();
        assert!((state.volume - 0.6 * 0.15).abs() < 1e-4);
        assert!((state.pre_duck_volume - 0.6).abs() < 1e-4);
    }

    #[tokio::test(start_paused = true)]
    async fn restore_returns_to_pre_duck_volume() {
        let (coordinator, _channel) = coordinator(BackgroundConfig::default());

        coordinator.duck().await;
        tokio::time::sleep(settle()).await;
        coordinator.restore().await;
        tokio::time::sleep(settle()).await;

        assert!((coordinator.state().volume - 0.6).abs() < 1e-4);
    }

    #[tokio::test(start_paused = true)]
    async fn restore_mid_duck_wins() {
        let (coordinator, _channel) = coordinator(BackgroundConfig::default());

        coordinator.duck().await;
        tokio::time::sleep(settle()).await;
        coordinator.restore().await;
        tokio::time::sleep(settle()).await;

        // Second duck, interrupted halfway through its fade.
        coordinator.duck().await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        coordinator.restore().await;
        tokio::time::sleep(settle()).await;

        // Last request wins: no stuck intermediate volume.
        assert!((coordinator.state().volume - 0.6).abs() < 1e-4);
    }

    #[tokio::test(start_paused = true)]
    async fn duck_during_duck_keeps_original_snapshot() {
        let (coordinator, _channel) = coordinator(BackgroundConfig::default());

        coordinator.duck().await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        coordinator.duck().await;
        tokio::time::sleep(settle()).await;

        assert!((coordinator.state().pre_duck_volume - 0.6).abs() < 1e-4);

        coordinator.restore().await;
        tokio::time::sleep(settle()).await;
        assert!((coordinator.state().volume - 0.6).abs() < 1e-4);
    }

    #[tokio::test(start_paused = true)]
    async fn mute_cancels_fade_and_forces_zero() {
        let (coordinator, channel) = coordinator(BackgroundConfig::default());

        coordinator.duck().await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let muted = coordinator.toggle_mute().await.unwrap();
        assert!(muted);
        assert_eq!(channel.volume().await.unwrap(), 0.0);

        // No orphaned fade step may write over the forced zero.
        tokio::time::sleep(settle()).await;
        assert_eq!(channel.volume().await.unwrap(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn unmute_reapplies_logical_volume() {
        let (coordinator, channel) = coordinator(BackgroundConfig::default());

        coordinator.toggle_mute().await.unwrap();
        coordinator.set_volume(0.4).await.unwrap();
        // While muted the channel stays silent.
        assert_eq!(channel.volume().await.unwrap(), 0.0);

        let muted = coordinator.toggle_mute().await.unwrap();
        assert!(!muted);
        assert!((channel.volume().await.unwrap() - 0.4).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn set_volume_rejects_out_of_range() {
        let (coordinator, _channel) = coordinator(BackgroundConfig::default());
        assert!(matches!(
            coordinator.set_volume(1.2).await,
            Err(AudioError::InvalidVolume(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn play_starts_looping_at_current_volume() {
        let (coordinator, channel) = coordinator(BackgroundConfig::default());
        coordinator
            .play(crate::clip::silent_clip())
            .await
            .unwrap();

        assert!(channel.is_looping());
        assert!((channel.volume().await.unwrap() - 0.6).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn play_refusal_is_not_an_error() {
        let (coordinator, channel) = coordinator(BackgroundConfig::default());
        channel.refuse_next_start("gesture required");

        // Refusal must resolve Ok; the event stream carries the diagnosis.
        assert!(coordinator.play(crate::clip::silent_clip()).await.is_ok());
        assert!(channel.started_clips().is_empty());
    }
}
