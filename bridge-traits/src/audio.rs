//! Audio channel bridge traits and supporting types.
//!
//! These abstractions let the presentation core drive host audio engines
//! without knowing anything about the underlying device. The core owns three
//! logical channels (narrated dialogue, looping background music, and short
//! sound effects), and each one is an independent [`AudioChannel`] handle
//! supplied by the host. Host applications provide concrete implementations
//! that satisfy their platform (a desktop audio stack, a browser runtime, a
//! silent test harness).

use crate::error::{BridgeError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Mutex;
use tokio::sync::watch;

/// Container format of an audio payload.
///
/// The core never decodes PCM; clips stay in their container format and the
/// host engine is responsible for actual decoding. Only the two formats the
/// narration pipeline produces are distinguished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioMime {
    Wav,
    Mp3,
}

impl AudioMime {
    /// The MIME string the host should associate with the payload.
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioMime::Wav => "audio/wav",
            AudioMime::Mp3 => "audio/mp3",
        }
    }
}

impl std::fmt::Display for AudioMime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A playable in-memory audio resource.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    /// Container format of `data`.
    pub mime: AudioMime,
    /// Encoded audio bytes (not PCM).
    pub data: Bytes,
}

impl AudioClip {
    /// Create a new clip from encoded bytes.
    pub fn new(mime: AudioMime, data: impl Into<Bytes>) -> Self {
        Self {
            mime,
            data: data.into(),
        }
    }

    /// Size of the encoded payload in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the clip carries no payload at all.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Options supplied when starting playback on a channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelStartOptions {
    /// Whether playback should loop automatically.
    pub looping: bool,
    /// Initial volume (0.0 = muted, 1.0 = unity gain).
    pub initial_volume: f32,
}

impl Default for ChannelStartOptions {
    fn default() -> Self {
        Self {
            looping: false,
            initial_volume: 1.0,
        }
    }
}

/// Why a playback session on a channel came to an end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// The clip played through to its natural end.
    Completed,
    /// Playback was stopped by an explicit `stop()` call.
    Stopped,
    /// The host engine gave up on the clip (decode error, device failure).
    Failed { message: String },
}

/// A single logical audio output routed to the host audio engine.
///
/// One clip plays per channel at a time; `start()` on an active channel
/// replaces the current session. Control methods are expected to be fast
/// and non-blocking; `wait_until_ended()` is the long-running observation
/// point a driver loop parks on.
///
/// # Host policy
///
/// `start()` may be refused by the host (e.g. an autoplay policy that
/// requires a user gesture first). Implementations signal this with
/// [`BridgeError::NotAllowed`]; callers treat it as a recoverable condition,
/// never a crash.
#[async_trait]
pub trait AudioChannel: Send + Sync {
    /// Begin playback of a clip, replacing any current session.
    async fn start(&self, clip: AudioClip, options: ChannelStartOptions) -> Result<()>;

    /// Pause playback without releasing the session.
    async fn pause(&self) -> Result<()>;

    /// Resume playback from the paused position.
    async fn resume(&self) -> Result<()>;

    /// Stop playback and release the session. The pending
    /// `wait_until_ended()` observers resolve with [`EndReason::Stopped`].
    async fn stop(&self) -> Result<()>;

    /// Adjust channel volume, normalized to `0.0..=1.0`.
    async fn set_volume(&self, volume: f32) -> Result<()>;

    /// Current channel volume.
    async fn volume(&self) -> Result<f32>;

    /// Returns `true` while a session is playing (not paused, not ended).
    async fn is_active(&self) -> Result<bool>;

    /// Wait for the current session to end and report why. Resolves
    /// immediately with [`EndReason::Stopped`] when no session exists.
    async fn wait_until_ended(&self) -> Result<EndReason>;
}

// ============================================================================
// ManualAudioChannel (reference implementation for tests and development)
// ============================================================================

struct ManualState {
    session: Option<watch::Sender<Option<EndReason>>>,
    paused: bool,
    looping: bool,
    volume: f32,
    start_refusal: Option<String>,
    started: Vec<AudioClip>,
    volume_log: Vec<f32>,
}

impl Default for ManualState {
    fn default() -> Self {
        Self {
            session: None,
            paused: false,
            looping: false,
            volume: 1.0,
            start_refusal: None,
            started: Vec::new(),
            volume_log: Vec::new(),
        }
    }
}

/// An [`AudioChannel`] with no audio device behind it.
///
/// Playback never ends on its own; the driver (a test, or a headless host)
/// decides when a clip "finishes" by calling [`finish_current`] or
/// [`fail_current`]. Everything the channel was asked to do is recorded so
/// assertions can inspect it.
///
/// [`finish_current`]: ManualAudioChannel::finish_current
/// [`fail_current`]: ManualAudioChannel::fail_current
#[derive(Default)]
pub struct ManualAudioChannel {
    state: Mutex<ManualState>,
}

impl ManualAudioChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `start()` call fail with [`BridgeError::NotAllowed`],
    /// simulating a host autoplay policy refusal.
    pub fn refuse_next_start(&self, reason: impl Into<String>) {
        self.state.lock().unwrap().start_refusal = Some(reason.into());
    }

    /// End the current session as if the clip played to completion.
    pub fn finish_current(&self) {
        self.end_session(EndReason::Completed);
    }

    /// End the current session as if the host engine failed mid-clip.
    pub fn fail_current(&self, message: impl Into<String>) {
        self.end_session(EndReason::Failed {
            message: message.into(),
        });
    }

    /// Every clip that was started on this channel, in order.
    pub fn started_clips(&self) -> Vec<AudioClip> {
        self.state.lock().unwrap().started.clone()
    }

    /// Every volume value that was applied, in order.
    pub fn volume_log(&self) -> Vec<f32> {
        self.state.lock().unwrap().volume_log.clone()
    }

    /// Whether the current session is paused.
    pub fn is_paused(&self) -> bool {
        self.state.lock().unwrap().paused
    }

    /// Whether the current session was started with looping enabled.
    pub fn is_looping(&self) -> bool {
        self.state.lock().unwrap().looping
    }

    fn end_session(&self, reason: EndReason) {
        let mut state = self.state.lock().unwrap();
        if let Some(session) = &state.session {
            session.send_replace(Some(reason));
        }
        state.paused = false;
    }
}

#[async_trait]
impl AudioChannel for ManualAudioChannel {
    async fn start(&self, clip: AudioClip, options: ChannelStartOptions) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(reason) = state.start_refusal.take() {
            return Err(BridgeError::NotAllowed(reason));
        }

        // Replace any current session; late observers of the old one see Stopped.
        if let Some(old) = state.session.take() {
            old.send_replace(Some(EndReason::Stopped));
        }

        let (tx, _rx) = watch::channel(None);
        state.session = Some(tx);
        state.paused = false;
        state.looping = options.looping;
        state.volume = options.initial_volume;
        state.started.push(clip);
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        self.state.lock().unwrap().paused = true;
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        self.state.lock().unwrap().paused = false;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.end_session(EndReason::Stopped);
        Ok(())
    }

    async fn set_volume(&self, volume: f32) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.volume = volume;
        state.volume_log.push(volume);
        Ok(())
    }

    async fn volume(&self) -> Result<f32> {
        Ok(self.state.lock().unwrap().volume)
    }

    async fn is_active(&self) -> Result<bool> {
        let state = self.state.lock().unwrap();
        let live = state
            .session
            .as_ref()
            .is_some_and(|s| s.borrow().is_none());
        Ok(live && !state.paused)
    }

    async fn wait_until_ended(&self) -> Result<EndReason> {
        let rx = {
            let state = self.state.lock().unwrap();
            match &state.session {
                Some(session) => session.subscribe(),
                None => return Ok(EndReason::Stopped),
            }
        };

        let mut rx = rx;
        let ended = rx
            .wait_for(|end| end.is_some())
            .await
            .map_err(|_| BridgeError::OperationFailed("audio session dropped".to_string()))?;
        Ok(ended.clone().expect("guarded by wait_for"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip() -> AudioClip {
        AudioClip::new(AudioMime::Wav, vec![0u8; 4])
    }

    #[test]
    fn mime_strings() {
        assert_eq!(AudioMime::Wav.as_str(), "audio/wav");
        assert_eq!(AudioMime::Mp3.as_str(), "audio/mp3");
    }

    #[tokio::test]
    async fn manual_channel_records_start() {
        let channel = ManualAudioChannel::new();
        channel
            .start(
                clip(),
                ChannelStartOptions {
                    looping: true,
                    initial_volume: 0.5,
                },
            )
            .await
            .unwrap();

        assert!(channel.is_active().await.unwrap());
        assert!(channel.is_looping());
        assert_eq!(channel.volume().await.unwrap(), 0.5);
        assert_eq!(channel.started_clips().len(), 1);
    }

    #[tokio::test]
    async fn manual_channel_finish_resolves_waiters() {
        let channel = std::sync::Arc::new(ManualAudioChannel::new());
        channel
            .start(clip(), ChannelStartOptions::default())
            .await
            .unwrap();

        let waiter = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.wait_until_ended().await })
        };
        tokio::task::yield_now().await;
        channel.finish_current();

        assert_eq!(waiter.await.unwrap().unwrap(), EndReason::Completed);
    }

    #[tokio::test]
    async fn manual_channel_stop_reports_stopped() {
        let channel = ManualAudioChannel::new();
        channel
            .start(clip(), ChannelStartOptions::default())
            .await
            .unwrap();
        channel.stop().await.unwrap();

        assert_eq!(
            channel.wait_until_ended().await.unwrap(),
            EndReason::Stopped
        );
        assert!(!channel.is_active().await.unwrap());
    }

    #[tokio::test]
    async fn manual_channel_wait_without_session() {
        let channel = ManualAudioChannel::new();
        assert_eq!(
            channel.wait_until_ended().await.unwrap(),
            EndReason::Stopped
        );
    }

    #[tokio::test]
    async fn manual_channel_refusal_is_policy_error() {
        let channel = ManualAudioChannel::new();
        channel.refuse_next_start("needs user gesture");

        let err = channel
            .start(clip(), ChannelStartOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_policy_refusal());

        // The refusal is one-shot.
        channel
            .start(clip(), ChannelStartOptions::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn manual_channel_pause_suspends_activity() {
        let channel = ManualAudioChannel::new();
        channel
            .start(clip(), ChannelStartOptions::default())
            .await
            .unwrap();

        channel.pause().await.unwrap();
        assert!(channel.is_paused());
        assert!(!channel.is_active().await.unwrap());

        channel.resume().await.unwrap();
        assert!(channel.is_active().await.unwrap());
    }
}
