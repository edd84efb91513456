//! # Line Sequencer
//!
//! The playback state machine driving one slide's narration: lines play one
//! at a time, advance automatically on completion *or* failure, and the
//! background music is ducked for exactly as long as the sequence runs.
//!
//! ```text
//!            play()                    line ends / errors
//!   Idle ──────────────> Playing(0) ──────────────────────> Playing(i+1)
//!     ▲                     │  ▲                                  │
//!     │   stop()            │  │ resume()                         │ last line
//!     ├─────────────────────┤  │                                  ▼
//!     │                     ▼  │                              Completed
//!     │                  Paused(i)                          (implies Idle)
//! ```
//!
//! ## Ordering rules
//!
//! Every run carries a generation number and a cancellation token. Stopping,
//! re-arming, or starting a newer run invalidates the old generation, so a
//! late continuation from a superseded run observes the mismatch and does
//! nothing. Audio from a previous slide can never leak into a new one.
//! At most one line is in flight per sequencer at any time.

use crate::envelope::EnvelopeDecoder;
use crate::error::Result;
use crate::manifest::DialogueManifest;
use bridge_traits::audio::{AudioChannel, ChannelStartOptions, EndReason};
use core_audio::background::BackgroundDucking;
use core_runtime::events::{CoreEvent, DialogueEvent, EventBus};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// ============================================================================
// State Types
// ============================================================================

/// Playback lifecycle phase. `Completed` implies idle: no current line, no
/// active audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackPhase {
    Idle,
    Playing(usize),
    Paused(usize),
    Completed,
}

/// Point-in-time view of the sequencer, the single source of truth for
/// "what is playing right now".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackSnapshot {
    pub phase: PlaybackPhase,
    /// Line index playback is on, `None` when idle or completed.
    pub current_line: Option<usize>,
    pub is_playing: bool,
    pub is_paused: bool,
    /// Whether autoplay has been attempted for the armed manifest.
    pub has_auto_played: bool,
    pub completed: bool,
}

/// How a playback run was initiated. Autoplay runs are subject to the
/// one-attempt-per-manifest guard and back off entirely when the host
/// refuses to start audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayTrigger {
    Manual,
    Autoplay,
}

struct SequencerState {
    manifest: Option<Arc<DialogueManifest>>,
    phase: PlaybackPhase,
    has_auto_played: bool,
    cancel: Option<CancellationToken>,
}

struct SequencerInner {
    channel: Arc<dyn AudioChannel>,
    decoder: EnvelopeDecoder,
    ducking: Arc<dyn BackgroundDucking>,
    events: EventBus,
    state: Mutex<SequencerState>,
    // Bumped whenever a run is superseded; continuations compare before
    // touching state.
    run_epoch: AtomicU64,
}

enum PlayAction {
    Start {
        manifest: Arc<DialogueManifest>,
        epoch: u64,
        cancel: CancellationToken,
    },
    Resume,
    TriviallyComplete,
    Nothing,
}

// ============================================================================
// Sequencer
// ============================================================================

/// Drives ordered playback of one manifest's dialogue lines.
///
/// Clone handles share the same state; there is exactly one sequencer
/// implementation and one state-ownership model.
#[derive(Clone)]
pub struct LineSequencer {
    inner: Arc<SequencerInner>,
}

impl LineSequencer {
    pub fn new(
        channel: Arc<dyn AudioChannel>,
        decoder: EnvelopeDecoder,
        ducking: Arc<dyn BackgroundDucking>,
        events: EventBus,
    ) -> Self {
        Self {
            inner: Arc::new(SequencerInner {
                channel,
                decoder,
                ducking,
                events,
                state: Mutex::new(SequencerState {
                    manifest: None,
                    phase: PlaybackPhase::Idle,
                    has_auto_played: false,
                    cancel: None,
                }),
                run_epoch: AtomicU64::new(0),
            }),
        }
    }

    /// Current playback state.
    pub fn snapshot(&self) -> PlaybackSnapshot {
        let state = self.inner.state.lock();
        let (current_line, is_playing, is_paused) = match state.phase {
            PlaybackPhase::Playing(line) => (Some(line), true, false),
            PlaybackPhase::Paused(line) => (Some(line), false, true),
            PlaybackPhase::Idle | PlaybackPhase::Completed => (None, false, false),
        };

        PlaybackSnapshot {
            phase: state.phase,
            current_line,
            is_playing,
            is_paused,
            has_auto_played: state.has_auto_played,
            completed: state.phase == PlaybackPhase::Completed,
        }
    }

    /// Swap in a new manifest, stopping any run in progress first.
    ///
    /// The old run's audio is stopped synchronously before the new manifest
    /// becomes observable; the autoplay guard resets because this is a new
    /// manifest load.
    pub async fn arm(&self, manifest: DialogueManifest) -> Result<()> {
        self.halt().await?;

        let mut state = self.inner.state.lock();
        state.manifest = Some(Arc::new(manifest));
        state.phase = PlaybackPhase::Idle;
        state.has_auto_played = false;
        Ok(())
    }

    /// Drop the armed manifest entirely (slide without dialogue).
    pub async fn disarm(&self) -> Result<()> {
        self.halt().await?;

        let mut state = self.inner.state.lock();
        state.manifest = None;
        state.phase = PlaybackPhase::Idle;
        state.has_auto_played = false;
        Ok(())
    }

    /// Start playback from the first line, or resume when paused.
    ///
    /// No-ops while a run is already playing: rapid repeated calls cannot
    /// start overlapping lines. An empty manifest completes immediately:
    /// zero lines is a trivially finished program.
    pub async fn play(&self, trigger: PlayTrigger) -> Result<()> {
        let action = {
            let mut state = self.inner.state.lock();

            match state.phase {
                PlaybackPhase::Playing(_) => PlayAction::Nothing,
                PlaybackPhase::Paused(_) => {
                    if trigger == PlayTrigger::Autoplay {
                        PlayAction::Nothing
                    } else {
                        PlayAction::Resume
                    }
                }
                PlaybackPhase::Idle | PlaybackPhase::Completed => {
                    if trigger == PlayTrigger::Autoplay && state.has_auto_played {
                        PlayAction::Nothing
                    } else if let Some(manifest) = state.manifest.clone() {
                        if trigger == PlayTrigger::Autoplay {
                            state.has_auto_played = true;
                        }

                        if manifest.is_empty() {
                            state.phase = PlaybackPhase::Completed;
                            PlayAction::TriviallyComplete
                        } else {
                            let cancel = CancellationToken::new();
                            state.cancel = Some(cancel.clone());
                            state.phase = PlaybackPhase::Playing(0);
                            let epoch =
                                self.inner.run_epoch.fetch_add(1, Ordering::SeqCst) + 1;
                            PlayAction::Start {
                                manifest,
                                epoch,
                                cancel,
                            }
                        }
                    } else {
                        debug!("play() with no manifest armed");
                        PlayAction::Nothing
                    }
                }
            }
        };

        match action {
            PlayAction::Nothing => Ok(()),
            PlayAction::Resume => self.resume().await,
            PlayAction::TriviallyComplete => {
                self.emit(DialogueEvent::SequenceCompleted { lines_attempted: 0 });
                Ok(())
            }
            PlayAction::Start {
                manifest,
                epoch,
                cancel,
            } => {
                info!(lines = manifest.len(), "Dialogue playback starting");
                self.inner.ducking.duck().await;

                let inner = Arc::clone(&self.inner);
                tokio::spawn(async move {
                    run_lines(inner, manifest, epoch, cancel, trigger).await;
                });
                Ok(())
            }
        }
    }

    /// Pause the current line without advancing the index.
    pub async fn pause(&self) -> Result<()> {
        let line = {
            let mut state = self.inner.state.lock();
            match state.phase {
                PlaybackPhase::Playing(line) => {
                    state.phase = PlaybackPhase::Paused(line);
                    line
                }
                _ => return Ok(()),
            }
        };

        self.inner.channel.pause().await?;
        self.emit(DialogueEvent::Paused { line });
        Ok(())
    }

    /// Resume a paused line from where it left off.
    pub async fn resume(&self) -> Result<()> {
        let line = {
            let mut state = self.inner.state.lock();
            match state.phase {
                PlaybackPhase::Paused(line) => {
                    state.phase = PlaybackPhase::Playing(line);
                    line
                }
                _ => return Ok(()),
            }
        };

        self.inner.channel.resume().await?;
        self.emit(DialogueEvent::Resumed { line });
        Ok(())
    }

    /// Stop playback and reset to idle.
    ///
    /// Not a flag flip: the run token is cancelled and the audio channel is
    /// stopped synchronously, so no late callback can resurrect playback.
    pub async fn stop(&self) -> Result<()> {
        if self.halt().await? {
            self.emit(DialogueEvent::Stopped);
        }
        Ok(())
    }

    /// Convenience combinator: pause when playing, resume when paused,
    /// otherwise start from the top.
    pub async fn toggle(&self) -> Result<()> {
        let phase = self.inner.state.lock().phase;
        match phase {
            PlaybackPhase::Playing(_) => self.pause().await,
            PlaybackPhase::Paused(_) => self.resume().await,
            PlaybackPhase::Idle | PlaybackPhase::Completed => {
                self.play(PlayTrigger::Manual).await
            }
        }
    }

    /// Tear down the active run. Returns whether a run was interrupted.
    async fn halt(&self) -> Result<bool> {
        let (cancel, was_active) = {
            let mut state = self.inner.state.lock();
            let was_active = matches!(
                state.phase,
                PlaybackPhase::Playing(_) | PlaybackPhase::Paused(_)
            );
            state.phase = PlaybackPhase::Idle;
            (state.cancel.take(), was_active)
        };

        self.inner.run_epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(cancel) = cancel {
            cancel.cancel();
        }

        if was_active {
            self.inner.channel.stop().await?;
            self.inner.ducking.restore().await;
        }

        Ok(was_active)
    }

    fn emit(&self, event: DialogueEvent) {
        self.inner.events.emit(CoreEvent::Dialogue(event)).ok();
    }
}

// ============================================================================
// Run Loop
// ============================================================================

async fn run_lines(
    inner: Arc<SequencerInner>,
    manifest: Arc<DialogueManifest>,
    epoch: u64,
    cancel: CancellationToken,
    trigger: PlayTrigger,
) {
    let total = manifest.len();
    let mut attempted = 0usize;
    let mut index = 0usize;

    while index < total {
        if cancel.is_cancelled() {
            return;
        }

        let line = &manifest.lines[index];
        let playable = inner.decoder.decode(line).await;

        // The decode was an await point; a stop or slide switch may have
        // happened underneath us.
        if cancel.is_cancelled() || !inner.enter_line(epoch, index, &line.speaker) {
            return;
        }
        attempted += 1;

        match inner
            .channel
            .start(playable.clip, ChannelStartOptions::default())
            .await
        {
            Ok(()) => {
                // A stop that landed while start() was in flight already
                // stopped a previous session; make sure this one dies too.
                if cancel.is_cancelled() {
                    inner.channel.stop().await.ok();
                    return;
                }

                let ended = tokio::select! {
                    _ = cancel.cancelled() => return,
                    ended = inner.channel.wait_until_ended() => ended,
                };

                match ended {
                    Ok(EndReason::Completed) => {
                        inner.emit(DialogueEvent::LineFinished { line: index });
                    }
                    Ok(EndReason::Failed { message }) => {
                        // Advance exactly as if the line had finished.
                        warn!(line = index, %message, "Line playback failed, advancing");
                        inner.emit(DialogueEvent::LineFailed {
                            line: index,
                            message,
                        });
                    }
                    Ok(EndReason::Stopped) | Err(_) => {
                        // Stopped out from under us without our token being
                        // cancelled: reset rather than keep driving a dead
                        // channel.
                        if !cancel.is_cancelled() {
                            inner.abort_run(epoch).await;
                            inner.emit(DialogueEvent::Stopped);
                        }
                        return;
                    }
                }
            }
            Err(e) if e.is_policy_refusal() && trigger == PlayTrigger::Autoplay && index == 0 => {
                // The host wants a user gesture first. Back off to idle and
                // leave the manual play affordance to the UI.
                warn!(error = %e, "Autoplay refused by host");
                inner.emit(DialogueEvent::AutoplayBlocked {
                    message: e.to_string(),
                });
                inner.abort_run(epoch).await;
                return;
            }
            Err(e) => {
                warn!(line = index, error = %e, "Line start failed, advancing");
                inner.emit(DialogueEvent::LineFailed {
                    line: index,
                    message: e.to_string(),
                });
            }
        }

        index += 1;
    }

    inner.finish_run(epoch, attempted).await;
}

impl SequencerInner {
    /// Mark a line as current. Refuses when the run has been superseded.
    fn enter_line(&self, epoch: u64, index: usize, speaker: &str) -> bool {
        {
            let mut state = self.state.lock();
            if self.run_epoch.load(Ordering::SeqCst) != epoch {
                debug!(line = index, "Superseded run discarded before line start");
                return false;
            }
            state.phase = PlaybackPhase::Playing(index);
        }

        debug!(line = index, speaker, "Line starting");
        self.emit(DialogueEvent::LineStarted {
            line: index,
            speaker: speaker.to_string(),
        });
        true
    }

    /// Terminal transition for a run that attempted every line.
    async fn finish_run(&self, epoch: u64, attempted: usize) {
        {
            let mut state = self.state.lock();
            if self.run_epoch.load(Ordering::SeqCst) != epoch {
                return;
            }
            state.phase = PlaybackPhase::Completed;
            state.cancel = None;
        }

        info!(attempted, "Dialogue sequence completed");
        self.emit(DialogueEvent::SequenceCompleted {
            lines_attempted: attempted,
        });
        self.ducking.restore().await;
    }

    /// Reset a live run to idle (autoplay refusal, external stop).
    async fn abort_run(&self, epoch: u64) {
        {
            let mut state = self.state.lock();
            if self.run_epoch.load(Ordering::SeqCst) != epoch {
                return;
            }
            state.phase = PlaybackPhase::Idle;
            state.cancel = None;
        }

        self.ducking.restore().await;
    }

    fn emit(&self, event: DialogueEvent) {
        self.events.emit(CoreEvent::Dialogue(event)).ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::DialogueLine;
    use async_trait::async_trait;
    use bridge_traits::audio::ManualAudioChannel;
    use bridge_traits::http::StaticHttpClient;
    use core_runtime::config::DialogueConfig;
    use mockall::mock;
    use std::time::Duration;

    mock! {
        Ducker {}

        #[async_trait]
        impl BackgroundDucking for Ducker {
            async fn duck(&self);
            async fn restore(&self);
        }
    }

    fn manifest(lines: usize) -> DialogueManifest {
        DialogueManifest {
            title: "T".to_string(),
            lines: (0..lines)
                .map(|index| DialogueLine {
                    index,
                    speaker: format!("Dev {}", index),
                    text: "line".to_string(),
                    filename: format!("l{}.json", index),
                    audio_path: format!("/d/l{}.json", index),
                })
                .collect(),
        }
    }

    fn sequencer_with(
        ducker: MockDucker,
    ) -> (LineSequencer, Arc<ManualAudioChannel>) {
        let channel = Arc::new(ManualAudioChannel::new());
        let decoder = EnvelopeDecoder::new(
            Arc::new(StaticHttpClient::new()),
            DialogueConfig::default(),
            EventBus::new(64),
        );
        let sequencer = LineSequencer::new(
            channel.clone(),
            decoder,
            Arc::new(ducker),
            EventBus::new(64),
        );
        (sequencer, channel)
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test(start_paused = true)]
    async fn empty_manifest_completes_immediately() {
        let mut ducker = MockDucker::new();
        ducker.expect_duck().times(0);
        let (sequencer, _channel) = sequencer_with(ducker);

        sequencer.arm(manifest(0)).await.unwrap();
        sequencer.play(PlayTrigger::Manual).await.unwrap();

        let snapshot = sequencer.snapshot();
        assert!(snapshot.completed);
        assert_eq!(snapshot.current_line, None);
        assert!(!snapshot.is_playing);
    }

    #[tokio::test(start_paused = true)]
    async fn play_ducks_and_completion_restores() {
        let mut ducker = MockDucker::new();
        ducker.expect_duck().times(1).returning(|| ());
        ducker.expect_restore().times(1).returning(|| ());
        let (sequencer, channel) = sequencer_with(ducker);

        sequencer.arm(manifest(1)).await.unwrap();
        sequencer.play(PlayTrigger::Manual).await.unwrap();

        let ch = channel.clone();
        wait_for(move || ch.started_clips().len() == 1).await;
        channel.finish_current();

        let seq = sequencer.clone();
        wait_for(move || seq.snapshot().completed).await;
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_play_calls_start_one_run() {
        let mut ducker = MockDucker::new();
        ducker.expect_duck().times(1).returning(|| ());
        ducker.expect_restore().returning(|| ());
        let (sequencer, channel) = sequencer_with(ducker);

        sequencer.arm(manifest(2)).await.unwrap();
        sequencer.play(PlayTrigger::Manual).await.unwrap();
        sequencer.play(PlayTrigger::Manual).await.unwrap();
        sequencer.play(PlayTrigger::Manual).await.unwrap();

        let ch = channel.clone();
        wait_for(move || !ch.started_clips().is_empty()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        // One line in flight, not three.
        assert_eq!(channel.started_clips().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_keeps_line_index() {
        let mut ducker = MockDucker::new();
        ducker.expect_duck().returning(|| ());
        ducker.expect_restore().returning(|| ());
        let (sequencer, channel) = sequencer_with(ducker);

        sequencer.arm(manifest(2)).await.unwrap();
        sequencer.play(PlayTrigger::Manual).await.unwrap();

        let ch = channel.clone();
        wait_for(move || ch.started_clips().len() == 1).await;

        sequencer.pause().await.unwrap();
        let snapshot = sequencer.snapshot();
        assert_eq!(snapshot.phase, PlaybackPhase::Paused(0));
        assert!(channel.is_paused());

        sequencer.resume().await.unwrap();
        assert_eq!(sequencer.snapshot().phase, PlaybackPhase::Playing(0));
        // Pausing and resuming never advanced the line.
        assert_eq!(channel.started_clips().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_resets_to_idle_and_restores() {
        let mut ducker = MockDucker::new();
        ducker.expect_duck().times(1).returning(|| ());
        ducker.expect_restore().times(1).returning(|| ());
        let (sequencer, channel) = sequencer_with(ducker);

        sequencer.arm(manifest(3)).await.unwrap();
        sequencer.play(PlayTrigger::Manual).await.unwrap();

        let ch = channel.clone();
        wait_for(move || ch.started_clips().len() == 1).await;

        sequencer.stop().await.unwrap();
        assert_eq!(sequencer.snapshot().phase, PlaybackPhase::Idle);

        // The cancelled run must not advance to line 1 afterwards.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(channel.started_clips().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn arm_while_playing_stops_previous_audio() {
        let mut ducker = MockDucker::new();
        ducker.expect_duck().returning(|| ());
        ducker.expect_restore().returning(|| ());
        let (sequencer, channel) = sequencer_with(ducker);

        sequencer.arm(manifest(2)).await.unwrap();
        sequencer.play(PlayTrigger::Manual).await.unwrap();

        let ch = channel.clone();
        wait_for(move || ch.started_clips().len() == 1).await;

        // New slide's manifest lands mid-line.
        sequencer.arm(manifest(1)).await.unwrap();

        let snapshot = sequencer.snapshot();
        assert_eq!(snapshot.phase, PlaybackPhase::Idle);
        assert!(!snapshot.has_auto_played);
        assert!(!channel.is_active().await.unwrap());

        // The superseded run must not start the old manifest's next line.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(channel.started_clips().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn autoplay_only_attempted_once_per_manifest() {
        let mut ducker = MockDucker::new();
        ducker.expect_duck().times(1).returning(|| ());
        ducker.expect_restore().returning(|| ());
        let (sequencer, channel) = sequencer_with(ducker);

        sequencer.arm(manifest(1)).await.unwrap();
        sequencer.play(PlayTrigger::Autoplay).await.unwrap();

        let ch = channel.clone();
        wait_for(move || ch.started_clips().len() == 1).await;
        channel.finish_current();

        let seq = sequencer.clone();
        wait_for(move || seq.snapshot().completed).await;

        // A second autoplay attempt for the same manifest is a no-op.
        sequencer.play(PlayTrigger::Autoplay).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(channel.started_clips().len(), 1);
        assert!(sequencer.snapshot().has_auto_played);
    }

    #[tokio::test(start_paused = true)]
    async fn autoplay_refusal_backs_off_to_idle() {
        let mut ducker = MockDucker::new();
        // Once for the refused autoplay run, once for the manual retry.
        ducker.expect_duck().times(2).returning(|| ());
        ducker.expect_restore().times(1).returning(|| ());
        let (sequencer, channel) = sequencer_with(ducker);
        channel.refuse_next_start("gesture required");

        sequencer.arm(manifest(2)).await.unwrap();
        sequencer.play(PlayTrigger::Autoplay).await.unwrap();

        let seq = sequencer.clone();
        wait_for(move || seq.snapshot().phase == PlaybackPhase::Idle).await;

        // Nothing played, and the sequence did not try to advance.
        assert!(channel.started_clips().is_empty());

        // A manual play afterwards works.
        sequencer.play(PlayTrigger::Manual).await.unwrap();
        let ch = channel.clone();
        wait_for(move || ch.started_clips().len() == 1).await;
    }

    #[tokio::test(start_paused = true)]
    async fn toggle_cycles_through_states() {
        let mut ducker = MockDucker::new();
        ducker.expect_duck().returning(|| ());
        ducker.expect_restore().returning(|| ());
        let (sequencer, channel) = sequencer_with(ducker);

        sequencer.arm(manifest(1)).await.unwrap();

        sequencer.toggle().await.unwrap();
        let ch = channel.clone();
        wait_for(move || ch.started_clips().len() == 1).await;
        assert!(sequencer.snapshot().is_playing);

        sequencer.toggle().await.unwrap();
        assert!(sequencer.snapshot().is_paused);

        sequencer.toggle().await.unwrap();
        assert!(sequencer.snapshot().is_playing);
    }
}
