//! Sync Controller - periodic driver of audio/video synchronization.

use crate::correlation::{CorrelationHistory, DEFAULT_HISTORY_CAPACITY};
use crate::distributor::{DelayDistributor, DelayState, DistributorConfig, SyncTargets};
use crate::endpoint::{
    AudioSyncEndpoint, ChannelId, MediaReceiver, RtcpTransport, VideoDelaySource, same_object,
};
use crate::error::{Error, Result};
use crate::estimator::compute_relative_delay;
use crate::measurement::Measurement;
use log::{debug, error, trace, warn};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Nominal time between two synchronization cycles.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_millis(1000);

/// Collaborators of an enabled synchronization.
#[derive(Clone)]
pub struct SyncEndpoints {
    pub channel: ChannelId,
    pub audio: Arc<dyn AudioSyncEndpoint>,
    pub video_transport: Arc<dyn RtcpTransport>,
    pub video_receiver: Arc<dyn MediaReceiver>,
}

impl SyncEndpoints {
    /// Same channel and the very same collaborator objects.
    fn is_same(&self, other: &SyncEndpoints) -> bool {
        self.channel == other.channel
            && same_object(&self.audio, &other.audio)
            && same_object(&self.video_transport, &other.video_transport)
            && same_object(&self.video_receiver, &other.video_receiver)
    }
}

impl fmt::Debug for SyncEndpoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEndpoints")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

/// Binding of a [`SyncController`] to an audio channel and a video stream.
#[derive(Debug, Clone, Default)]
pub enum SyncConfig {
    /// No audio channel; cycles do nothing.
    #[default]
    Disabled,
    Enabled(SyncEndpoints),
}

/// Builder for the SyncController.
///
/// # Example
///
/// ```ignore
/// use rtc_sync::SyncControllerBuilder;
/// use std::time::Duration;
///
/// let controller = SyncControllerBuilder::new()
///     .with_interval(Duration::from_millis(500))
///     .with_max_step_ms(40)
///     .build(video_pipeline);
/// ```
#[derive(Debug, Clone)]
pub struct SyncControllerBuilder {
    interval: Duration,
    distributor: DistributorConfig,
    history_capacity: usize,
}

impl Default for SyncControllerBuilder {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SYNC_INTERVAL,
            distributor: DistributorConfig::default(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

impl SyncControllerBuilder {
    /// Create a new builder with default settings.
    ///
    /// Default interval is 1 second.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Largest per-cycle change of either playout delay.
    pub fn with_max_step_ms(mut self, max_step_ms: u32) -> Self {
        self.distributor.max_step_ms = max_step_ms;
        self
    }

    /// Skew below which no adjustment is made.
    pub fn with_hysteresis_ms(mut self, hysteresis_ms: u32) -> Self {
        self.distributor.hysteresis_ms = hysteresis_ms;
        self
    }

    pub fn with_max_delay_ms(mut self, max_delay_ms: u32) -> Self {
        self.distributor.max_delay_ms = max_delay_ms;
        self
    }

    /// Number of sender reports kept per stream.
    pub fn with_history_capacity(mut self, history_capacity: usize) -> Self {
        self.history_capacity = history_capacity;
        self
    }

    pub fn build(self, video: Arc<dyn VideoDelaySource>) -> SyncController {
        SyncController {
            video,
            interval: self.interval,
            distributor: self.distributor,
            history_capacity: self.history_capacity,
            state: Mutex::new(SyncState {
                last_sync_time: Instant::now(),
                session: SyncSession::Disabled,
            }),
        }
    }
}

struct ActiveSession {
    endpoints: SyncEndpoints,
    audio: Measurement,
    video: Measurement,
    distributor: DelayDistributor,
}

enum SyncSession {
    Disabled,
    Active(Box<ActiveSession>),
}

impl SyncSession {
    fn matches(&self, config: &SyncConfig) -> bool {
        match (self, config) {
            (SyncSession::Disabled, SyncConfig::Disabled) => true,
            (SyncSession::Active(session), SyncConfig::Enabled(endpoints)) => {
                session.endpoints.is_same(endpoints)
            }
            _ => false,
        }
    }
}

struct SyncState {
    last_sync_time: Instant,
    session: SyncSession,
}

/// Keeps audio and video playout of one receive session in sync.
///
/// An external scheduler calls [`run_cycle`](SyncController::run_cycle)
/// roughly every [`time_until_next_wake_ms`](SyncController::time_until_next_wake_ms);
/// each cycle measures both streams, estimates their skew and pushes new
/// minimum playout delays to the audio endpoint and the video pipeline.
/// [`reconfigure`](SyncController::reconfigure) may be called from another
/// thread at any time. All state sits behind one lock held for the whole of
/// either call.
pub struct SyncController {
    video: Arc<dyn VideoDelaySource>,
    interval: Duration,
    distributor: DistributorConfig,
    history_capacity: usize,
    state: Mutex<SyncState>,
}

impl SyncController {
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Bind to an audio channel and video stream, or unbind.
    ///
    /// Reconfiguring with the same channel and the same collaborator objects
    /// keeps all accumulated measurements; anything else starts over.
    pub fn reconfigure(&self, config: SyncConfig) -> Result<()> {
        let mut state = self.state.lock()?;
        if state.session.matches(&config) {
            return Ok(());
        }

        state.session = match config {
            SyncConfig::Disabled => {
                debug!("audio/video sync disabled");
                SyncSession::Disabled
            }
            SyncConfig::Enabled(endpoints) => {
                debug!("audio/video sync enabled for audio channel {}", endpoints.channel);
                SyncSession::Active(Box::new(ActiveSession {
                    endpoints,
                    audio: Measurement::new(self.history_capacity),
                    video: Measurement::new(self.history_capacity),
                    distributor: DelayDistributor::new(self.distributor),
                }))
            }
        };
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.state
            .lock()
            .map(|state| matches!(state.session, SyncSession::Active(_)))
            .unwrap_or(false)
    }

    /// Snapshot of the (audio, video) correlation histories while active.
    pub fn correlation_histories(&self) -> Option<(CorrelationHistory, CorrelationHistory)> {
        let state = self.state.lock().ok()?;
        match &state.session {
            SyncSession::Active(session) => Some((
                session.audio.history().clone(),
                session.video.history().clone(),
            )),
            SyncSession::Disabled => None,
        }
    }

    /// When the next cycle is due.
    pub fn poll_timeout(&self) -> Option<Instant> {
        let state = self.state.lock().ok()?;
        Some(state.last_sync_time + self.interval)
    }

    /// Milliseconds until the next cycle is due, zero when overdue.
    pub fn time_until_next_wake_ms(&self, now: Instant) -> u64 {
        match self.state.lock() {
            Ok(state) => {
                let elapsed = now.saturating_duration_since(state.last_sync_time);
                self.interval.saturating_sub(elapsed).as_millis() as u64
            }
            Err(_) => self.interval.as_millis() as u64,
        }
    }

    /// Run one synchronization pass.
    ///
    /// Returns the delays that were applied, or `None` when the controller is
    /// disabled or the cycle had to be skipped; a skipped cycle is simply
    /// retried at the next wake.
    pub fn run_cycle(&self, now: Instant) -> Option<SyncTargets> {
        match self.process(now) {
            Ok(targets) => targets,
            Err(err) if err.is_transient() => {
                debug!("sync cycle skipped: {err}");
                None
            }
            Err(err) => {
                warn!("sync cycle failed: {err}");
                None
            }
        }
    }

    fn process(&self, now: Instant) -> Result<Option<SyncTargets>> {
        let mut state = self.state.lock()?;
        state.last_sync_time = now;

        let SyncSession::Active(session) = &mut state.session else {
            return Ok(None);
        };
        let ActiveSession {
            endpoints,
            audio,
            video,
            distributor,
        } = session.as_mut();
        let channel = endpoints.channel;

        let current_video_delay_ms = self.video.current_delay_ms();

        let current_audio_delay_ms = endpoints
            .audio
            .delay_estimate_ms(channel)
            .ok_or(Error::ErrNoDelayEstimate)?
            .total_ms();
        let audio_handles = endpoints
            .audio
            .rtp_handles(channel)
            .ok_or(Error::ErrNoRtpHandles)?;

        // both streams are refreshed or neither is
        let mut next_video = video.clone();
        next_video.update(
            endpoints.video_transport.as_ref(),
            endpoints.video_receiver.as_ref(),
        )?;
        let mut next_audio = audio.clone();
        next_audio.update(
            audio_handles.transport.as_ref(),
            audio_handles.receiver.as_ref(),
        )?;
        *video = next_video;
        *audio = next_audio;

        let relative_delay_ms = compute_relative_delay(audio, video)?;
        let current = DelayState::new(current_audio_delay_ms, current_video_delay_ms);

        trace!("sync current video delay: {} ms", current.current_video_delay_ms);
        trace!("sync current audio delay: {} ms", current.current_audio_delay_ms);
        trace!("sync relative delay: {relative_delay_ms} ms");

        let targets = distributor.compute_delays(relative_delay_ms, current);

        if let Err(err) = endpoints
            .audio
            .set_minimum_delay_ms(channel, targets.audio_delay_ms)
        {
            error!("error setting voice delay on channel {channel}: {err}");
            distributor.revert_audio_step();
        }
        self.video.set_minimum_delay_ms(targets.video_delay_ms);

        Ok(Some(targets))
    }
}
