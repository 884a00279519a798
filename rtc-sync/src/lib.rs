//! RTC Sync - audio/video playout synchronization (lip sync) for RTP receivers.
//!
//! Audio and video of one call travel over separate RTP streams, each with its
//! own jitter buffer, decoder and render path. This crate measures how far the
//! two streams have drifted apart and asks both pipelines for minimum playout
//! delays that bring them back together. It never touches media itself.
//!
//! # Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`CorrelationHistory`] | Sender report (NTP, RTP) pairs of one stream; maps RTP timestamps to the sender's wall clock |
//! | [`Measurement`] | Newest receive timestamp/time of a stream plus its correlation history |
//! | [`compute_relative_delay`] | Skew between the video and audio receive-side delays |
//! | [`DelayDistributor`] | Rate-limited, bounded target playout delays from a skew |
//! | [`SyncController`] | Periodic driver binding the above to the media pipeline |
//!
//! # Data flow
//!
//! ```text
//! MediaReceiver + RtcpTransport ──► Measurement (per stream) ──► compute_relative_delay
//!                                                                         │
//!   VideoDelaySource / AudioSyncEndpoint ◄── SyncController ◄── DelayDistributor
//! ```
//!
//! # Sans-I/O scheduling
//!
//! The controller owns no timer or thread. The caller asks
//! [`SyncController::time_until_next_wake_ms`] (or
//! [`SyncController::poll_timeout`]) when to come back and then calls
//! [`SyncController::run_cycle`] with the current time:
//!
//! ```ignore
//! use rtc_sync::{ChannelId, SyncConfig, SyncControllerBuilder, SyncEndpoints};
//! use std::time::{Duration, Instant};
//!
//! let controller = SyncControllerBuilder::new()
//!     .with_interval(Duration::from_secs(1))
//!     .build(video_pipeline.clone());
//!
//! controller.reconfigure(SyncConfig::Enabled(SyncEndpoints {
//!     channel: ChannelId(1),
//!     audio: voice_engine.clone(),
//!     video_transport: video_rtcp.clone(),
//!     video_receiver: video_rtp.clone(),
//! }))?;
//!
//! loop {
//!     let now = Instant::now();
//!     controller.run_cycle(now);
//!     std::thread::sleep(Duration::from_millis(controller.time_until_next_wake_ms(Instant::now())));
//! }
//! ```

#![warn(rust_2018_idioms)]

mod controller;
mod correlation;
mod distributor;
mod endpoint;
mod error;
mod estimator;
mod measurement;
mod ntp;

pub use controller::{
    DEFAULT_SYNC_INTERVAL, SyncConfig, SyncController, SyncControllerBuilder, SyncEndpoints,
};
pub use correlation::{
    CorrelationHistory, CorrelationSample, DEFAULT_HISTORY_CAPACITY, MAX_STALE_REPORTS,
};
pub use distributor::{
    DEFAULT_HYSTERESIS_MS, DEFAULT_MAX_DELAY_MS, DEFAULT_MAX_STEP_MS, DelayDistributor, DelayState,
    DistributorConfig, SyncTargets,
};
pub use endpoint::{
    AudioDelayEstimate, AudioSyncEndpoint, ChannelId, MediaReceiver, RemoteSenderReport,
    RtcpTransport, RtpHandles, VideoDelaySource,
};
pub use error::{Error, Result};
pub use estimator::{MAX_RELATIVE_DELAY_MS, compute_relative_delay};
pub use measurement::Measurement;
pub use ntp::NtpTime;
