//! Delay distributor.
//!
//! Turns a measured audio/video skew into minimum playout delays for both
//! streams. The measured skew comes from pre-jitter-buffer receive times and
//! does not move when playout delays change, so the distributor remembers how
//! much compensation it has already requested and only acts on what is left.

use log::trace;

pub const DEFAULT_MAX_STEP_MS: u32 = 80;
pub const DEFAULT_HYSTERESIS_MS: u32 = 30;
pub const DEFAULT_MAX_DELAY_MS: u32 = 10_000;

/// Tuning of a [`DelayDistributor`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DistributorConfig {
    /// Largest change applied to either stream in one cycle.
    pub max_step_ms: u32,
    /// Outstanding skew smaller than this is left alone.
    pub hysteresis_ms: u32,
    /// Upper bound for any requested delay.
    pub max_delay_ms: u32,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            max_step_ms: DEFAULT_MAX_STEP_MS,
            hysteresis_ms: DEFAULT_HYSTERESIS_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

/// Playout delays currently reported by the two pipelines.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct DelayState {
    pub current_audio_delay_ms: u32,
    pub current_video_delay_ms: u32,
}

impl DelayState {
    pub fn new(current_audio_delay_ms: u32, current_video_delay_ms: u32) -> Self {
        Self {
            current_audio_delay_ms,
            current_video_delay_ms,
        }
    }
}

/// Target playout delays for one cycle.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct SyncTargets {
    pub audio_delay_ms: u32,
    pub video_delay_ms: u32,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DelayDistributor {
    config: DistributorConfig,
    /// Audio delay added so far on top of what the audio pipeline needs.
    extra_audio_delay_ms: u32,
    /// Video delay added so far on top of the decode/render pipeline.
    extra_video_delay_ms: u32,
    /// Change of `extra_audio_delay_ms` made by the last `compute_delays`.
    last_audio_step_ms: i64,
}

impl DelayDistributor {
    pub fn new(config: DistributorConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn config(&self) -> &DistributorConfig {
        &self.config
    }

    pub fn extra_audio_delay_ms(&self) -> u32 {
        self.extra_audio_delay_ms
    }

    pub fn extra_video_delay_ms(&self) -> u32 {
        self.extra_video_delay_ms
    }

    /// Forget all compensation requested so far.
    pub fn reset(&mut self) {
        self.extra_audio_delay_ms = 0;
        self.extra_video_delay_ms = 0;
        self.last_audio_step_ms = 0;
    }

    /// Compute new target delays from the measured skew and the current
    /// delays of both pipelines.
    ///
    /// `relative_delay_ms` is positive when video took longer end to end than
    /// audio. A positive outstanding skew holds audio back; a negative one
    /// first gives back audio delay added earlier and then holds video back.
    /// A skew inside the hysteresis band, or one already compensated to
    /// within the band, leaves both delays as they are. Each call moves a
    /// stream by at most `max_step_ms`, never lowers video below
    /// `current_video_delay_ms`, and never asks for more than `max_delay_ms`.
    pub fn compute_delays(&mut self, relative_delay_ms: i32, current: DelayState) -> SyncTargets {
        let DelayState {
            current_audio_delay_ms,
            current_video_delay_ms,
        } = current;
        let mut targets = SyncTargets {
            audio_delay_ms: current_audio_delay_ms,
            video_delay_ms: current_video_delay_ms,
        };
        self.last_audio_step_ms = 0;

        if relative_delay_ms.unsigned_abs() < self.config.hysteresis_ms {
            trace!("skew {relative_delay_ms} ms within hysteresis");
            return targets;
        }

        let compensated = self.extra_audio_delay_ms as i64 - self.extra_video_delay_ms as i64;
        let residual = relative_delay_ms as i64 - compensated;
        if residual.unsigned_abs() < self.config.hysteresis_ms as u64 {
            trace!("skew {relative_delay_ms} ms, residual {residual} ms within hysteresis");
            return targets;
        }

        let step = residual.unsigned_abs().min(self.config.max_step_ms as u64) as u32;
        if residual > 0 {
            targets.audio_delay_ms = self.raise(current_audio_delay_ms, step);
            let added = targets.audio_delay_ms - current_audio_delay_ms;
            self.extra_audio_delay_ms += added;
            self.last_audio_step_ms = added as i64;
        } else if self.extra_audio_delay_ms > 0 {
            let release = step.min(self.extra_audio_delay_ms);
            targets.audio_delay_ms = current_audio_delay_ms.saturating_sub(release);
            self.extra_audio_delay_ms -= release;
            self.last_audio_step_ms = -(release as i64);
        } else {
            targets.video_delay_ms = self.raise(current_video_delay_ms, step);
            self.extra_video_delay_ms += targets.video_delay_ms - current_video_delay_ms;
        }

        trace!(
            "skew {relative_delay_ms} ms, residual {residual} ms: audio {} -> {} ms, video {} -> {} ms",
            current_audio_delay_ms,
            targets.audio_delay_ms,
            current_video_delay_ms,
            targets.video_delay_ms
        );
        targets
    }

    /// Undo the audio part of the last [`compute_delays`](Self::compute_delays)
    /// after the audio pipeline refused it, so the next call asks again.
    pub fn revert_audio_step(&mut self) {
        let extra = self.extra_audio_delay_ms as i64 - self.last_audio_step_ms;
        self.extra_audio_delay_ms = extra.max(0) as u32;
        self.last_audio_step_ms = 0;
    }

    fn raise(&self, current_ms: u32, step_ms: u32) -> u32 {
        if current_ms >= self.config.max_delay_ms {
            current_ms
        } else {
            current_ms
                .saturating_add(step_ms)
                .min(self.config.max_delay_ms)
        }
    }
}
