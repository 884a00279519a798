//! Clock correlation store.
//!
//! Every RTCP sender report pairs an NTP wall-clock time with the RTP
//! timestamp the sender's media clock showed at that instant. Keeping the most
//! recent pairs of a stream gives both the media clock rate and an anchor, so
//! any RTP timestamp of that stream can be mapped to the sender's wall clock.

use crate::error::{Error, Result};
use crate::ntp::NtpTime;
use log::warn;
use std::cmp::Ordering;
use std::collections::VecDeque;

/// Two reports are enough to derive a rate; older reports only add latency to
/// rate changes on the sender.
pub const DEFAULT_HISTORY_CAPACITY: usize = 2;

const MIN_HISTORY_CAPACITY: usize = 2;

/// Distinct stale reports in a row after which the sender is assumed to have
/// restarted or rebased its clocks.
pub const MAX_STALE_REPORTS: u32 = 3;

/// One (wall clock, media timestamp) pair taken from a sender report.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct CorrelationSample {
    wall_clock_ms: f64,
    media_timestamp: u32,
}

impl CorrelationSample {
    pub fn new(wall_clock_ms: f64, media_timestamp: u32) -> Self {
        Self {
            wall_clock_ms,
            media_timestamp,
        }
    }

    /// Build a sample from the NTP and RTP fields of a sender report.
    ///
    /// Returns `None` for an all-zero NTP time.
    pub fn from_sender_report(ntp: NtpTime, rtp_timestamp: u32) -> Option<Self> {
        if ntp.is_zero() {
            None
        } else {
            Some(Self::new(ntp.to_millis(), rtp_timestamp))
        }
    }

    pub fn wall_clock_ms(&self) -> f64 {
        self.wall_clock_ms
    }

    pub fn media_timestamp(&self) -> u32 {
        self.media_timestamp
    }
}

/// Signed distance from `b` to `a` in the 32-bit wrapping timestamp space.
pub(crate) fn timestamp_diff(a: u32, b: u32) -> i64 {
    a.wrapping_sub(b) as i32 as i64
}

/// Whether `a` is ahead of `b`, treating the counter as wrapping.
pub(crate) fn is_newer_timestamp(a: u32, b: u32) -> bool {
    let diff = a.wrapping_sub(b);
    diff != 0 && diff < 0x8000_0000
}

/// Bounded, time-ordered correlation samples of a single stream.
///
/// Samples are strictly increasing in both wall clock and (wrap-aware) media
/// timestamp; once `capacity` is reached the oldest sample is evicted.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationHistory {
    samples: VecDeque<CorrelationSample>,
    capacity: usize,
    last_stale: Option<CorrelationSample>,
    stale_reports: u32,
}

impl Default for CorrelationHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationHistory {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    /// Capacities below two are raised to two, the minimum for a rate.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(MIN_HISTORY_CAPACITY);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            last_stale: None,
            stale_reports: 0,
        }
    }

    /// Add a sample, returning whether it was accepted.
    ///
    /// A sample that does not move both clocks forward is a retransmitted,
    /// duplicated or reordered sender report and is dropped silently. After
    /// [`MAX_STALE_REPORTS`] distinct stale samples in a row the history is
    /// cleared and restarted from the newest of them, so a sender whose
    /// clocks jumped backwards is picked up again.
    pub fn update(&mut self, sample: CorrelationSample) -> bool {
        if let Some(latest) = self.samples.back()
            && (sample.wall_clock_ms.partial_cmp(&latest.wall_clock_ms) != Some(Ordering::Greater)
                || !is_newer_timestamp(sample.media_timestamp, latest.media_timestamp))
        {
            if sample == *latest || self.last_stale == Some(sample) {
                return false;
            }
            self.last_stale = Some(sample);
            self.stale_reports += 1;
            if self.stale_reports < MAX_STALE_REPORTS {
                return false;
            }

            warn!(
                "{} stale sender reports in a row, resynchronizing at rtp {}",
                self.stale_reports, sample.media_timestamp
            );
            self.samples.clear();
        }

        self.last_stale = None;
        self.stale_reports = 0;
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        true
    }

    /// Map a media timestamp of this stream to the sender's wall clock.
    ///
    /// The rate comes from the two newest samples; the query is then
    /// interpolated or extrapolated from the newest one. Both steps work on
    /// signed wrapping differences, so a counter wrap between samples or
    /// between the newest sample and the query is handled.
    pub fn map_to_wall_clock(&self, media_timestamp: u32) -> Result<f64> {
        let (older, newest) = self.last_two()?;

        let ms_per_tick = (newest.wall_clock_ms - older.wall_clock_ms)
            / timestamp_diff(newest.media_timestamp, older.media_timestamp) as f64;

        Ok(newest.wall_clock_ms
            + timestamp_diff(media_timestamp, newest.media_timestamp) as f64 * ms_per_tick)
    }

    /// Media clock frequency implied by the two newest samples.
    pub fn estimated_clock_rate_hz(&self) -> Result<f64> {
        let (older, newest) = self.last_two()?;
        let ticks = timestamp_diff(newest.media_timestamp, older.media_timestamp) as f64;
        Ok(ticks * 1000.0 / (newest.wall_clock_ms - older.wall_clock_ms))
    }

    fn last_two(&self) -> Result<(&CorrelationSample, &CorrelationSample)> {
        let n = self.samples.len();
        if n < 2 {
            return Err(Error::ErrInsufficientData);
        }
        Ok((&self.samples[n - 2], &self.samples[n - 1]))
    }

    pub fn latest(&self) -> Option<&CorrelationSample> {
        self.samples.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CorrelationSample> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.last_stale = None;
        self.stale_reports = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VIDEO_KHZ: f64 = 90.0;

    fn history_of(reports: &[(f64, u32)]) -> CorrelationHistory {
        let mut history = CorrelationHistory::new();
        for &(wall, ts) in reports {
            assert!(history.update(CorrelationSample::new(wall, ts)));
        }
        history
    }

    #[test]
    fn test_map_requires_two_samples() {
        let mut history = CorrelationHistory::new();
        assert_eq!(
            history.map_to_wall_clock(0),
            Err(Error::ErrInsufficientData)
        );

        history.update(CorrelationSample::new(1000.0, 90_000));
        assert_eq!(
            history.map_to_wall_clock(90_000),
            Err(Error::ErrInsufficientData)
        );
    }

    #[test]
    fn test_rejects_duplicate_and_stale_reports() {
        let mut history = CorrelationHistory::new();
        assert!(history.update(CorrelationSample::new(1000.0, 90_000)));

        // same report twice
        assert!(!history.update(CorrelationSample::new(1000.0, 90_000)));
        // older wall clock
        assert!(!history.update(CorrelationSample::new(999.0, 180_000)));
        // newer wall clock but media clock did not advance
        assert!(!history.update(CorrelationSample::new(2000.0, 90_000)));
        assert!(!history.update(CorrelationSample::new(2000.0, 90_000)));

        assert_eq!(history.len(), 1);

        // an accepted report ends the stale streak
        assert!(history.update(CorrelationSample::new(2000.0, 180_000)));
        assert!(!history.update(CorrelationSample::new(2500.0, 100_000)));
        assert!(!history.update(CorrelationSample::new(2600.0, 110_000)));
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_resynchronizes_after_rtp_rebase() {
        let mut history = history_of(&[(1000.0, 900_000), (2000.0, 990_000)]);

        // the sender restarted with its rtp clock 1_000_000 ticks behind
        let rebased = 990_000u32.wrapping_sub(1_000_000);
        assert!(!history.update(CorrelationSample::new(3000.0, rebased)));
        // the same stale report read again does not count twice
        assert!(!history.update(CorrelationSample::new(3000.0, rebased)));
        assert!(!history.update(CorrelationSample::new(4000.0, rebased.wrapping_add(90_000))));
        assert_eq!(history.len(), 2);

        assert!(history.update(CorrelationSample::new(5000.0, rebased.wrapping_add(180_000))));
        assert_eq!(history.len(), 1);
        assert_eq!(
            history.map_to_wall_clock(rebased),
            Err(Error::ErrInsufficientData)
        );

        assert!(history.update(CorrelationSample::new(6000.0, rebased.wrapping_add(270_000))));
        let mapped = history.map_to_wall_clock(rebased.wrapping_add(225_000)).unwrap();
        assert!((mapped - 5500.0).abs() < 1e-9);
    }

    #[test]
    fn test_resynchronizes_after_wall_clock_step_back() {
        let mut history = history_of(&[(50_000.0, 900_000), (51_000.0, 990_000)]);

        for (i, wall) in [10_000.0, 11_000.0, 12_000.0].into_iter().enumerate() {
            let accepted =
                history.update(CorrelationSample::new(wall, 990_000 + 90_000 * (i as u32 + 1)));
            assert_eq!(accepted, i == 2);
        }
        assert_eq!(history.latest().map(|s| s.wall_clock_ms()), Some(12_000.0));
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_evicts_oldest_at_capacity() {
        let mut history = CorrelationHistory::with_capacity(3);
        for i in 0..5u32 {
            assert!(history.update(CorrelationSample::new(
                1000.0 * (i + 1) as f64,
                90_000 * (i + 1)
            )));
        }

        assert_eq!(history.len(), 3);
        let kept: Vec<u32> = history.iter().map(|s| s.media_timestamp()).collect();
        assert_eq!(kept, vec![270_000, 360_000, 450_000]);
    }

    #[test]
    fn test_capacity_floor_is_two() {
        let history = CorrelationHistory::with_capacity(0);
        assert_eq!(history.capacity(), 2);
    }

    #[test]
    fn test_interpolate_and_extrapolate() {
        let history = history_of(&[(10_000.0, 900_000), (11_000.0, 990_000)]);

        // exact sample
        assert!((history.map_to_wall_clock(990_000).unwrap() - 11_000.0).abs() < 1e-9);
        // between samples
        let mid = history.map_to_wall_clock(945_000).unwrap();
        assert!((mid - 10_500.0).abs() < 1e-9);
        // 200 ms after the newest report
        let ahead = history
            .map_to_wall_clock(990_000 + (200.0 * VIDEO_KHZ) as u32)
            .unwrap();
        assert!((ahead - 11_200.0).abs() < 1e-9);
        // before the oldest report
        let behind = history.map_to_wall_clock(855_000).unwrap();
        assert!((behind - 9_500.0).abs() < 1e-9);
    }

    #[test]
    fn test_media_timestamp_wrap() {
        let before_wrap = u32::MAX - 44_999;
        let after_wrap = before_wrap.wrapping_add(90_000);
        assert!(after_wrap < before_wrap);

        let history = history_of(&[(5_000.0, before_wrap), (6_000.0, after_wrap)]);

        let mapped = history.map_to_wall_clock(after_wrap.wrapping_add(9_000)).unwrap();
        assert!((mapped - 6_100.0).abs() < 1e-9);

        let mapped = history.map_to_wall_clock(u32::MAX).unwrap();
        assert!((mapped - 5_500.0).abs() < 0.1);
    }

    #[test]
    fn test_map_is_monotonic() {
        // 48 kHz audio with a slightly fast sender clock
        let history = history_of(&[(20_000.0, 1_000_000), (21_000.0, 1_048_010)]);

        let mut prev = f64::MIN;
        let mut ts = 1_000_000u32.wrapping_sub(500_000);
        for _ in 0..2_000 {
            let wall = history.map_to_wall_clock(ts).unwrap();
            assert!(wall >= prev, "mapping went backwards at {ts}");
            prev = wall;
            ts = ts.wrapping_add(997);
        }
    }

    #[test]
    fn test_estimated_clock_rate() {
        let history = history_of(&[(10_000.0, 900_000), (11_000.0, 990_000)]);
        let hz = history.estimated_clock_rate_hz().unwrap();
        assert!((hz - 90_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_sample_from_sender_report() {
        assert!(CorrelationSample::from_sender_report(NtpTime::default(), 1234).is_none());

        let sample = CorrelationSample::from_sender_report(NtpTime::new(2, 0), 1234).unwrap();
        assert_eq!(sample.wall_clock_ms(), 2000.0);
        assert_eq!(sample.media_timestamp(), 1234);
    }
}
