use crate::correlation::{CorrelationHistory, CorrelationSample};
use crate::endpoint::{MediaReceiver, RtcpTransport};
use crate::error::{Error, Result};
use log::{debug, trace};

/// Latest receive-side snapshot of one stream plus its correlation history.
///
/// One instance exists per stream and lives as long as the stream binding;
/// it is refreshed in place every cycle.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Measurement {
    latest_media_timestamp: u32,
    latest_receive_time_ms: i64,
    history: CorrelationHistory,
}

impl Measurement {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            latest_media_timestamp: 0,
            latest_receive_time_ms: 0,
            history: CorrelationHistory::with_capacity(history_capacity),
        }
    }

    /// Refresh from the stream's receiver and RTCP transport.
    ///
    /// Returns `Ok(true)` when a new sender report entered the history and
    /// `Ok(false)` when the newest report was already known. Fails with
    /// [`Error::ErrNoMeasurement`] while the stream has not received a packet
    /// or a usable sender report; nothing is modified in that case.
    pub fn update(
        &mut self,
        transport: &dyn RtcpTransport,
        receiver: &dyn MediaReceiver,
    ) -> Result<bool> {
        let latest_media_timestamp = receiver.latest_timestamp().ok_or(Error::ErrNoMeasurement)?;
        let latest_receive_time_ms = receiver
            .last_receive_time_ms()
            .ok_or(Error::ErrNoMeasurement)?;
        let report = transport
            .latest_remote_sender_report()
            .ok_or(Error::ErrNoMeasurement)?;
        let sample = CorrelationSample::from_sender_report(report.ntp, report.rtp_timestamp)
            .ok_or(Error::ErrNoMeasurement)?;

        self.latest_media_timestamp = latest_media_timestamp;
        self.latest_receive_time_ms = latest_receive_time_ms;

        let new_report = self.history.update(sample);
        if new_report {
            debug!(
                "sender report accepted: ntp {:.3} ms rtp {}",
                sample.wall_clock_ms(),
                sample.media_timestamp()
            );
        } else {
            trace!("sender report rtp {} already known", sample.media_timestamp());
        }
        Ok(new_report)
    }

    pub fn latest_media_timestamp(&self) -> u32 {
        self.latest_media_timestamp
    }

    pub fn latest_receive_time_ms(&self) -> i64 {
        self.latest_receive_time_ms
    }

    pub fn history(&self) -> &CorrelationHistory {
        &self.history
    }

    /// Estimated wall-clock delay between sending and receiving the newest
    /// packet, in the mixed domain of local receive clock minus sender NTP.
    ///
    /// Only differences between two streams of the same session are
    /// meaningful; the clock offset between the two hosts cancels out.
    pub fn receive_delay_ms(&self) -> Result<f64> {
        let send_time_ms = self.history.map_to_wall_clock(self.latest_media_timestamp)?;
        Ok(self.latest_receive_time_ms as f64 - send_time_ms)
    }
}
