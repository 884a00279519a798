//! Capabilities the synchronizer needs from the media pipeline.
//!
//! The synchronizer never owns transports, jitter buffers or renderers. It
//! reads a handful of values from them once per cycle and pushes two target
//! delays back; these traits are that contract. All methods must be
//! non-blocking since they are called while the controller holds its lock.

use crate::error::Result;
use crate::ntp::NtpTime;
use std::fmt;
use std::sync::Arc;

/// Identifier of an audio channel on an [`AudioSyncEndpoint`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ChannelId(pub u32);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// NTP/RTP pair of the newest RTCP sender report received for a stream.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct RemoteSenderReport {
    pub ntp: NtpTime,
    pub rtp_timestamp: u32,
}

/// Current audio buffering as reported by the audio pipeline.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct AudioDelayEstimate {
    pub jitter_buffer_ms: u32,
    pub playout_buffer_ms: u32,
}

impl AudioDelayEstimate {
    pub fn total_ms(&self) -> u32 {
        self.jitter_buffer_ms.saturating_add(self.playout_buffer_ms)
    }
}

/// Receive-side state of one RTP stream.
pub trait MediaReceiver: Send + Sync {
    /// RTP timestamp of the newest received packet, `None` before the first one.
    fn latest_timestamp(&self) -> Option<u32>;

    /// Local monotonic time in ms at which the newest packet arrived.
    fn last_receive_time_ms(&self) -> Option<i64>;
}

/// RTCP side of one RTP stream.
pub trait RtcpTransport: Send + Sync {
    /// Newest sender report from the remote side, `None` until one arrived.
    fn latest_remote_sender_report(&self) -> Option<RemoteSenderReport>;
}

/// Video render pipeline.
pub trait VideoDelaySource: Send + Sync {
    /// Current total video delay (decode + render) in ms. This is also the
    /// floor the synchronizer never asks to go below.
    fn current_delay_ms(&self) -> u32;

    fn set_minimum_delay_ms(&self, delay_ms: u32);
}

/// RTP/RTCP handles of an audio channel.
#[derive(Clone)]
pub struct RtpHandles {
    pub transport: Arc<dyn RtcpTransport>,
    pub receiver: Arc<dyn MediaReceiver>,
}

/// Audio engine, addressed per channel.
pub trait AudioSyncEndpoint: Send + Sync {
    fn delay_estimate_ms(&self, channel: ChannelId) -> Option<AudioDelayEstimate>;

    fn rtp_handles(&self, channel: ChannelId) -> Option<RtpHandles>;

    /// Request a minimum playout delay. An error is logged by the caller and
    /// retried on the next cycle.
    fn set_minimum_delay_ms(&self, channel: ChannelId, delay_ms: u32) -> Result<()>;
}

/// Identity comparison of two shared collaborators, ignoring vtables.
pub(crate) fn same_object<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
