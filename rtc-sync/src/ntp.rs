use std::time::Duration;

/// Offset in seconds between the unix epoch and the ntp epoch.
const NTP_UNIX_OFFSET_SECS: u64 = 0x83AA7E80;

/// 64-bit NTP timestamp as carried in an RTCP sender report.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NtpTime {
    pub seconds: u32,
    pub fraction: u32,
}

impl NtpTime {
    pub fn new(seconds: u32, fraction: u32) -> Self {
        Self { seconds, fraction }
    }

    pub fn from_u64(ntp: u64) -> Self {
        Self {
            seconds: (ntp >> 32) as u32,
            fraction: (ntp & 0xFFFFFFFF) as u32,
        }
    }

    pub fn as_u64(&self) -> u64 {
        (self.seconds as u64) << 32 | self.fraction as u64
    }

    pub fn from_unix(duration_since_unix_epoch: Duration) -> Self {
        let u = duration_since_unix_epoch.as_nanos() as u64;

        let s = u / 1_000_000_000 + NTP_UNIX_OFFSET_SECS;
        let mut f = u % 1_000_000_000;
        f <<= 32;
        f /= 1_000_000_000;

        Self::from_u64(s << 32 | f)
    }

    /// An all-zero timestamp is what a sender puts in an SR when it has no
    /// wall clock; such a report cannot be used for correlation.
    pub fn is_zero(&self) -> bool {
        self.seconds == 0 && self.fraction == 0
    }

    /// Milliseconds since the ntp epoch.
    pub fn to_millis(&self) -> f64 {
        self.seconds as f64 * 1000.0 + self.fraction as f64 * 1000.0 / 4_294_967_296.0
    }
}
