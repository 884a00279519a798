use crate::error::{Error, Result};
use crate::measurement::Measurement;
use log::warn;

/// Skews beyond this are treated as a clock jump or a restarted sender, not
/// as a network difference worth compensating.
pub const MAX_RELATIVE_DELAY_MS: i32 = 10_000;

/// Relative delay between the audio and the video stream, in ms.
///
/// Each stream's newest media timestamp is mapped to the sender's wall clock
/// through that stream's own correlation history, which gives the receive-side
/// delay `receive_time - send_time` per stream. The result is
/// `video_receive_delay - audio_receive_delay`: positive when video took
/// longer end to end than audio, so audio has to wait; negative when audio
/// is the one lagging.
///
/// Fails with [`Error::ErrInsufficientData`] when either history cannot map
/// yet and with [`Error::ErrSkewOutOfRange`] for implausible skews.
pub fn compute_relative_delay(audio: &Measurement, video: &Measurement) -> Result<i32> {
    let audio_receive_delay_ms = audio.receive_delay_ms()?;
    let video_receive_delay_ms = video.receive_delay_ms()?;

    let relative_delay_ms = (video_receive_delay_ms - audio_receive_delay_ms).round();
    if relative_delay_ms.abs() > MAX_RELATIVE_DELAY_MS as f64 {
        warn!("ignoring implausible audio/video skew of {relative_delay_ms} ms");
        return Err(Error::ErrSkewOutOfRange(relative_delay_ms as i32));
    }

    Ok(relative_delay_ms as i32)
}
