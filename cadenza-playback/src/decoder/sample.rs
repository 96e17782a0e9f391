//! Sample format conversion.
//!
//! Decoded packets arrive as planar buffers in the source's native sample
//! format; playback wants interleaved f32 in `[-1.0, 1.0]`. An integer
//! sample `s` with bit depth `B` maps to `f32(s) · 2^-(B-1)`, which is the
//! scaling `SampleBuffer` applies for every integer width.

use symphonia::core::audio::{AudioBufferRef, SampleBuffer};

/// Convert a decoded audio buffer to interleaved f32 samples.
///
/// Channel order follows the source's channel index order, so stereo comes
/// out as `[L0, R0, L1, R1, ...]`.
pub(crate) fn to_interleaved_f32(decoded: AudioBufferRef<'_>) -> Vec<f32> {
    let spec = *decoded.spec();
    let duration = decoded.capacity() as u64;

    let mut buf = SampleBuffer::<f32>::new(duration, spec);
    buf.copy_interleaved_ref(decoded);
    buf.samples().to_vec()
}
