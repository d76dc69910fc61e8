//! # Continuous-State Sample Rate Conversion
//!
//! Linear-interpolating rate converter with explicit carry-over state, using
//! the same arithmetic as the classic `ratecv` routine found in most telephony
//! stacks. Feeding a signal in consecutive chunks while threading the returned
//! [`RateCvState`] through produces exactly the samples a single call over the
//! whole signal would. Starting every chunk from a fresh state does not: each
//! chunk then interpolates from silence and drops the bridging sample, which
//! is audible as a click at every frame boundary.
//!
//! ## Algorithm:
//! The rates are reduced by their GCD. A phase accumulator `d` is advanced by
//! `out_rate` for every input sample consumed and decreased by `in_rate` for
//! every output sample produced; each output is a weighted mix of the previous
//! and current input sample using `d` as the weight.

use super::transcoder::{ENGINE_INPUT_RATE, TELEPHONY_RATE};

/// Carry-over state between chunks of the same signal.
///
/// ## Rust Concepts:
/// - **Copy**: the state is three integers, so passing it by value is free
/// - **Option<RateCvState>**: `None` means "start of a new signal"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateCvState {
    phase: i64,
    previous: i32,
    current: i32,
}

/// A rate converter for one fixed (input, output) rate pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateConverter {
    in_rate: i64,
    out_rate: i64,
}

impl RateConverter {
    /// Create a converter. Rates of zero are treated as 1 Hz so the converter
    /// can never divide by zero.
    pub fn new(in_rate: u32, out_rate: u32) -> Self {
        let in_rate = in_rate.max(1) as i64;
        let out_rate = out_rate.max(1) as i64;
        let divisor = gcd(in_rate, out_rate);

        Self {
            in_rate: in_rate / divisor,
            out_rate: out_rate / divisor,
        }
    }

    /// Narrowband telephony (8 kHz) to wideband speech (16 kHz).
    pub fn narrowband_to_wideband() -> Self {
        Self::new(TELEPHONY_RATE, ENGINE_INPUT_RATE)
    }

    /// Convert one chunk, continuing from `state`.
    ///
    /// Returns the converted samples and the state to pass with the next chunk
    /// of the same signal.
    pub fn convert(&self, input: &[i16], state: Option<RateCvState>) -> (Vec<i16>, RateCvState) {
        let mut state = state.unwrap_or(RateCvState {
            phase: -self.out_rate,
            previous: 0,
            current: 0,
        });

        let capacity = (input.len() as i64 * self.out_rate / self.in_rate) as usize + 1;
        let mut output = Vec::with_capacity(capacity);
        let mut samples = input.iter();

        loop {
            while state.phase < 0 {
                match samples.next() {
                    Some(&sample) => {
                        state.previous = state.current;
                        state.current = sample as i32;
                        state.phase += self.out_rate;
                    }
                    None => return (output, state),
                }
            }

            while state.phase >= 0 {
                // Interpolate at 32-bit scale, truncate, then shift back down.
                let previous = (state.previous as i64) << 16;
                let current = (state.current as i64) << 16;
                let mixed = (previous * state.phase + current * (self.out_rate - state.phase))
                    / self.out_rate;
                output.push((mixed >> 16) as i16);
                state.phase -= self.in_rate;
            }
        }
    }
}

fn gcd(mut a: i64, mut b: i64) -> i64 {
    while b != 0 {
        let remainder = a % b;
        a = b;
        b = remainder;
    }
    a.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_narrowband_pair_follows_stream_rates() {
        assert_eq!(
            RateConverter::narrowband_to_wideband(),
            RateConverter::new(TELEPHONY_RATE, ENGINE_INPUT_RATE)
        );
        assert_eq!(RateConverter::narrowband_to_wideband(), RateConverter::new(1, 2));
    }

    fn ramp(len: usize) -> Vec<i16> {
        (0..len).map(|i| ((i as i32 * 397) % 20_000 - 10_000) as i16).collect()
    }

    #[test]
    fn test_upsample_doubles_after_first_sample() {
        let converter = RateConverter::narrowband_to_wideband();
        let (first, state) = converter.convert(&ramp(160), None);
        assert_eq!(first.len(), 319);

        let (second, _) = converter.convert(&ramp(160), Some(state));
        assert_eq!(second.len(), 320);
    }

    #[test]
    fn test_midpoints_are_interpolated() {
        let converter = RateConverter::narrowband_to_wideband();
        let (output, _) = converter.convert(&[100, 200, -301], None);
        assert_eq!(output, vec![100, 150, 200, -51, -301]);
    }

    #[test]
    fn test_chunked_conversion_matches_single_pass() {
        let converter = RateConverter::narrowband_to_wideband();
        let signal = ramp(480);

        let (whole, _) = converter.convert(&signal, None);

        let (mut chunked, mut state) = converter.convert(&signal[..160], None);
        for chunk in signal[160..].chunks(160) {
            let (more, next) = converter.convert(chunk, Some(state));
            chunked.extend(more);
            state = next;
        }

        assert_eq!(chunked, whole);
    }

    #[test]
    fn test_resetting_state_breaks_the_boundary() {
        let converter = RateConverter::narrowband_to_wideband();
        let signal = ramp(320);
        let (whole, _) = converter.convert(&signal, None);

        let (mut reset, _) = converter.convert(&signal[..160], None);
        let (tail, _) = converter.convert(&signal[160..], None);
        reset.extend(tail);

        assert_ne!(reset, whole);
        assert_eq!(reset.len(), whole.len() - 1);
    }

    #[test]
    fn test_empty_input_keeps_state() {
        let converter = RateConverter::narrowband_to_wideband();
        let (_, state) = converter.convert(&[5, 6, 7], None);
        let (output, after) = converter.convert(&[], Some(state));
        assert!(output.is_empty());
        assert_eq!(after, state);
    }

    #[test]
    fn test_downsample_ratio() {
        let converter = RateConverter::new(22_050, 8_000);
        let (output, _) = converter.convert(&ramp(22_050), None);
        assert!((7_990..=8_010).contains(&output.len()), "got {}", output.len());
    }
}
