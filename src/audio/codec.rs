//! # G.711 µ-law Companding
//!
//! Telephony audio arrives as 8-bit µ-law: one byte per sample, logarithmically
//! compressed from a 14-bit linear range. These helpers expand it to 16-bit
//! linear PCM and compress linear PCM back to µ-law (used only when we have to
//! synthesize audio locally).
//!
//! The arithmetic is the reference G.711 one, so decoded values match the
//! usual lookup tables bit for bit (0xFF decodes to 0, 0x00 to -32124).

const BIAS: i32 = 0x84;
const CLIP: i32 = 8159;
const SEGMENT_ENDS: [i32; 8] = [0x3F, 0x7F, 0xFF, 0x1FF, 0x3FF, 0x7FF, 0xFFF, 0x1FFF];

/// Expand one µ-law byte to a 16-bit linear sample.
pub fn mulaw_to_linear(encoded: u8) -> i16 {
    let u = !encoded;
    let mantissa = ((u & 0x0F) as i32) << 3;
    let segment = ((u & 0x70) >> 4) as i32;
    let magnitude = (mantissa + BIAS) << segment;

    let value = if u & 0x80 != 0 {
        BIAS - magnitude
    } else {
        magnitude - BIAS
    };
    value as i16
}

/// Compress one 16-bit linear sample to µ-law.
pub fn linear_to_mulaw(sample: i16) -> u8 {
    // Work on the 14-bit magnitude the companding law is defined over.
    let mut pcm = (sample as i32) >> 2;
    let mask: u8 = if pcm < 0 {
        pcm = -pcm;
        0x7F
    } else {
        0xFF
    };
    pcm = pcm.min(CLIP) + (BIAS >> 2);

    let segment = SEGMENT_ENDS
        .iter()
        .position(|&end| pcm <= end)
        .unwrap_or(SEGMENT_ENDS.len());

    if segment >= SEGMENT_ENDS.len() {
        return 0x7F ^ mask;
    }

    let mantissa = ((pcm >> (segment + 1)) & 0x0F) as u8;
    (((segment as u8) << 4) | mantissa) ^ mask
}

/// Expand a whole µ-law buffer.
pub fn expand(encoded: &[u8]) -> Vec<i16> {
    encoded.iter().map(|&byte| mulaw_to_linear(byte)).collect()
}

/// Compress a whole linear buffer.
pub fn compress(samples: &[i16]) -> Vec<u8> {
    samples.iter().map(|&sample| linear_to_mulaw(sample)).collect()
}
