//! Value codec -- numbers to RGBA8 texels and back.
//!
//! A value is written as an unsigned base-256 integer of four digits, most
//! significant digit in `r` and least significant in `a`:
//!
//! ```text
//! value = r * 256^3 + g * 256^2 + b * 256 + a
//! ```
//!
//! The shader performs the same dot product on the sampled texel (after
//! scaling the normalized channels back to 0..=255), so anything that fits in
//! 32 bits survives the trip exactly.
//!
//! # Range
//!
//! Only the integer part is kept, and values at or above [`MAX_ENCODABLE`]
//! wrap modulo 256^4. The wrap is accepted lossy behavior: elevations and
//! ratings are many orders of magnitude below the limit, and
//! [`HazardReport`](crate::report::HazardReport) clamps (with a warning)
//! before anything reaches this module. Negative and NaN inputs are outside
//! the contract and encode as zero.
//!
//! # Nibble variant
//!
//! Orientation sectors are flags rather than magnitudes. [`encode_nibbles`]
//! writes a byte as its 8-bit binary string and splits that into two 4-bit
//! groups, each expanded to a texel of 0/1 channels. A shader can then test
//! a single sector with a component lookup instead of integer arithmetic.

/// One past the largest value that survives [`encode_value`] unchanged (256^4).
pub const MAX_ENCODABLE: f64 = 4_294_967_296.0;

/// Encode the integer part of `value` as a big-endian RGBA texel.
///
/// Values `>= 256^4` wrap. Negative and NaN values encode as `[0, 0, 0, 0]`.
///
/// ```
/// use hazard_atlas::codec::encode_value;
///
/// assert_eq!(encode_value(1600.0), [0, 0, 6, 64]);
/// assert_eq!(encode_value(3.9), [0, 0, 0, 3]);
/// ```
pub fn encode_value(value: f64) -> [u8; 4] {
    if value.is_nan() || value < 0.0 {
        return [0; 4];
    }
    let wrapped = value.floor().rem_euclid(MAX_ENCODABLE);
    (wrapped as u32).to_be_bytes()
}

/// Decode a texel written by [`encode_value`].
pub fn decode_value(texel: [u8; 4]) -> f64 {
    let [r, g, b, a] = texel.map(f64::from);
    r * 256.0 * 256.0 * 256.0 + g * 256.0 * 256.0 + b * 256.0 + a
}

/// Expand a byte into two texels of 0/1 channels, high nibble first.
///
/// Each texel lists its nibble's bits most significant first, so
/// `0b1010_0011` becomes `[[1, 0, 1, 0], [0, 0, 1, 1]]`.
pub fn encode_nibbles(value: u8) -> [[u8; 4]; 2] {
    let bit = |n: u32| (value >> n) & 1;
    [
        [bit(7), bit(6), bit(5), bit(4)],
        [bit(3), bit(2), bit(1), bit(0)],
    ]
}

/// Reassemble a byte from two nibble texels.
///
/// Any non-zero channel counts as a set bit, so the decoder also accepts
/// texels that went through a normalized 0/255 representation.
pub fn decode_nibbles(texels: [[u8; 4]; 2]) -> u8 {
    texels
        .iter()
        .flatten()
        .fold(0u8, |acc, &channel| (acc << 1) | u8::from(channel != 0))
}

/// Pack two compass sector indices (0..=15) into one byte, start in the high nibble.
///
/// Indices above 15 are clamped.
pub fn pack_sectors(start: u8, end: u8) -> u8 {
    (start.min(15) << 4) | end.min(15)
}

/// Split a byte written by [`pack_sectors`] into `(start, end)`.
pub fn unpack_sectors(packed: u8) -> (u8, u8) {
    (packed >> 4, packed & 0x0F)
}
