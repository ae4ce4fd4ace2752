//! Hash primitive used for deterministic bucketing.

/// IEEE CRC-32 of the UTF-8 bytes of `input`.
///
/// Total over all strings and stable across runs and platforms.
///
/// Older JavaScript clients used a table-less variant over UTF-16 code units, so an identity
/// bucketed by those clients generally lands in a different bucket here.
pub fn crc32(input: impl AsRef<[u8]>) -> u32 {
    crc32fast::hash(input.as_ref())
}
