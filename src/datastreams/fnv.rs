//! FNV-1 64-bit hashing used for pathway identity.
//!
//! Note this is FNV-1 (multiply then xor), not FNV-1a: checkpoint hashes
//! must chain identically across tracers, so the variant matters.

const FNV1_64_INIT: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_64_PRIME: u64 = 0x0000_0100_0000_01b3;

pub fn fnv1_64(data: &[u8]) -> u64 {
    let mut hash = FNV1_64_INIT;
    for byte in data {
        hash = hash.wrapping_mul(FNV_64_PRIME);
        hash ^= u64::from(*byte);
    }
    hash
}
