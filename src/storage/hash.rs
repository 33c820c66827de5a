//! Key hashing shared by the shard map and the lock manager.
//!
//! Keys are wrapped in a fixed salt before hashing with 32-bit FNV-1, so
//! shard and stripe selection agree for the same key.

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

const SALT_PREFIX: &[u8] = b"@#&";
const SALT_SUFFIX: &[u8] = b"*^%$";

/// Plain 32-bit FNV-1 (multiply, then xor).
#[inline]
pub fn fnv1_32(data: &[u8]) -> u32 {
    fnv1_extend(FNV_OFFSET_BASIS, data)
}

#[inline]
fn fnv1_extend(mut hash: u32, data: &[u8]) -> u32 {
    for &byte in data {
        hash = hash.wrapping_mul(FNV_PRIME);
        hash ^= byte as u32;
    }
    hash
}

/// Hashes a key with the salt applied, without allocating the salted copy.
#[inline]
pub fn hash_key(key: &[u8]) -> u32 {
    let hash = fnv1_extend(FNV_OFFSET_BASIS, SALT_PREFIX);
    let hash = fnv1_extend(hash, key);
    fnv1_extend(hash, SALT_SUFFIX)
}

/// Maps a key onto one of `buckets` slots.
#[inline]
pub fn bucket_for(key: &[u8], buckets: usize) -> usize {
    debug_assert!(buckets > 0);
    hash_key(key) as usize % buckets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fnv1_known_vectors() {
        assert_eq!(fnv1_32(b""), 0x811c9dc5);
        assert_eq!(fnv1_32(b"a"), 0x050c5d7e);
        assert_eq!(fnv1_32(b"foobar"), 0x31f0b262);
    }

    #[test]
    fn test_hash_key_matches_salted_input() {
        for key in [&b""[..], b"x", b"user:1000", b"\x00\xff binary"] {
            let mut salted = SALT_PREFIX.to_vec();
            salted.extend_from_slice(key);
            salted.extend_from_slice(SALT_SUFFIX);
            assert_eq!(hash_key(key), fnv1_32(&salted));
        }
    }

    #[test]
    fn test_bucket_in_range() {
        for i in 0..1000 {
            let key = format!("key:{}", i);
            assert!(bucket_for(key.as_bytes(), 7) < 7);
            assert_eq!(bucket_for(key.as_bytes(), 1), 0);
        }
    }
}
