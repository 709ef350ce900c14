use std::hash::Hasher;

/// A deterministic FNV-1a 64-bit hasher.
///
/// Used in place of `DefaultHasher` (which is randomized) so that the
/// state cache's layout and the RNG seeds derived from string labels
/// are identical from run to run.
#[derive(Debug)]
pub struct FnvHasher {
    state: u64,
}

impl FnvHasher {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;

    pub fn new() -> Self {
        Self {
            state: Self::OFFSET_BASIS,
        }
    }
}

impl Default for FnvHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher for FnvHasher {
    fn finish(&self) -> u64 {
        self.state
    }

    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.state ^= byte as u64;
            self.state = self.state.wrapping_mul(Self::PRIME);
        }
    }
}

/// Hash a byte string with FNV-1a, starting from the standard basis.
pub fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hasher = FnvHasher::new();
    hasher.write(bytes);
    hasher.finish()
}

/// Derive a deterministic RNG seed from a human-readable label.
pub fn seed_from_label(label: &str) -> u64 {
    fnv1a(label.as_bytes())
}
