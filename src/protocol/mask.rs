//! Client-to-server payload masking (RFC 6455 Section 5.3).

/// Masking key of a frame.
///
/// Every frame a client sends carries a fresh four byte key; frames from a
/// server never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MaskingKey {
    /// Unmasked frame.
    #[default]
    NoMasking,
    /// Payload is XORed with these bytes, cycling every four bytes.
    FourByte([u8; 4]),
}

impl MaskingKey {
    /// Generate a random key from the operating system RNG.
    ///
    /// Falls back to a time-derived key if the RNG is unavailable, which keeps
    /// frames well-formed even though the key is then predictable.
    #[must_use]
    pub fn generate() -> Self {
        let mut key = [0u8; 4];
        if getrandom::getrandom(&mut key).is_err() {
            use std::time::{SystemTime, UNIX_EPOCH};
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.subsec_nanos())
                .unwrap_or(0x9E37_79B9);
            key = nanos.wrapping_mul(0x85EB_CA6B).to_le_bytes();
        }
        MaskingKey::FourByte(key)
    }

    /// The key bytes, if masked.
    #[inline]
    #[must_use]
    pub const fn key(&self) -> Option<[u8; 4]> {
        match self {
            MaskingKey::NoMasking => None,
            MaskingKey::FourByte(key) => Some(*key),
        }
    }

    /// Number of bytes the key occupies on the wire.
    #[inline]
    #[must_use]
    pub const fn wire_len(&self) -> usize {
        match self {
            MaskingKey::NoMasking => 0,
            MaskingKey::FourByte(_) => 4,
        }
    }
}

impl From<[u8; 4]> for MaskingKey {
    fn from(key: [u8; 4]) -> Self {
        MaskingKey::FourByte(key)
    }
}

/// XOR `data` in place with `key`.
///
/// `offset` is the index of `data[0]` within the whole payload, so a payload
/// can be masked in several pieces: byte `i` of the payload is XORed with
/// `key[i % 4]`. Applying the same key twice restores the input.
#[inline]
pub fn apply_mask(data: &mut [u8], key: [u8; 4], offset: usize) {
    // Rotate so the key lines up with data[0] and the word loop can start at 0.
    let shift = offset % 4;
    let key = [
        key[shift],
        key[(shift + 1) % 4],
        key[(shift + 2) % 4],
        key[(shift + 3) % 4],
    ];
    let key_word = u32::from_ne_bytes(key);

    let mut chunks = data.chunks_exact_mut(4);
    for chunk in &mut chunks {
        let word = u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) ^ key_word;
        chunk.copy_from_slice(&word.to_ne_bytes());
    }
    for (i, byte) in chunks.into_remainder().iter_mut().enumerate() {
        *byte ^= key[i];
    }
}

/// Byte-at-a-time reference version of [`apply_mask`].
#[inline]
pub fn apply_mask_bytewise(data: &mut [u8], key: [u8; 4], offset: usize) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[(offset + i) % 4];
    }
}
