//! WebSocket frame masking and key generation
//!
//! Masking XORs each payload byte with a rotating 4-byte key. The offset
//! variant keeps the rotation aligned when a frame payload is delivered in
//! multiple chunks.

use rand::RngCore;

/// Apply a WebSocket mask in place
///
/// XORs the data with the repeating 4-byte key. Used for both masking
/// (client sends) and unmasking (server reads).
#[inline]
pub fn apply_mask(data: &mut [u8], key: [u8; 4]) {
    if data.is_empty() {
        return;
    }

    let key_u64 = u64::from_ne_bytes([
        key[0], key[1], key[2], key[3], key[0], key[1], key[2], key[3],
    ]);

    let mut chunks = data.chunks_exact_mut(8);
    for chunk in &mut chunks {
        let word = u64::from_ne_bytes((&*chunk).try_into().expect("8-byte chunk")) ^ key_u64;
        chunk.copy_from_slice(&word.to_ne_bytes());
    }

    // Tail starts at a multiple of 8, so the key rotation restarts cleanly
    for (i, byte) in chunks.into_remainder().iter_mut().enumerate() {
        *byte ^= key[i & 3];
    }
}

/// Apply a mask starting at a byte offset into the payload
///
/// Rotates the key by `offset mod 4` so that masking a payload in chunks
/// with a running offset produces the same bytes as masking it in one shot.
#[inline]
pub fn apply_mask_offset(data: &mut [u8], key: [u8; 4], offset: usize) {
    let shift = offset & 3;
    if shift == 0 {
        apply_mask(data, key);
        return;
    }

    let rotated = [
        key[shift & 3],
        key[(shift + 1) & 3],
        key[(shift + 2) & 3],
        key[(shift + 3) & 3],
    ];
    apply_mask(data, rotated);
}

/// Generate a random 4-byte mask key for a client frame
///
/// Keys come from the thread-local CSPRNG, which is seeded from the OS
/// entropy source and reseeded periodically.
#[inline]
pub fn generate_mask() -> [u8; 4] {
    let mut key = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

/// Generate the 16-byte handshake nonce for `Sec-WebSocket-Key`
#[inline]
pub fn generate_nonce() -> [u8; 16] {
    let mut nonce = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}
