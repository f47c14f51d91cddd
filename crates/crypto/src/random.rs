//! Operating-system randomness.

use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

/// `len` bytes from the OS CSPRNG.
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    OsRng.fill_bytes(&mut out);
    out
}

/// Random bytes intended for use as key material. Zeroed on drop.
pub fn random_secret(len: usize) -> Zeroizing<Vec<u8>> {
    let mut out = Zeroizing::new(vec![0u8; len]);
    OsRng.fill_bytes(&mut out);
    out
}

pub fn random_array<const N: usize>() -> [u8; N] {
    let mut out = [0u8; N];
    OsRng.fill_bytes(&mut out);
    out
}
