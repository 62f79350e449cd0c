//! Helpers for building memory images in tests.
#![doc(hidden)]

use rand::prelude::*;
use zerocopy::IntoBytes;

pub fn random_i8(rng: &mut impl Rng, len: usize) -> Vec<i8> {
    (0..len).map(|_| rng.random::<i8>()).collect()
}

/// Copy signed elements into `image` at `addr`, growing it as needed.
pub fn place_i8(image: &mut Vec<u8>, addr: usize, values: &[i8]) {
    let end = addr + values.len();
    if image.len() < end {
        image.resize(end, 0);
    }
    image[addr..end].copy_from_slice(values.as_bytes());
}
