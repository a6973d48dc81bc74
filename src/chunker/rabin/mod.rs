//! Rabin-Karp style rolling fingerprint over a fixed-size window.
//!
//! The fingerprint of a window `x_0 .. x_{w-1}` (oldest first) is
//!
//! ```text
//! fp = T[x_0]·B^(w-1) + T[x_1]·B^(w-2) + ... + T[x_{w-1}]   (mod 2^32)
//! ```
//!
//! where `T` is a fixed byte substitution table and `B` an odd base. Sliding the window by one
//! byte is `fp·B − T[out]·B^w + T[in]`, so every step is O(1). All arithmetic wraps at 32 bits,
//! which is what keeps the subtract/add update exact.
//!
//! The window starts out filled with zero bytes, so the fingerprint is always a pure function of
//! the last `w` bytes rolled since the last reset (zero padded at the start).

pub use consts::{BASE, MASKS, SUBSTITUTION};

mod consts;

#[derive(Debug, Clone)]
pub struct RollingHasher {
    /// Ring buffer holding the bytes currently inside the window.
    window: Box<[u8]>,
    /// Slot of the oldest byte, which is also where the next byte goes.
    pos: usize,
    fingerprint: u32,
    /// `B^w`, the weight the oldest byte carries after one more multiplication by `B`.
    out_factor: u32,
    /// Fingerprint of a window full of zero bytes.
    empty_fingerprint: u32,
}

impl RollingHasher {
    pub fn new(window_size: usize) -> Self {
        assert!(window_size > 0, "Window size must be non-zero");

        let mut out_factor = 1u32;
        let mut empty_fingerprint = 0u32;
        for _ in 0..window_size {
            empty_fingerprint = empty_fingerprint
                .wrapping_mul(BASE)
                .wrapping_add(SUBSTITUTION[0]);
            out_factor = out_factor.wrapping_mul(BASE);
        }

        Self {
            window: vec![0u8; window_size].into_boxed_slice(),
            pos: 0,
            fingerprint: empty_fingerprint,
            out_factor,
            empty_fingerprint,
        }
    }

    /// Push `byte` into the window, evicting the oldest one, and return the new fingerprint.
    #[inline]
    pub fn roll(&mut self, byte: u8) -> u32 {
        let out = self.window[self.pos];
        self.window[self.pos] = byte;
        self.pos += 1;
        if self.pos == self.window.len() {
            self.pos = 0;
        }

        self.fingerprint = self
            .fingerprint
            .wrapping_mul(BASE)
            .wrapping_sub(SUBSTITUTION[out as usize].wrapping_mul(self.out_factor))
            .wrapping_add(SUBSTITUTION[byte as usize]);
        self.fingerprint
    }

    pub fn fingerprint(&self) -> u32 {
        self.fingerprint
    }

    pub fn window_size(&self) -> usize {
        self.window.len()
    }

    /// Start over with an all-zero window.
    pub fn reset(&mut self) {
        self.window.fill(0);
        self.pos = 0;
        self.fingerprint = self.empty_fingerprint;
    }
}
