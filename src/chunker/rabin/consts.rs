/// Polynomial base of the rolling fingerprint. Odd, so multiplication is invertible mod 2^32.
pub const BASE: u32 = 0x0100_0193;

const TABLE_SEED: u64 = 0x6a09_e667_f3bc_c908;

/// Byte substitution table applied before hashing so that the low-order fingerprint bits are
/// well mixed even for low-entropy input such as ASCII text.
pub static SUBSTITUTION: [u32; 256] = substitution_table(TABLE_SEED);

/// SplitMix64 step, returns `(next_state, output)`.
const fn splitmix64(state: u64) -> (u64, u64) {
    let state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    (state, z ^ (z >> 31))
}

const fn substitution_table(seed: u64) -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut state = seed;
    let mut i = 0;
    while i < 256 {
        let (next, out) = splitmix64(state);
        state = next;
        table[i] = (out >> 32) as u32;
        i += 1;
    }
    table
}

/// Fingerprint masks indexed by the number of low-order bits they select.
pub const MASKS: [u32; 32] = masks();

const fn masks() -> [u32; 32] {
    let mut masks = [0u32; 32];
    let mut bits = 1;
    while bits < 32 {
        masks[bits] = (1u32 << bits) - 1;
        bits += 1;
    }
    masks
}
