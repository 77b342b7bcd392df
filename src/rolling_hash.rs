//! Adler32-style rolling checksum used for block matching.
//!
//! Two 16-bit sums combined into one 32-bit digest. Sliding the window by
//! one byte is O(1): subtract the outgoing byte, add the incoming one.

const MOD_ADLER: u32 = 65521;

pub struct RollingHash {
    a: u32,
    b: u32,
    window: u32,
}

impl RollingHash {
    /// Checksum a full window of data.
    pub fn seed(block: &[u8]) -> Self {
        // Accumulate in u64 so the modular reduction happens once at the
        // end instead of per byte.
        let mut a: u64 = 1;
        let mut b: u64 = 0;
        for &byte in block {
            a += byte as u64;
            b += a;
        }
        Self {
            a: (a % MOD_ADLER as u64) as u32,
            b: (b % MOD_ADLER as u64) as u32,
            window: block.len() as u32,
        }
    }

    /// Shift the window one byte forward: `outgoing` leaves at the front,
    /// `incoming` enters at the back.
    pub fn slide(&mut self, outgoing: u8, incoming: u8) {
        let out = outgoing as u32;
        let inc = incoming as u32;

        self.a = (self.a + MOD_ADLER - out + inc) % MOD_ADLER;
        self.b =
            (self.b + MOD_ADLER - 1 + self.a - (out * self.window) % MOD_ADLER) % MOD_ADLER;
    }

    pub fn digest(&self) -> u32 {
        (self.b << 16) | self.a
    }
}
