//! K-mer packing and orientation
//!
//! A k-mer is packed two bits per base into a `u64`, first base in the
//! highest-order pair, so the numeric order of packed values follows the
//! base order of the encoding (A < C < T < G per position). All sorted
//! streams and index files use this numeric order.
//!
//! The k-mer size is a runtime property here. Index files carry their k in
//! the header and operations mix files whose k is only known once they are
//! opened, so the codec holds k as a field rather than a const parameter.

use crate::constants::{is_valid_k, MAX_K};
use crate::encoding::{decode_base, encode_base, EncodingError};

/// How a scanned window is mapped to the key that gets counted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
    /// Count the window as read
    Forward,
    /// Count the reverse complement of the window
    Reverse,
    /// Count the numeric minimum of the window and its reverse complement
    #[default]
    Canonical,
}

impl Orientation {
    /// Stable single-byte code used in index headers
    #[inline]
    pub fn code(self) -> u8 {
        match self {
            Orientation::Forward => 0,
            Orientation::Reverse => 1,
            Orientation::Canonical => 2,
        }
    }

    /// Inverse of [`code`](Self::code)
    #[inline]
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Orientation::Forward),
            1 => Some(Orientation::Reverse),
            2 => Some(Orientation::Canonical),
            _ => None,
        }
    }

    /// Lowercase name as it appears in logs and the CLI
    pub fn as_str(self) -> &'static str {
        match self {
            Orientation::Forward => "forward",
            Orientation::Reverse => "reverse",
            Orientation::Canonical => "canonical",
        }
    }
}

/// Packs, unpacks and orients k-mers for one fixed k
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KmerCodec {
    k: u32,
    mask: u64,
}

impl KmerCodec {
    /// Create a codec for k-mers of size `k`
    ///
    /// # Errors
    /// Returns an error if `k` is outside 1..=32.
    pub fn new(k: u32) -> Result<Self, EncodingError> {
        if !is_valid_k(k) {
            return Err(EncodingError::UnsupportedK(k));
        }
        let mask = if k == MAX_K {
            u64::MAX
        } else {
            (1u64 << (2 * k)) - 1
        };
        Ok(Self { k, mask })
    }

    /// The k-mer size this codec packs
    #[inline]
    pub fn k(&self) -> u32 {
        self.k
    }

    /// Mask covering the low 2k bits of a packed key
    #[inline]
    pub fn mask(&self) -> u64 {
        self.mask
    }

    /// Pack a DNA window of exactly k bases
    ///
    /// # Errors
    /// Returns an error if the slice length is not k or a byte is not an
    /// A/C/G/T in either case.
    pub fn encode(&self, window: &[u8]) -> Result<u64, EncodingError> {
        if window.len() != self.k as usize {
            return Err(EncodingError::LengthMismatch {
                expected: self.k as usize,
                actual: window.len(),
            });
        }
        let mut bits = 0u64;
        for &base in window {
            bits = (bits << 2) | encode_base(base)? as u64;
        }
        Ok(bits)
    }

    /// Unpack a key back to an uppercase DNA string
    pub fn decode(&self, kmer: u64) -> String {
        let mut out = String::with_capacity(self.k as usize);
        for i in (0..self.k).rev() {
            let bits = ((kmer >> (2 * i)) & 0b11) as u8;
            out.push(decode_base(bits) as char);
        }
        out
    }

    /// Reverse complement of a packed key
    ///
    /// Bit-parallel: complement every base with one XOR, reverse all 32
    /// two-bit slots via pair/nibble/byte swaps, then right-align the k
    /// slots that carry data.
    #[inline]
    pub fn reverse_complement(&self, kmer: u64) -> u64 {
        let mut x = kmer ^ 0xAAAA_AAAA_AAAA_AAAAu64;
        x = ((x >> 2) & 0x3333_3333_3333_3333u64) | ((x & 0x3333_3333_3333_3333u64) << 2);
        x = ((x >> 4) & 0x0F0F_0F0F_0F0F_0F0Fu64) | ((x & 0x0F0F_0F0F_0F0F_0F0Fu64) << 4);
        x = x.swap_bytes();
        x >> (64 - 2 * self.k)
    }

    /// Canonical form: the numeric minimum of a key and its reverse
    /// complement. Palindromic k-mers map to themselves.
    #[inline]
    pub fn canonical(&self, kmer: u64) -> u64 {
        let rc = self.reverse_complement(kmer);
        kmer.min(rc)
    }

    /// Map a key to the requested orientation
    #[inline]
    pub fn orient(&self, kmer: u64, orientation: Orientation) -> u64 {
        match orientation {
            Orientation::Forward => kmer,
            Orientation::Reverse => self.reverse_complement(kmer),
            Orientation::Canonical => self.canonical(kmer),
        }
    }

    /// Visit every oriented window of a sequence
    ///
    /// Windows never span sequence records; a sequence shorter than k
    /// yields nothing. The forward and reverse-complement keys are kept
    /// rolling so each base costs a pair of shifts, not a re-encode.
    ///
    /// # Errors
    /// Returns an error on the first byte that is not an A/C/G/T.
    pub fn for_each_window<F>(
        &self,
        sequence: &[u8],
        orientation: Orientation,
        mut emit: F,
    ) -> Result<(), EncodingError>
    where
        F: FnMut(u64),
    {
        let k = self.k as usize;
        let rc_shift = 2 * (self.k - 1);
        let mut fwd = 0u64;
        let mut rc = 0u64;
        for (i, &base) in sequence.iter().enumerate() {
            let code = encode_base(base)? as u64;
            fwd = ((fwd << 2) | code) & self.mask;
            rc = (rc >> 2) | ((code ^ 0b10) << rc_shift);
            if i + 1 >= k {
                let key = match orientation {
                    Orientation::Forward => fwd,
                    Orientation::Reverse => rc,
                    Orientation::Canonical => fwd.min(rc),
                };
                emit(key);
            }
        }
        Ok(())
    }

    /// Collect every oriented window of a sequence
    ///
    /// # Errors
    /// Returns an error on the first byte that is not an A/C/G/T.
    pub fn windows(
        &self,
        sequence: &[u8],
        orientation: Orientation,
    ) -> Result<Vec<u64>, EncodingError> {
        let mut out = Vec::with_capacity(sequence.len().saturating_sub(self.k as usize - 1));
        self.for_each_window(sequence, orientation, |key| out.push(key))?;
        Ok(out)
    }
}
