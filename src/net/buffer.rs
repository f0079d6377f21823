//! Fixed-capacity relay buffer.
//!
//! # Responsibilities
//! - Hold bytes read from one side of a relay pending transmission to the other
//! - Bound per-direction memory to a fixed, process-wide capacity
//! - Preserve byte order across partial writes
//!
//! # Design Decisions
//! - No growth: a full buffer suspends reading (backpressure), it is not an error
//! - Partial writes compact the remainder to the front of the buffer

/// A fixed-capacity byte buffer with a fill offset.
///
/// Invariant: `0 <= len() <= capacity()`.
pub struct RelayBuffer {
    data: Box<[u8]>,
    fill: usize,
}

impl RelayBuffer {
    /// Allocate a buffer with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            fill: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of bytes currently pending transmission.
    pub fn len(&self) -> usize {
        self.fill
    }

    pub fn is_empty(&self) -> bool {
        self.fill == 0
    }

    pub fn is_full(&self) -> bool {
        self.fill == self.data.len()
    }

    /// Bytes pending transmission.
    pub fn filled(&self) -> &[u8] {
        &self.data[..self.fill]
    }

    /// Writable region after the pending bytes.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.fill..]
    }

    /// Pending and spare regions as disjoint borrows, so a writer and a
    /// reader can be polled against the same buffer concurrently.
    pub fn split_mut(&mut self) -> (&[u8], &mut [u8]) {
        let (filled, spare) = self.data.split_at_mut(self.fill);
        (&filled[..], spare)
    }

    /// Copy at most `capacity - len` bytes from `src`; returns the number copied.
    pub fn append(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.data.len() - self.fill);
        self.data[self.fill..self.fill + n].copy_from_slice(&src[..n]);
        self.fill += n;
        n
    }

    /// Record `n` bytes written into the spare region by an external read.
    pub fn advance(&mut self, n: usize) {
        debug_assert!(self.fill + n <= self.data.len());
        self.fill += n;
    }

    /// Discard the first `n` pending bytes, shifting the remainder to the front.
    pub fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.fill);
        if n < self.fill {
            self.data.copy_within(n..self.fill, 0);
            self.fill -= n;
        } else {
            self.fill = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_respects_capacity() {
        let mut buf = RelayBuffer::new(8);
        assert_eq!(buf.capacity(), 8);
        assert_eq!(buf.append(b"hello"), 5);
        assert_eq!(buf.append(b"world"), 3);
        assert!(buf.is_full());
        assert_eq!(buf.filled(), b"hellowor");
        assert_eq!(buf.append(b"!"), 0);
    }

    #[test]
    fn consume_preserves_order() {
        let mut buf = RelayBuffer::new(16);
        buf.append(b"abcdefgh");
        buf.consume(3);
        assert_eq!(buf.filled(), b"defgh");
        buf.append(b"ij");
        assert_eq!(buf.filled(), b"defghij");
    }

    #[test]
    fn consume_all_resets() {
        let mut buf = RelayBuffer::new(4);
        buf.append(b"abcd");
        buf.consume(4);
        assert!(buf.is_empty());
        assert_eq!(buf.append(b"wxyz"), 4);
        assert_eq!(buf.filled(), b"wxyz");
    }

    #[test]
    fn split_regions_are_disjoint() {
        let mut buf = RelayBuffer::new(8);
        buf.append(b"abc");
        let (filled, spare) = buf.split_mut();
        assert_eq!(filled, b"abc");
        assert_eq!(spare.len(), 5);
    }

    #[test]
    fn advance_tracks_external_reads() {
        let mut buf = RelayBuffer::new(8);
        buf.spare_mut()[..4].copy_from_slice(b"data");
        buf.advance(4);
        assert_eq!(buf.filled(), b"data");
        assert_eq!(buf.spare_mut().len(), 4);
    }
}
