use std::io::{self, Write};

/// Scratch storage for chunk bytes while an index-at-start container is being
/// encoded.
///
/// The index goes first but its length depends on the chunk count, which is
/// only known once the input is exhausted. Until then the compressed chunk
/// stream is appended here, and [`Spill::replay`] copies it to the real output
/// after the index. Whether that lives in memory or on disk is the caller's
/// choice.
pub trait Spill: Write + Send {
    /// Bytes appended so far.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy everything appended so far, in order, into `out`.
    fn replay(&mut self, out: &mut dyn Write) -> io::Result<u64>;
}

/// Keeps the whole chunk stream in a `Vec`.
#[derive(Debug, Default)]
pub struct MemorySpill {
    buf: Vec<u8>,
}

impl MemorySpill {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Write for MemorySpill {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Spill for MemorySpill {
    fn len(&self) -> u64 {
        self.buf.len() as u64
    }

    fn replay(&mut self, out: &mut dyn Write) -> io::Result<u64> {
        out.write_all(&self.buf)?;
        Ok(self.buf.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_spill_replays_in_order() {
        let mut spill = MemorySpill::new();
        spill.write_all(b"abc").unwrap();
        spill.write_all(b"def").unwrap();
        assert_eq!(Spill::len(&spill), 6);

        let mut out = Vec::new();
        assert_eq!(spill.replay(&mut out).unwrap(), 6);
        assert_eq!(out, b"abcdef");
    }
}
