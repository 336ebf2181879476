use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{RacError, Result};
use crate::format::NO_DICTIONARY;

/// Core compression abstraction.
///
/// Each `Codec` implementation:
/// - Is identified by a stable numeric `id()` stored in every chunk record.
/// - Must compress/decompress individual chunks independently. No cross-chunk
///   state is permitted; this is what makes random access and parallel
///   decoding possible.
/// - May be seeded with a shared dictionary. The same dictionary bytes must be
///   supplied to `decompress` that were supplied to `compress`.
pub trait Codec: Send + Sync {
    /// Stable codec ID stored in the chunk records.
    fn id(&self) -> u32;

    /// Human-readable codec name for CLI display.
    fn name(&self) -> &'static str;

    /// Compress a single independent chunk.
    fn compress(&self, raw: &[u8], dictionary: Option<&[u8]>) -> anyhow::Result<Vec<u8>>;

    /// Decompress a single independent chunk.
    ///
    /// `expected_len` is the chunk's declared DSpace length. Implementations
    /// may use it as a capacity hint; the caller checks the returned length.
    fn decompress(
        &self,
        compressed: &[u8],
        expected_len: usize,
        dictionary: Option<&[u8]>,
    ) -> anyhow::Result<Vec<u8>>;
}

/// Maps codec ids to implementations. Built once at start-up and then only
/// read.
#[derive(Clone, Default)]
pub struct CodecRegistry {
    codecs: BTreeMap<u32, Arc<dyn Codec>>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `codec` under its own id, replacing any previous entry.
    pub fn register(&mut self, codec: Arc<dyn Codec>) -> &mut Self {
        self.codecs.insert(codec.id(), codec);
        self
    }

    pub fn with(mut self, codec: Arc<dyn Codec>) -> Self {
        self.register(codec);
        self
    }

    pub fn get(&self, id: u32) -> Option<&Arc<dyn Codec>> {
        self.codecs.get(&id)
    }

    /// Look up a codec named in a chunk record. An id nobody registered means
    /// the container cannot be read here.
    pub fn for_decode(&self, id: u32) -> Result<&Arc<dyn Codec>> {
        self.get(id)
            .ok_or_else(|| RacError::format(format!("unknown codec id {id}")))
    }

    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.codecs.keys().copied()
    }
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.codecs.iter().map(|(id, c)| (id, c.name())))
            .finish()
    }
}

/// Resolved shared dictionaries ("resources"), keyed by the id stored in
/// chunk records.
///
/// Loading them from wherever they live is the caller's job; the core only
/// needs the bytes. Entries are shared read-only across decode workers.
#[derive(Debug, Clone, Default)]
pub struct Dictionaries {
    entries: BTreeMap<u32, Arc<[u8]>>,
}

impl Dictionaries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from resources in order, assigning ids 1, 2, 3...
    pub fn from_ordered<I, B>(resources: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Arc<[u8]>>,
    {
        let mut dicts = Self::new();
        for (i, bytes) in resources.into_iter().enumerate() {
            dicts.entries.insert(i as u32 + 1, bytes.into());
        }
        dicts
    }

    /// Insert dictionary bytes under `id`. Id 0 is reserved for "none".
    pub fn insert(&mut self, id: u32, bytes: impl Into<Arc<[u8]>>) -> Result<()> {
        if id == NO_DICTIONARY {
            return Err(RacError::Config(
                "dictionary id 0 is reserved for 'no dictionary'".into(),
            ));
        }
        self.entries.insert(id, bytes.into());
        Ok(())
    }

    pub fn get(&self, id: u32) -> Option<&Arc<[u8]>> {
        self.entries.get(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve a record's dictionary id. A referenced id with no bytes here is
    /// a format error: the container cannot be decoded without it.
    pub fn for_decode(&self, id: u32) -> Result<Option<&[u8]>> {
        if id == NO_DICTIONARY {
            return Ok(None);
        }
        self.entries
            .get(&id)
            .map(|d| Some(&d[..]))
            .ok_or_else(|| RacError::format(format!("chunk references unknown dictionary id {id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Identity;

    impl Codec for Identity {
        fn id(&self) -> u32 {
            42
        }
        fn name(&self) -> &'static str {
            "identity"
        }
        fn compress(&self, raw: &[u8], _: Option<&[u8]>) -> anyhow::Result<Vec<u8>> {
            Ok(raw.to_vec())
        }
        fn decompress(&self, c: &[u8], _: usize, _: Option<&[u8]>) -> anyhow::Result<Vec<u8>> {
            Ok(c.to_vec())
        }
    }

    #[test]
    fn registry_looks_up_by_id() {
        let registry = CodecRegistry::new().with(Arc::new(Identity));
        assert_eq!(registry.get(42).unwrap().name(), "identity");
        assert!(matches!(registry.for_decode(7), Err(RacError::Format(_))));
    }

    #[test]
    fn dictionaries_are_numbered_from_one() {
        let dicts = Dictionaries::from_ordered(vec![b"first".to_vec(), b"second".to_vec()]);
        assert_eq!(&dicts.get(1).unwrap()[..], b"first");
        assert_eq!(&dicts.get(2).unwrap()[..], b"second");
        assert_eq!(dicts.for_decode(NO_DICTIONARY).unwrap(), None);
        assert!(matches!(dicts.for_decode(3), Err(RacError::Format(_))));
    }

    #[test]
    fn dictionary_id_zero_is_reserved() {
        let mut dicts = Dictionaries::new();
        assert!(dicts.insert(0, b"x".to_vec()).is_err());
    }
}
