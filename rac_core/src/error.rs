use thiserror::Error;

/// Every failure the core can surface.
///
/// `Format` is fatal for the whole container, `Range` and `Codec` only for the
/// request that hit them. Nothing here is retried by the core.
#[derive(Debug, Error)]
pub enum RacError {
    /// Malformed or corrupt index, broken table invariant, or a codec /
    /// dictionary id the reader does not know.
    #[error("format error: {0}")]
    Format(String),

    /// A decode request that does not fit inside `[0, total)`.
    #[error("range error: {start}..{} outside decompressed size {total}", display_end(.end))]
    Range {
        start: u64,
        end: Option<u64>,
        total: u64,
    },

    /// A chunk failed to compress or decompress, or decompressed to the wrong
    /// length.
    #[error("codec error in chunk {chunk} (DSpace offset {d_offset}): {source}")]
    Codec {
        chunk: usize,
        d_offset: u64,
        #[source]
        source: anyhow::Error,
    },

    /// Invalid encode or decode options.
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn display_end(end: &Option<u64>) -> String {
    end.map(|e| e.to_string()).unwrap_or_default()
}

impl RacError {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        RacError::Format(msg.into())
    }

    pub(crate) fn codec(chunk: usize, d_offset: u64, source: anyhow::Error) -> Self {
        RacError::Codec {
            chunk,
            d_offset,
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, RacError>;
