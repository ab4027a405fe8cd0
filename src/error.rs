use thiserror::Error;

/// Errors that can occur while aggregating events, loading archives or
/// rendering heatmaps.
#[derive(Error, Debug)]
pub enum Error {
    /// A pixel fell outside every configured monitor rectangle. This can
    /// legitimately happen when events were produced against a stale
    /// monitor layout; the caller decides whether to skip or re-query.
    #[error("pixel ({0}, {1}) is not inside any monitor rectangle")]
    OutOfBounds(i32, i32),

    #[error("archive version mismatch (got v{got}, expected v{expected})")]
    IncompatibleVersion { got: u32, expected: u32 },

    #[error("unexpected record '{record}' in archive section '{section}'")]
    CorruptArchive { section: String, record: String },

    #[error("render requires input grids when width and height are not both given")]
    EmptyInput,

    #[error("positional arrays differ in shape ({0}x{1} vs {2}x{3})")]
    ShapeMismatch(usize, usize, usize, usize),

    #[error("unsupported request: {0}")]
    Unsupported(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("grid record codec error: {0}")]
    Codec(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
