//! JIT Type Definitions
//!
//! Error and result types shared across the JIT subsystem, plus the width
//! limit that ties the condition-vector representation to the switch scheme.

use cranelift::codegen::settings::SetError;
use thiserror::Error;

/// Maximum number of tree levels a single condition-vector switch may
/// collapse.
///
/// A subtree of `k` levels contributes `2^k - 1` predicate bits to the
/// condition vector. The vector is carried in an i64, so `k <= 6`
/// (63 bits) is the widest switch the emitter accepts.
pub const MAX_SWITCH_LEVELS: u32 = 6;

/// Result alias for JIT operations.
pub type JitResult<T> = Result<T, JitError>;

/// Errors surfaced by compilation, caching and loading of evaluators.
///
/// Contract violations (sizes, depth divisibility) are panics at
/// construction, not `JitError`s; everything operational flows through here.
#[derive(Debug, Error)]
pub enum JitError {
    /// The host CPU is not a supported JIT target.
    #[error("host target unavailable: {0}")]
    HostUnavailable(String),

    /// Cranelift code generation failed.
    #[error("Cranelift codegen: {0}")]
    Codegen(String),

    /// Cranelift module operation failed (declare/define/finalize).
    #[error("Cranelift module: {0}")]
    Module(#[from] cranelift_module::ModuleError),

    /// Invalid Cranelift settings combination.
    #[error("settings: {0}")]
    Settings(#[from] SetError),

    /// A cache file does not carry the expected magic bytes.
    #[error("cache file is not a treejit artifact")]
    NotAnArtifact,

    /// A cache file was written by a newer format revision.
    #[error("cache artifact uses unsupported format version {0}")]
    UnsupportedVersion(u8),

    /// A cache file is shorter than its header claims.
    #[error("cache file truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// Cache payload bytes do not match the recorded checksum.
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// A cached object was produced for a different target.
    #[error("cached object targets {cached}, host is {host}")]
    TripleMismatch { cached: String, host: String },

    /// The cached tree file does not describe the tree being compiled.
    #[error("cached tree data does not match the tree being compiled")]
    StaleTree,

    /// Cached code references a symbol the runtime does not provide.
    #[error("cached code references unknown symbol `{0}`")]
    UnknownSymbol(String),

    /// A required evaluator symbol is missing from the cached object.
    #[error("evaluator symbol `{0}` missing from cached object")]
    MissingEvaluator(String),

    /// A relocation cannot be applied at the loaded address.
    #[error("relocation against `{0}` out of range")]
    RelocOutOfRange(String),

    /// Postcard encoding or decoding of a cache payload failed.
    #[error("cache payload codec: {0}")]
    Codec(#[from] postcard::Error),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
