//! On-disk object cache for compiled evaluators.
//!
//! Compiling a deep tree dominates startup, so the finished machine code is
//! cached next to a record of the tree it was generated from. Two files
//! form one cache entry, both named after the compilation key:
//!
//! ```text
//! tree_d<depth>_f<features>.t                      tree node data
//! tree_d<depth>_f<features>_fd<fd>_sd<sd>.o        object code
//! ```
//!
//! Each file is a 16-byte header (magic, format version, payload kind,
//! payload size, CRC32) followed by a Postcard-encoded payload:
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//! 0       4     Magic ("TJIT")
//! 4       1     Format version
//! 5       1     Payload kind (0 = tree, 1 = object)
//! 6       2     Reserved
//! 8       4     Payload size (bytes, little-endian)
//! 12      4     CRC32 checksum of payload
//! ```
//!
//! A hit requires both files present, the stored tree equal to the tree
//! being compiled, and the stored target triple equal to the host's. The
//! object payload carries raw post-codegen bytes with their relocations;
//! loading copies them into anonymous executable memory and patches the
//! relocations against the runtime symbol table, with no IR construction
//! and no code generation. The cache is machine-local by design.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapMut};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::jit::runtime;
use crate::jit::types::{JitError, JitResult};
use crate::tree::{DecisionTree, TreeNode};

const MAGIC: &[u8; 4] = b"TJIT";
const CURRENT_VERSION: u8 = 1;
const HEADER_SIZE: usize = 16;

const KIND_TREE: u8 = 0;
const KIND_OBJECT: u8 = 1;

/// Name of the cached tree file for a (depth, feature count) key.
pub fn tree_file_name(depth: u32, feature_count: u32) -> String {
    format!("tree_d{depth}_f{feature_count}.t")
}

/// Name of the cached object file for a full compilation key.
pub fn object_file_name(
    depth: u32,
    feature_count: u32,
    function_depth: u32,
    switch_depth: u32,
) -> String {
    format!("tree_d{depth}_f{feature_count}_fd{function_depth}_sd{switch_depth}.o")
}

/// Relocation kinds the cache records and the loader can apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelocKind {
    /// 8-byte absolute address.
    Abs8,
    /// x86-64 4-byte PC-relative call displacement.
    X86CallPcRel4,
    /// aarch64 26-bit PC-relative branch (bl).
    Arm64Call,
}

/// One relocation site within a cached function's code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedReloc {
    /// Byte offset of the relocation site within the function.
    pub offset: u32,
    pub kind: RelocKind,
    /// Name of the referenced symbol, resolved at load time.
    pub symbol: String,
    pub addend: i64,
}

/// Post-codegen machine code of one evaluator function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedFunction {
    /// Linkage name, `nodeEvaluator_<idx>`.
    pub name: String,
    pub alignment: u32,
    pub code: Vec<u8>,
    pub relocs: Vec<CachedReloc>,
}

#[derive(Serialize, Deserialize)]
struct TreePayload {
    depth: u32,
    nodes: Vec<TreeNode>,
}

#[derive(Serialize, Deserialize)]
struct ObjectPayload {
    /// Target triple the code was generated for.
    triple: String,
    functions: Vec<CachedFunction>,
}

/// One cache entry: the pair of file paths for a compilation key.
pub struct ObjectCache {
    tree_path: PathBuf,
    object_path: PathBuf,
}

impl ObjectCache {
    pub fn new(
        dir: &Path,
        depth: u32,
        feature_count: u32,
        function_depth: u32,
        switch_depth: u32,
    ) -> Self {
        Self {
            tree_path: dir.join(tree_file_name(depth, feature_count)),
            object_path: dir.join(object_file_name(
                depth,
                feature_count,
                function_depth,
                switch_depth,
            )),
        }
    }

    /// Attempts to load the cached evaluators for `tree`.
    ///
    /// `Ok(None)` is a plain miss (either file absent). Errors mean the
    /// entry exists but is unusable (corrupt, stale, wrong target); callers
    /// recover by recompiling.
    pub fn load(&self, tree: &DecisionTree, host_triple: &str) -> JitResult<Option<LoadedCode>> {
        if !self.tree_path.exists() || !self.object_path.exists() {
            return Ok(None);
        }

        let cached_tree: TreePayload = read_payload(&self.tree_path, KIND_TREE)?;
        if cached_tree.depth != tree.depth() || cached_tree.nodes != tree.nodes() {
            return Err(JitError::StaleTree);
        }

        let object: ObjectPayload = read_payload(&self.object_path, KIND_OBJECT)?;
        if object.triple != host_triple {
            return Err(JitError::TripleMismatch {
                cached: object.triple,
                host: host_triple.to_string(),
            });
        }

        debug!(
            target: "treejit::jit::cache",
            path = %self.object_path.display(),
            functions = object.functions.len(),
            "loading evaluators from object cache"
        );
        LoadedCode::link(&object.functions).map(Some)
    }

    /// Writes both cache files for `tree` and its compiled functions.
    pub fn store(
        &self,
        tree: &DecisionTree,
        triple: &str,
        functions: &[CachedFunction],
    ) -> JitResult<()> {
        let tree_payload = TreePayload {
            depth: tree.depth(),
            nodes: tree.nodes().to_vec(),
        };
        write_payload(&self.tree_path, KIND_TREE, &tree_payload)?;

        let object_payload = ObjectPayload {
            triple: triple.to_string(),
            functions: functions.to_vec(),
        };
        write_payload(&self.object_path, KIND_OBJECT, &object_payload)?;

        debug!(
            target: "treejit::jit::cache",
            path = %self.object_path.display(),
            functions = functions.len(),
            "cached compiled evaluators"
        );
        Ok(())
    }
}

fn write_payload<T: Serialize>(path: &Path, kind: u8, payload: &T) -> JitResult<()> {
    let body = postcard::to_allocvec(payload)?;

    let mut bytes = Vec::with_capacity(HEADER_SIZE + body.len());
    bytes.extend_from_slice(MAGIC);
    bytes.push(CURRENT_VERSION);
    bytes.push(kind);
    bytes.extend_from_slice(&[0, 0]);
    bytes.extend_from_slice(&(body.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
    bytes.extend_from_slice(&body);

    fs::write(path, bytes)?;
    Ok(())
}

fn read_payload<T: for<'de> Deserialize<'de>>(path: &Path, kind: u8) -> JitResult<T> {
    let bytes = fs::read(path)?;
    if bytes.len() < HEADER_SIZE || &bytes[0..4] != MAGIC {
        return Err(JitError::NotAnArtifact);
    }
    if bytes[4] > CURRENT_VERSION {
        return Err(JitError::UnsupportedVersion(bytes[4]));
    }
    if bytes[5] != kind {
        return Err(JitError::NotAnArtifact);
    }

    let payload_size =
        u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
    let expected = HEADER_SIZE + payload_size;
    if bytes.len() < expected {
        return Err(JitError::Truncated {
            expected,
            actual: bytes.len(),
        });
    }

    let body = &bytes[HEADER_SIZE..expected];
    let checksum = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);
    let actual = crc32fast::hash(body);
    if actual != checksum {
        return Err(JitError::ChecksumMismatch {
            expected: checksum,
            actual,
        });
    }

    Ok(postcard::from_bytes(body)?)
}

/// Cached machine code mapped into executable memory.
///
/// Owns the mapping; evaluator pointers handed out via [`Self::symbol`] are
/// borrows from it and die with it.
pub struct LoadedCode {
    map: Mmap,
    symbols: HashMap<String, usize>,
}

impl LoadedCode {
    /// Copies the functions into fresh anonymous memory, applies their
    /// relocations and seals the mapping read+execute.
    fn link(functions: &[CachedFunction]) -> JitResult<LoadedCode> {
        let mut offsets = Vec::with_capacity(functions.len());
        let mut total = 0usize;
        for function in functions {
            let align = function.alignment.max(16) as usize;
            total = (total + align - 1) & !(align - 1);
            offsets.push(total);
            total += function.code.len();
        }

        let mut map = MmapMut::map_anon(total.max(1))?;
        for (function, &offset) in functions.iter().zip(&offsets) {
            map[offset..offset + function.code.len()].copy_from_slice(&function.code);
        }

        let base = map.as_ptr() as usize;
        for (function, &offset) in functions.iter().zip(&offsets) {
            for reloc in &function.relocs {
                let target = runtime::resolve(&reloc.symbol)
                    .ok_or_else(|| JitError::UnknownSymbol(reloc.symbol.clone()))?;
                apply_reloc(&mut map, base, offset, reloc, target as usize)?;
            }
        }

        // mprotect in place: the mapping keeps its address, so the
        // pc-relative patches above stay valid.
        let map = map.make_exec()?;

        let symbols = functions
            .iter()
            .zip(&offsets)
            .map(|(function, &offset)| (function.name.clone(), offset))
            .collect();
        Ok(LoadedCode { map, symbols })
    }

    /// Entry point of a loaded function, if present.
    pub fn symbol(&self, name: &str) -> Option<*const u8> {
        let offset = *self.symbols.get(name)?;
        // SAFETY: offset is within the mapping by construction.
        Some(unsafe { self.map.as_ptr().add(offset) })
    }
}

/// Patches one relocation site, mirroring how the JIT links the same code
/// in memory.
fn apply_reloc(
    code: &mut [u8],
    base: usize,
    function_offset: usize,
    reloc: &CachedReloc,
    target: usize,
) -> JitResult<()> {
    let site = function_offset + reloc.offset as usize;
    let width = match reloc.kind {
        RelocKind::Abs8 => 8,
        RelocKind::X86CallPcRel4 | RelocKind::Arm64Call => 4,
    };
    if site + width > code.len() {
        return Err(JitError::Truncated {
            expected: site + width,
            actual: code.len(),
        });
    }

    let what = (target as i64).wrapping_add(reloc.addend);
    let at = (base + site) as i64;

    match reloc.kind {
        RelocKind::Abs8 => {
            code[site..site + 8].copy_from_slice(&what.to_le_bytes());
        }
        RelocKind::X86CallPcRel4 => {
            let pcrel = i32::try_from(what - at)
                .map_err(|_| JitError::RelocOutOfRange(reloc.symbol.clone()))?;
            code[site..site + 4].copy_from_slice(&pcrel.to_le_bytes());
        }
        RelocKind::Arm64Call => {
            let diff = what - at;
            if diff & 3 != 0 || diff < -(1 << 27) || diff >= 1 << 27 {
                return Err(JitError::RelocOutOfRange(reloc.symbol.clone()));
            }
            let insn = u32::from_le_bytes([
                code[site],
                code[site + 1],
                code[site + 2],
                code[site + 3],
            ]);
            let imm26 = ((diff >> 2) as u32) & 0x03FF_FFFF;
            code[site..site + 4].copy_from_slice(&(insn | imm26).to_le_bytes());
        }
    }
    Ok(())
}
