//! JIT Runtime Support Functions
//!
//! Helpers callable from generated machine code, using the C ABI for a
//! stable calling convention. Cranelift has native instructions for every
//! predicate operation except the natural logarithm, which calls out here.
//!
//! The same symbol table serves two paths: `register_runtime_symbols` wires
//! the functions into the in-process JIT before module creation, and
//! `resolve` answers relocation lookups when cached object code is loaded
//! back from disk.

use cranelift_jit::JITBuilder;

/// Symbol name of the natural-log helper, as referenced by generated code.
pub const LN_SYMBOL: &str = "jit_runtime_ln";

/// Natural logarithm over a single f32 feature value.
///
/// NaN and negative inputs produce NaN, which the ordered comparisons in
/// generated code route to the false branch, matching the interpreter.
#[no_mangle]
pub extern "C" fn jit_runtime_ln(value: f32) -> f32 {
    value.ln()
}

/// Registers every runtime helper with a JIT builder.
pub(crate) fn register_runtime_symbols(builder: &mut JITBuilder) {
    builder.symbol(LN_SYMBOL, jit_runtime_ln as *const u8);
}

/// Resolves a runtime symbol name to its in-process address.
pub(crate) fn resolve(name: &str) -> Option<*const u8> {
    match name {
        LN_SYMBOL => Some(jit_runtime_ln as *const u8),
        _ => None,
    }
}
