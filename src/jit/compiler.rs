//! Cranelift JIT host.
//!
//! Owns the `JITModule`, compiles one evaluator function per subtree root
//! and resolves the finished functions to raw pointers. While defining each
//! function the host also captures the finalized machine code and its
//! relocations, which is the payload the on-disk object cache stores; a
//! later process can then reload the evaluators without constructing any IR.

use std::collections::HashMap;
use std::time::Instant;

use cranelift::codegen::binemit::Reloc;
use cranelift::codegen::ir::ExternalName;
use cranelift::codegen::{Context, FinalizedRelocTarget};
use cranelift::prelude::*;
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{FuncId, Linkage, Module};
use tracing::debug;

use crate::jit::cache::{CachedFunction, CachedReloc, RelocKind};
use crate::jit::codegen::EvaluatorCodegen;
use crate::jit::layout::evaluator_roots;
use crate::jit::runtime;
use crate::jit::types::{JitError, JitResult};
use crate::tree::DecisionTree;

/// Signature of a compiled subtree evaluator.
///
/// Takes the input feature vector and returns the node index reached after
/// `function_depth` levels of traversal below the evaluator's root.
pub type SubtreeEvaluatorFn = unsafe extern "C" fn(*const f32) -> i64;

/// Linkage name of the evaluator rooted at a node.
pub fn evaluator_symbol(node_idx: i64) -> String {
    format!("nodeEvaluator_{node_idx}")
}

/// JIT compiler for decision-tree evaluators.
pub struct JitCompiler {
    module: JITModule,
    ln_func_id: FuncId,
    /// Linkage names of declared functions, keyed by func id, for mapping
    /// relocation targets back to symbol names.
    symbol_names: HashMap<u32, String>,
    triple: String,
}

impl JitCompiler {
    /// Creates a JIT module targeting the host CPU.
    pub fn new() -> JitResult<Self> {
        let mut flag_builder = settings::builder();
        flag_builder.set("opt_level", "speed")?;
        flag_builder.set("enable_verifier", "true")?;
        flag_builder.set("use_colocated_libcalls", "false")?;
        flag_builder.set("is_pic", "false")?;

        let isa_builder =
            cranelift_native::builder().map_err(|e| JitError::HostUnavailable(e.to_string()))?;
        let isa = isa_builder
            .finish(settings::Flags::new(flag_builder))
            .map_err(|e| JitError::Codegen(e.to_string()))?;
        let triple = isa.triple().to_string();

        let mut builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());
        runtime::register_runtime_symbols(&mut builder);
        let mut module = JITModule::new(builder);

        let mut ln_sig = module.make_signature();
        ln_sig.params.push(AbiParam::new(types::F32));
        ln_sig.returns.push(AbiParam::new(types::F32));
        let ln_func_id = module.declare_function(runtime::LN_SYMBOL, Linkage::Import, &ln_sig)?;

        let mut symbol_names = HashMap::new();
        symbol_names.insert(ln_func_id.as_u32(), runtime::LN_SYMBOL.to_string());

        Ok(Self {
            module,
            ln_func_id,
            symbol_names,
            triple,
        })
    }

    /// Target triple of the host ISA; part of the object cache key check.
    pub fn triple(&self) -> &str {
        &self.triple
    }

    /// Compiles every evaluator for `tree` and resolves their pointers.
    ///
    /// Consumes the compiler: the returned value owns the module and with it
    /// the executable memory the pointers refer to.
    pub fn compile_tree(
        mut self,
        tree: &DecisionTree,
        function_depth: u32,
        switch_depth: u32,
    ) -> JitResult<CompiledEvaluators> {
        let roots = evaluator_roots(tree.depth(), function_depth);
        debug!(
            target: "treejit::jit::compile",
            evaluators = roots.len(),
            nodes = tree.node_count(),
            function_depth,
            switch_depth,
            "composing evaluator functions"
        );
        let started = Instant::now();

        let pointer_type = self.module.target_config().pointer_type();
        let mut signature = self.module.make_signature();
        signature.params.push(AbiParam::new(pointer_type));
        signature.returns.push(AbiParam::new(types::I64));

        let mut func_ctx = FunctionBuilderContext::new();
        let mut declared = Vec::with_capacity(roots.len());
        let mut artifact = Some(Vec::with_capacity(roots.len()));

        for &root in &roots {
            let name = evaluator_symbol(root);
            let func_id = self
                .module
                .declare_function(&name, Linkage::Export, &signature)?;
            self.symbol_names.insert(func_id.as_u32(), name.clone());

            let mut ctx = self.module.make_context();
            ctx.func.signature = signature.clone();
            self.build_evaluator(&mut ctx, &mut func_ctx, tree, root, function_depth, switch_depth);
            self.module.define_function(func_id, &mut ctx)?;

            // Capture the finalized code for the object cache while the
            // context is still alive. One uncacheable function spoils the
            // whole artifact, never the compilation.
            if let Some(functions) = artifact.as_mut() {
                match self.capture_function(&name, &ctx) {
                    Some(function) => functions.push(function),
                    None => {
                        debug!(
                            target: "treejit::jit::compile",
                            function = %name,
                            "code not cacheable, skipping object capture"
                        );
                        artifact = None;
                    }
                }
            }

            declared.push((root, func_id));
        }

        debug!(
            target: "treejit::jit::compile",
            elapsed = ?started.elapsed(),
            "composed, submitting for code finalization"
        );
        self.module.finalize_definitions()?;

        let mut evaluators = HashMap::with_capacity(declared.len());
        for (root, func_id) in declared {
            let ptr = self.module.get_finalized_function(func_id);
            // SAFETY: the pointer is a finalized function with the exact
            // signature declared above; it stays valid while the module
            // held by CompiledEvaluators is alive.
            let evaluator = unsafe { std::mem::transmute::<*const u8, SubtreeEvaluatorFn>(ptr) };
            evaluators.insert(root, evaluator);
        }

        debug!(
            target: "treejit::jit::compile",
            elapsed = ?started.elapsed(),
            cacheable = artifact.is_some(),
            "collected evaluator pointers"
        );

        Ok(CompiledEvaluators {
            module: Some(self.module),
            evaluators,
            artifact,
            triple: self.triple,
        })
    }

    /// Builds the IR for one evaluator function.
    fn build_evaluator(
        &mut self,
        ctx: &mut Context,
        func_ctx: &mut FunctionBuilderContext,
        tree: &DecisionTree,
        root: i64,
        function_depth: u32,
        switch_depth: u32,
    ) {
        let mut builder = FunctionBuilder::new(&mut ctx.func, func_ctx);

        let entry = builder.create_block();
        builder.append_block_params_for_function_params(entry);
        builder.switch_to_block(entry);
        builder.seal_block(entry);
        let input_ptr = builder.block_params(entry)[0];

        let ln_func = self.module.declare_func_in_func(self.ln_func_id, builder.func);

        let mut codegen = EvaluatorCodegen::new(&mut builder, tree, input_ptr, ln_func);
        let continuation = codegen.emit_evaluator(root, function_depth, switch_depth);

        builder.ins().return_(&[continuation]);
        builder.finalize();
    }

    /// Extracts the defined function's machine code and relocations in the
    /// form the object cache stores. Returns None for relocation kinds or
    /// targets the cache loader does not handle.
    fn capture_function(&self, name: &str, ctx: &Context) -> Option<CachedFunction> {
        let compiled = ctx.compiled_code()?;
        let buffer = &compiled.buffer;

        let mut relocs = Vec::new();
        for reloc in buffer.relocs() {
            let kind = match reloc.kind {
                Reloc::Abs8 => RelocKind::Abs8,
                Reloc::X86CallPCRel4 => RelocKind::X86CallPcRel4,
                Reloc::Arm64Call => RelocKind::Arm64Call,
                _ => return None,
            };
            let symbol = match &reloc.target {
                FinalizedRelocTarget::ExternalName(ExternalName::User(user_ref)) => {
                    let user_name = ctx.func.params.user_named_funcs().get(*user_ref)?;
                    if user_name.namespace != 0 {
                        return None;
                    }
                    self.symbol_names.get(&user_name.index)?.clone()
                }
                _ => return None,
            };
            relocs.push(CachedReloc {
                offset: reloc.offset,
                kind,
                symbol,
                addend: reloc.addend,
            });
        }

        Some(CachedFunction {
            name: name.to_string(),
            alignment: buffer.alignment,
            code: buffer.data().to_vec(),
            relocs,
        })
    }
}

/// Finished compilation: evaluator pointers plus the module that owns their
/// code, and optionally the captured object-cache payload.
pub struct CompiledEvaluators {
    /// Keeps the executable memory alive; freed on drop.
    module: Option<JITModule>,
    evaluators: HashMap<i64, SubtreeEvaluatorFn>,
    artifact: Option<Vec<CachedFunction>>,
    triple: String,
}

impl Drop for CompiledEvaluators {
    fn drop(&mut self) {
        if let Some(module) = self.module.take() {
            // SAFETY: the evaluator pointers are dropped with this value;
            // nothing can call into the freed code afterwards.
            unsafe { module.free_memory() };
        }
    }
}

impl CompiledEvaluators {
    pub fn evaluators(&self) -> &HashMap<i64, SubtreeEvaluatorFn> {
        &self.evaluators
    }

    /// Captured machine code for the object cache, if every function came
    /// out in a cacheable shape.
    pub fn artifact(&self) -> Option<&[CachedFunction]> {
        self.artifact.as_deref()
    }

    pub fn triple(&self) -> &str {
        &self.triple
    }
}
