//! Probe injection: one `call __edgecov_hit(id)` at the entry of every
//! eligible basic block.
//!
//! Instrumentation targets block *entries*, node coverage of the control
//! flow graph, the runtime's 2-gram hash turns consecutive entries back
//! into edges.

use edgecov_bolts::Error;

use crate::{
    coverage::PROBE_SYMBOL,
    ids::EdgeIdPool,
    ir::{Instruction, Module, Signature, Value},
};

/// Name prefixes of intrinsic and runtime symbols that must never be
/// instrumented: sanitizer runtimes, our own runtime, C++ ABI plumbing,
/// compiler builtins.
pub const INTRINSIC_PREFIXES: &[&str] = &[
    "__asan_",
    "asan.",
    "__sanitizer_",
    "__edgecov_",
    "__cxx_",
    "__cxa_",
    "llvm.",
];

/// The probe signature: no return value, one u32 edge id.
pub const PROBE_SIGNATURE: Signature = Signature {
    void_ret: true,
    params: 1,
};

#[inline]
fn is_intrinsic_name(name: &str) -> bool {
    INTRINSIC_PREFIXES
        .iter()
        .any(|prefix| name.starts_with(prefix))
}

/// What one injection pass did to a module.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InjectionSummary {
    /// Number of blocks that received a probe call
    pub instrumented_blocks: usize,
    /// Functions skipped as intrinsics or bodyless declarations
    pub skipped_functions: usize,
    /// Whether the id pool ran dry mid-walk, leaving the rest of the
    /// module uninstrumented
    pub exhausted: bool,
}

/// Walks modules and plants probe calls, consuming ids from its pool.
/// One injector (and one pool) per instrumentation run, so ids stay
/// pairwise distinct across all modules of that run.
#[derive(Debug)]
pub struct Injector {
    pool: EdgeIdPool,
}

impl Injector {
    /// An injector drawing from the given pool
    #[must_use]
    pub fn new(pool: EdgeIdPool) -> Self {
        Self { pool }
    }

    /// An injector with a freshly shuffled pool sized for the full bitmap
    #[must_use]
    pub fn with_default_pool() -> Self {
        Self::new(EdgeIdPool::with_default_capacity())
    }

    /// Ids not yet planted
    #[must_use]
    pub fn remaining_ids(&self) -> usize {
        self.pool.remaining()
    }

    /// Instrument every eligible basic block of `module`.
    ///
    /// Pool exhaustion mid-walk is not an error: injection stops, blocks
    /// already instrumented stay instrumented, and the summary reports
    /// `exhausted` so the caller can log the coverage gap.
    pub fn instrument_module(&mut self, module: &mut Module) -> Result<InjectionSummary, Error> {
        module.get_or_insert_declaration(PROBE_SYMBOL, PROBE_SIGNATURE)?;

        let module_name = module.name().to_string();
        let mut summary = InjectionSummary::default();

        'functions: for func in module.functions_mut() {
            if is_intrinsic_name(&func.name) {
                log::debug!("skipping intrinsic/runtime function @{}", func.name);
                summary.skipped_functions += 1;
                continue;
            }
            if func.is_declaration() {
                log::debug!("skipping external declaration @{}", func.name);
                summary.skipped_functions += 1;
                continue;
            }
            for block in &mut func.blocks {
                let Some(id) = self.pool.next_id() else {
                    summary.exhausted = true;
                    log::warn!(
                        "edge id pool exhausted after {} blocks; leaving the rest of module `{module_name}` uninstrumented",
                        summary.instrumented_blocks
                    );
                    break 'functions;
                };
                let at = block.first_insertion_point();
                block.insert_before(
                    at,
                    Instruction::Call {
                        callee: PROBE_SYMBOL.into(),
                        args: vec![Value::Const(u64::from(id.0))],
                    },
                );
                summary.instrumented_blocks += 1;
            }
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use edgecov_bolts::rands::StdRand;
    use hashbrown::HashSet;

    use super::Injector;
    use crate::{
        coverage::PROBE_SYMBOL,
        ids::EdgeIdPool,
        ir::{parse_module, Instruction, Module, Value},
    };

    const INPUT: &str = r"
module demo

declare @putchar(1)

func @__sanitizer_cov_helper(0) {
entry:
  ret
}

func @main(0) {
entry:
  op load %a
  call @putchar(65)
  br loop
loop:
  %x = phi [ 0, entry ], [ %y, loop ]
  op add %y %x 1
  br loop exit
exit:
  ret
}
";

    fn probe_ids(module: &Module) -> Vec<u64> {
        let mut ids = Vec::new();
        for func in module.functions() {
            for block in &func.blocks {
                for instruction in &block.instructions {
                    if let Instruction::Call { callee, args } = instruction {
                        if callee == PROBE_SYMBOL {
                            match args[..] {
                                [Value::Const(id)] => ids.push(id),
                                _ => panic!("probe call with unexpected args"),
                            }
                        }
                    }
                }
            }
        }
        ids
    }

    #[test]
    fn test_every_eligible_block_is_instrumented_once() {
        let mut module = parse_module(INPUT).unwrap();
        let mut injector = Injector::new(EdgeIdPool::new(64, &mut StdRand::with_seed(7)));
        let summary = injector.instrument_module(&mut module).unwrap();

        // @main has 3 blocks; the declaration and the sanitizer helper are skipped
        assert_eq!(summary.instrumented_blocks, 3);
        assert_eq!(summary.skipped_functions, 3); // putchar, sanitizer helper, probe decl
        assert!(!summary.exhausted);

        let ids = probe_ids(&module);
        assert_eq!(ids.len(), 3);
        let distinct: HashSet<u64> = ids.iter().copied().collect();
        assert_eq!(distinct.len(), 3, "edge ids must be pairwise distinct");
        assert!(ids.iter().all(|id| *id < 64));

        // the sanitizer helper stayed bare
        let helper = module.get_function("__sanitizer_cov_helper").unwrap();
        assert_eq!(helper.blocks[0].instructions.len(), 1);
    }

    #[test]
    fn test_probe_lands_after_phis() {
        let mut module = parse_module(INPUT).unwrap();
        let mut injector = Injector::new(EdgeIdPool::new(64, &mut StdRand::with_seed(7)));
        injector.instrument_module(&mut module).unwrap();

        let main = module.get_function("main").unwrap();
        let entry = &main.blocks[0];
        assert!(
            matches!(&entry.instructions[0], Instruction::Call { callee, .. } if callee == PROBE_SYMBOL)
        );
        let body = &main.blocks[1];
        assert!(body.instructions[0].is_phi());
        assert!(
            matches!(&body.instructions[1], Instruction::Call { callee, .. } if callee == PROBE_SYMBOL)
        );
    }

    #[test]
    fn test_instrumented_module_stays_structurally_valid() {
        let mut module = parse_module(INPUT).unwrap();
        let mut injector = Injector::new(EdgeIdPool::new(64, &mut StdRand::with_seed(7)));
        injector.instrument_module(&mut module).unwrap();

        module.validate().unwrap();
        let reparsed = parse_module(&module.to_string()).unwrap();
        assert_eq!(module, reparsed);
        reparsed.validate().unwrap();
    }

    #[test]
    fn test_exhaustion_leaves_partial_instrumentation() {
        let mut module = parse_module(INPUT).unwrap();
        let mut injector = Injector::new(EdgeIdPool::new(2, &mut StdRand::with_seed(7)));
        let summary = injector.instrument_module(&mut module).unwrap();

        assert!(summary.exhausted);
        assert_eq!(summary.instrumented_blocks, 2);
        assert_eq!(probe_ids(&module).len(), 2);
        // still a structurally valid module, the build may continue
        module.validate().unwrap();
    }

    #[test]
    fn test_conflicting_probe_declaration_is_rejected() {
        let mut module = parse_module(INPUT).unwrap();
        // a pre-existing declaration under the probe's name, wrong arity
        module
            .get_or_insert_declaration(
                PROBE_SYMBOL,
                crate::ir::Signature {
                    void_ret: true,
                    params: 2,
                },
            )
            .unwrap();

        let mut injector = Injector::new(EdgeIdPool::new(64, &mut StdRand::with_seed(7)));
        assert!(injector.instrument_module(&mut module).is_err());
    }
}
