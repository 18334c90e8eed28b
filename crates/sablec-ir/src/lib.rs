//! sablec-ir - Typed IR and AST → IR lowering
//!
//! The IR defined in [`ir`] is the pipeline's sole exit artifact and the
//! entire ABI contract with any back-end: functions of typed parameters
//! and basic blocks, three-address instructions with typed operands, and
//! opaque pointers whose element/field types travel with each operation.
//!
//! [`lower`] turns a checked [`sablec_sem::Analysis`] into a module:
//! structured control flow for if/while/for/match, closure conversion with
//! heap environments and the (code, env) calling convention, on-demand
//! monomorphization of generics with stable mangled names, async functions
//! as promise + state struct + driver, concurrency primitives as runtime
//! calls, and an explicit malloc/free memory model with destructor and
//! defer sequencing on scope exit.

pub mod builder;
pub mod ir;
pub mod lower;
pub mod mono;

pub use builder::FunctionBuilder;
pub use ir::{
    BinOp, Block, BlockId, Callee, CastKind, CmpOp, ExternDecl, Function, GlobalDef, Instr,
    IrType, Module, StructLayout, Terminator, ValueDef, ValueId,
};
pub use lower::lower;
pub use mono::{mangle, MonoCache};

#[cfg(test)]
mod tests {
    use super::*;
    use sablec_lex::LexOptions;
    use sablec_sem::ModuleLoader;
    use sablec_util::{ReportCode, Reporter};

    fn lower_source(source: &str) -> (Module, Reporter) {
        let reporter = Reporter::new();
        let loader = ModuleLoader::new(Vec::new(), &reporter, LexOptions::default());
        let set = loader.load_source(source, "main.sbl");
        let analysis = sablec_sem::analyze(&set, &reporter);
        assert!(
            !reporter.has_errors(),
            "semantic errors: {:?}",
            reporter.diagnostics()
        );
        let module = lower(&analysis, &reporter);
        (module, reporter)
    }

    #[test]
    fn test_hello_world_ir() {
        let (module, reporter) = lower_source(
            "def main() -> int:\n    print(\"hello\")\n    return 0\n",
        );
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());

        let main = module.function("main").expect("main exists");
        assert_eq!(main.ret, IrType::I32);
        assert_eq!(main.calls_to("print"), 1);
        // The argument is the global string "hello".
        let has_hello = main.iter_instrs().any(|i| {
            matches!(i, Instr::ConstStr { value } if value.as_str() == "hello")
        });
        assert!(has_hello);
        // Returns 0 as an i32 exit code.
        let returns_zero = main.blocks.iter().any(|b| {
            matches!(
                b.terminator,
                Some(Terminator::Ret { value: Some(v) })
                    if matches!(
                        main.values[v].instr,
                        Instr::ConstInt { value: 0, .. } | Instr::Cast { .. }
                    )
            )
        });
        assert!(returns_zero);
    }

    #[test]
    fn test_runtime_symbols_declared() {
        let (module, _) = lower_source("def main() -> int:\n    return 0\n");
        for symbol in [
            "malloc",
            "free",
            "printf",
            "print",
            "string_concat",
            "int_to_string",
            "float_to_string",
            "to_string",
            "Promise_create",
            "Promise_getFuture",
            "Future_get",
            "runtime_spawn",
            "chan_send",
            "chan_recv",
            "select_execute",
        ] {
            assert!(module.has_external(symbol), "missing external {}", symbol);
        }
    }

    #[test]
    fn test_synthesized_main_when_absent() {
        let (module, reporter) = lower_source("def helper() -> int:\n    return 1\n");
        assert!(!reporter.has_errors());
        let main = module.function("main").expect("synthesized main");
        assert_eq!(main.ret, IrType::I32);
        assert_eq!(main.params, vec![IrType::I32, IrType::Ptr]);
    }

    #[test]
    fn test_monomorphization_two_instances() {
        let (module, reporter) = lower_source(
            "def id<T>(x: T) -> T:\n    return x\ndef main() -> int:\n    let a = id(1)\n    let s = id(\"s\")\n    return a\n",
        );
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
        assert!(module.function("id_int_").is_some(), "id_int_ missing");
        assert!(module.function("id_string_").is_some(), "id_string_ missing");
        // The generic declaration itself never appears.
        assert!(module.function("id").is_none());

        let main = module.function("main").unwrap();
        assert_eq!(main.calls_to("id_int_"), 1);
        assert_eq!(main.calls_to("id_string_"), 1);
    }

    #[test]
    fn test_identical_instantiations_collapse() {
        let (module, _) = lower_source(
            "def id<T>(x: T) -> T:\n    return x\ndef main() -> int:\n    let a = id(1)\n    let b = id(2)\n    return a + b\n",
        );
        let main = module.function("main").unwrap();
        assert_eq!(main.calls_to("id_int_"), 2);
        let count = module
            .functions
            .keys()
            .filter(|k| k.as_str().starts_with("id_int_"))
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_if_control_flow_shape() {
        let (module, _) = lower_source(
            "def pick(c: bool) -> int:\n    if c:\n        return 1\n    else:\n        return 2\n",
        );
        let f = module.function("pick").unwrap();
        let has_condbr = f
            .blocks
            .iter()
            .any(|b| matches!(b.terminator, Some(Terminator::CondBr { .. })));
        assert!(has_condbr);
    }

    #[test]
    fn test_while_loop_blocks() {
        let (module, _) = lower_source(
            "def count(n: int) -> int:\n    let i = 0\n    while i < n:\n        i += 1\n    return i\n",
        );
        let f = module.function("count").unwrap();
        // cond, body, after on top of entry.
        assert!(f.blocks.len() >= 4);
    }

    #[test]
    fn test_for_in_list_loads_length_and_data() {
        let (module, reporter) = lower_source(
            "def total(xs: list<int>) -> int:\n    let sum = 0\n    for x in xs:\n        sum += x\n    return sum\n",
        );
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
        let f = module.function("total").unwrap();
        let field_loads = f
            .iter_instrs()
            .filter(|i| matches!(i, Instr::FieldPtr { struct_name, .. }
                if struct_name.as_str() == "list"))
            .count();
        assert!(field_loads >= 2, "expected length and data loads");
        assert!(f
            .iter_instrs()
            .any(|i| matches!(i, Instr::IndexPtr { .. })));
    }

    #[test]
    fn test_match_lowering_tags_and_unreachable() {
        let (module, reporter) = lower_source(
            "def unwrap(v: Option<int>) -> int:\n    match v:\n        case Some(x):\n            return x\n        case None:\n            return 0\n    return 0\n",
        );
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
        let f = module.function("unwrap").unwrap();
        // Tag reads against the Option_int_ header layout.
        assert!(f.iter_instrs().any(|i| {
            matches!(i, Instr::FieldPtr { struct_name, index: 0, .. }
                if struct_name.as_str().starts_with("Option"))
        }));
        // The exhaustiveness-guaranteed fall-off block.
        assert!(f
            .blocks
            .iter()
            .any(|b| matches!(b.terminator, Some(Terminator::Unreachable))));
    }

    #[test]
    fn test_variant_construction() {
        let (module, reporter) = lower_source(
            "def wrap(x: int) -> Option<int>:\n    return Some(x)\n",
        );
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
        let f = module.function("wrap").unwrap();
        assert!(f.iter_instrs().any(|i| matches!(i, Instr::Malloc { .. })));
        // Tag store of the Some index.
        assert!(f
            .iter_instrs()
            .any(|i| matches!(i, Instr::ConstInt { ty: IrType::I32, value: 0 })));
    }

    #[test]
    fn test_class_new_and_method_call() {
        let (module, reporter) = lower_source(
            "class Point:\n    x: float64\n    y: float64\n    def norm(self) -> float64:\n        return self.x * self.x + self.y * self.y\ndef main() -> int:\n    let p = new Point(1.0, 2.0)\n    let n = p.norm()\n    return 0\n",
        );
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
        assert!(module.structs.contains_key(&sablec_util::Symbol::intern("Point")));
        let norm = module.function("Point_norm").expect("method lowered");
        assert_eq!(norm.params[0], IrType::Ptr);
        let main = module.function("main").unwrap();
        assert_eq!(main.calls_to("Point_norm"), 1);
        assert!(main.iter_instrs().any(|i| matches!(i, Instr::Malloc { .. })));
    }

    #[test]
    fn test_delete_calls_free() {
        let (module, reporter) = lower_source(
            "class Buf:\n    size: int\ndef main() -> int:\n    let b = new Buf(8)\n    delete b\n    return 0\n",
        );
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
        let main = module.function("main").unwrap();
        assert!(main.iter_instrs().any(|i| matches!(i, Instr::Free { .. })));
    }

    #[test]
    fn test_deinit_called_before_free_on_delete() {
        let (module, reporter) = lower_source(
            "class Res:\n    h: int\n    def deinit(self) -> void:\n        print(\"bye\")\ndef main() -> int:\n    let r = new Res(1)\n    delete r\n    return 0\n",
        );
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
        let main = module.function("main").unwrap();
        assert_eq!(main.calls_to("Res_deinit"), 1);
        assert!(main.iter_instrs().any(|i| matches!(i, Instr::Free { .. })));
    }

    #[test]
    fn test_channel_operations_lower_to_runtime_calls() {
        let (module, reporter) = lower_source(
            "def main() -> int:\n    let ch = new Channel<int>()\n    ch <- 42\n    let v = <- ch\n    return v\n",
        );
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
        let main = module.function("main").unwrap();
        assert_eq!(main.calls_to("chan_send"), 1);
        assert_eq!(main.calls_to("chan_recv"), 1);
    }

    #[test]
    fn test_go_spawns_thunk() {
        let (module, reporter) = lower_source(
            "def worker(n: int) -> void:\n    print(int_to_string(n))\ndef main() -> int:\n    go worker(3)\n    return 0\n",
        );
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
        let main = module.function("main").unwrap();
        assert_eq!(main.calls_to("runtime_spawn"), 1);
        let thunk = module
            .functions
            .keys()
            .find(|k| k.as_str().starts_with("go_thunk"))
            .expect("go thunk emitted");
        let thunk_fn = &module.functions[thunk];
        assert_eq!(thunk_fn.calls_to("worker"), 1);
    }

    #[test]
    fn test_select_lowering() {
        let (module, reporter) = lower_source(
            "def main() -> int:\n    let ch = new Channel<int>()\n    select:\n        case v = <- ch:\n            print(int_to_string(v))\n        default:\n            print(\"idle\")\n    return 0\n",
        );
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
        let main = module.function("main").unwrap();
        assert_eq!(main.calls_to("select_execute"), 1);
        assert!(module.structs.contains_key(&sablec_util::Symbol::intern("select_entry")));
    }

    #[test]
    fn test_async_function_produces_triple() {
        let (module, reporter) = lower_source(
            "async def work(n: int) -> int:\n    return n * 2\ndef main() -> int:\n    return 0\n",
        );
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
        let entry = module.function("work").expect("future-returning entry");
        assert_eq!(entry.ret, IrType::Ptr);
        assert_eq!(entry.calls_to("Promise_create"), 1);
        assert_eq!(entry.calls_to("Promise_getFuture"), 1);
        assert_eq!(entry.calls_to("work_drive"), 1);

        assert!(module.function("work_drive").is_some());
        let sync = module.function("work_sync").expect("sync wrapper");
        assert_eq!(sync.calls_to("work"), 1);
        assert_eq!(sync.calls_to("Future_get"), 1);

        assert!(module
            .structs
            .contains_key(&sablec_util::Symbol::intern("work_state")));
    }

    #[test]
    fn test_await_suspension_spawns_driver() {
        let (module, reporter) = lower_source(
            "async def inner() -> int:\n    return 1\nasync def outer() -> int:\n    let x = await inner()\n    return x\n",
        );
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
        let driver = module.function("outer_drive").unwrap();
        assert_eq!(driver.calls_to("runtime_spawn"), 1);
        assert_eq!(driver.calls_to("Future_get"), 1);
    }

    #[test]
    fn test_interpolation_concats() {
        let (module, reporter) = lower_source(
            "def greet(n: int) -> string:\n    return `n=${n}!`\n",
        );
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
        let f = module.function("greet").unwrap();
        assert!(f.calls_to("int_to_string") >= 1);
        assert!(f.calls_to("string_concat") >= 1);
    }

    #[test]
    fn test_globals_initialized_in_main() {
        let (module, reporter) = lower_source(
            "let limit = 10\ndef main() -> int:\n    return limit\n",
        );
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
        assert!(module.globals.contains_key(&sablec_util::Symbol::intern("limit")));
        let main = module.function("main").unwrap();
        assert!(main
            .iter_instrs()
            .any(|i| matches!(i, Instr::GlobalAddr { name } if name.as_str() == "limit")));
    }

    #[test]
    fn test_lambda_closure_pair() {
        let (module, reporter) = lower_source(
            "def apply(f: (int) -> int, x: int) -> int:\n    return f(x)\ndef main() -> int:\n    let base = 10\n    let add = lambda (n: int) -> int: n + base\n    return apply(add, 5)\n",
        );
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
        // A lifted lambda function taking the environment first.
        let lifted = module
            .functions
            .keys()
            .find(|k| k.as_str().starts_with("lambda_"))
            .expect("lifted lambda");
        let lifted_fn = &module.functions[lifted];
        assert_eq!(lifted_fn.params[0], IrType::Ptr);
        // Indirect call through the closure in apply.
        let apply = module.function("apply").unwrap();
        assert!(apply.iter_instrs().any(|i| {
            matches!(i, Instr::Call { callee: Callee::Indirect(_), .. })
        }));
    }

    #[test]
    fn test_defer_runs_before_return() {
        let (module, reporter) = lower_source(
            "def f() -> int:\n    defer print(\"late\")\n    print(\"early\")\n    return 1\n",
        );
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
        let f = module.function("f").unwrap();
        assert_eq!(f.calls_to("print"), 2);
        // The deferred call appears after the body call in emission order.
        let strs: Vec<&str> = f
            .iter_instrs()
            .filter_map(|i| match i {
                Instr::ConstStr { value } => Some(value.as_str()),
                _ => None,
            })
            .collect();
        let early = strs.iter().position(|s| *s == "early").unwrap();
        let late = strs.iter().position(|s| *s == "late").unwrap();
        assert!(early < late);
    }

    #[test]
    fn test_nullable_box_and_elvis() {
        let (module, reporter) = lower_source(
            "def pick(x: int?) -> int:\n    return x ?: 0\n",
        );
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
        let f = module.function("pick").unwrap();
        // Null test plus a phi join.
        assert!(f
            .iter_instrs()
            .any(|i| matches!(i, Instr::Cmp { op: CmpOp::Eq, ty: IrType::Ptr, .. })));
        assert!(f.iter_instrs().any(|i| matches!(i, Instr::Phi { .. })));
    }

    #[test]
    fn test_extension_function_call() {
        let (module, reporter) = lower_source(
            "def string.twice(self: string) -> string:\n    return self + self\ndef main() -> int:\n    let s = \"ab\".twice()\n    return 0\n",
        );
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
        assert!(module.function("string_twice").is_some());
        let main = module.function("main").unwrap();
        assert_eq!(main.calls_to("string_twice"), 1);
    }

    #[test]
    fn test_codegen_error_discards_function_only() {
        let reporter = Reporter::new();
        let loader = ModuleLoader::new(Vec::new(), &reporter, LexOptions::default());
        // Nested functions are rejected at lowering with C002; the other
        // function still lowers.
        let set = loader.load_source(
            "def bad() -> int:\n    def inner() -> int:\n        return 1\n    return inner()\ndef good() -> int:\n    return 2\n",
            "main.sbl",
        );
        let analysis = sablec_sem::analyze(&set, &reporter);
        let module = lower(&analysis, &reporter);
        assert!(reporter
            .diagnostics()
            .iter()
            .any(|d| d.code == ReportCode::C002));
        assert!(module.function("bad").is_none());
        assert!(module.function("good").is_some());
    }

    #[test]
    fn test_generic_class_instantiation() {
        let (module, reporter) = lower_source(
            "class Box<T>:\n    value: T\n    def get(self) -> T:\n        return self.value\ndef main() -> int:\n    let b = new Box<int>(5)\n    return b.get()\n",
        );
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
        assert!(module.structs.contains_key(&sablec_util::Symbol::intern("Box_int_")));
        let main = module.function("main").unwrap();
        assert_eq!(main.calls_to("Box_int_get"), 1);
        assert!(module.function("Box_int_get").is_some());
    }
}
