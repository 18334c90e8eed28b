//! sablec-sem - Semantic Analyzer
//!
//! Name resolution, the type system, the type checker, ownership/borrow
//! checking, pattern exhaustiveness, and the module loader.
//!
//! The analyzer consumes the module set produced by [`modules::ModuleLoader`]
//! and produces an [`check::Analysis`]: an interned [`types::TypeTable`], a
//! single-assignment table of resolved expression types, registries of
//! checked functions, classes, enums, traits, and extensions, and per-call
//! resolution targets. That product is everything IR lowering needs; the
//! AST itself is never mutated.
//!
//! Checking is tolerant: parser holes type as the internal error type,
//! which unifies with anything, so one malformed statement never cascades.

pub mod check;
pub mod exhaust;
pub mod modules;
pub mod ownership;
pub mod scope;
pub mod types;

pub use check::{
    analyze, Analysis, CallTarget, ClassInfo, EnumInfo, FuncInfo, GlobalInfo, ParamInfo,
    TraitInfo, VariantInfo,
};
pub use modules::{ExportSet, ModuleLoader, ModuleRecord, ModuleSet};
pub use scope::{Binding, BindingKind, ScopeStack};
pub use types::{TypeId, TypeKind, TypeTable};

#[cfg(test)]
mod tests {
    use super::*;
    use sablec_lex::LexOptions;
    use sablec_util::{ReportCode, Reporter, Severity, Symbol};

    /// Analyze a single in-memory module.
    fn analyze_source(source: &str) -> (Analysis, Reporter) {
        let reporter = Reporter::new();
        let loader = ModuleLoader::new(Vec::new(), &reporter, LexOptions::default());
        let set = loader.load_source(source, "main.sbl");
        let analysis = analyze(&set, &reporter);
        (analysis, reporter)
    }

    fn codes(reporter: &Reporter, code: ReportCode) -> usize {
        reporter
            .diagnostics()
            .iter()
            .filter(|d| d.code == code)
            .count()
    }

    #[test]
    fn test_hello_world_checks_clean() {
        let (_, reporter) = analyze_source(
            "def main() -> int:\n    print(\"hello\")\n    return 0\n",
        );
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
    }

    #[test]
    fn test_every_expression_gets_a_type() {
        let (analysis, reporter) = analyze_source(
            "def add(a: int, b: int) -> int:\n    let c = a + b\n    return c * 2\n",
        );
        assert!(!reporter.has_errors());
        // On an error-free file every allocated expression slot is filled.
        for (i, slot) in analysis.expr_types.iter().enumerate() {
            assert!(slot.is_some(), "expression {} has no resolved type", i);
        }
    }

    #[test]
    fn test_nullable_assignment_rejected() {
        let (_, reporter) = analyze_source("let x: int? = nil\nlet y: int = x\n");
        assert_eq!(codes(&reporter, ReportCode::T001), 1);
    }

    #[test]
    fn test_nullable_elvis_accepted() {
        let (_, reporter) = analyze_source("let x: int? = nil\nlet y: int = x ?: 0\n");
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
    }

    #[test]
    fn test_not_null_assert_narrows() {
        let (_, reporter) = analyze_source("let x: int? = 5\nlet y: int = x!\n");
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
    }

    #[test]
    fn test_unnecessary_not_null_warns() {
        let (_, reporter) = analyze_source("let x: int = 5\nlet y = x!\n");
        assert!(!reporter.has_errors());
        assert!(reporter.warning_count() >= 1);
    }

    #[test]
    fn test_member_access_on_nullable_requires_safe_call() {
        let (_, reporter) = analyze_source(
            "class P:\n    x: int\ndef f(p: P?) -> int:\n    return p.x\n",
        );
        assert!(reporter.has_errors());
    }

    #[test]
    fn test_safe_call_propagates_nullability() {
        let (_, reporter) = analyze_source(
            "class P:\n    x: int\ndef f(p: P?) -> int:\n    return p?.x ?: 0\n",
        );
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
    }

    #[test]
    fn test_move_then_use() {
        let (_, reporter) = analyze_source(
            "def make_string() -> string:\n    return \"s\"\nlet a = make_string()\nlet b = a\nprint(a)\n",
        );
        assert_eq!(codes(&reporter, ReportCode::B001), 1, "{:?}", reporter.diagnostics());
    }

    #[test]
    fn test_copy_types_do_not_move() {
        let (_, reporter) = analyze_source("let a = 1\nlet b = a\nlet c = a + b\n");
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
    }

    #[test]
    fn test_explicit_move_registers() {
        let (_, reporter) = analyze_source(
            "def take(s: string&&) -> void:\n    print(s)\nlet a = \"x\"\ntake(move a)\nprint(a)\n",
        );
        assert_eq!(codes(&reporter, ReportCode::B001), 1, "{:?}", reporter.diagnostics());
    }

    #[test]
    fn test_borrowed_argument_does_not_move() {
        let (_, reporter) = analyze_source(
            "let a = \"x\"\nprint(a)\nprint(a)\n",
        );
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
    }

    #[test]
    fn test_assignment_to_const_rejected() {
        let (_, reporter) = analyze_source("const k = 1\nk = 2\n");
        assert_eq!(codes(&reporter, ReportCode::B003), 1);
    }

    #[test]
    fn test_move_in_one_branch_taints_after() {
        let (_, reporter) = analyze_source(
            "def g(flag: bool) -> void:\n    let a = \"s\"\n    if flag:\n        let b = a\n    print(a)\n",
        );
        assert_eq!(codes(&reporter, ReportCode::B001), 1, "{:?}", reporter.diagnostics());
    }

    #[test]
    fn test_non_exhaustive_option_match() {
        let (_, reporter) = analyze_source(
            "def f(v: Option<int>) -> void:\n    match v:\n        case Some(x):\n            print(int_to_string(x))\n",
        );
        let diags = reporter.diagnostics();
        let p001: Vec<_> = diags.iter().filter(|d| d.code == ReportCode::P001).collect();
        assert_eq!(p001.len(), 1);
        assert!(p001[0].message.contains("None"), "{}", p001[0].message);
    }

    #[test]
    fn test_exhaustive_option_match() {
        let (_, reporter) = analyze_source(
            "def f(v: Option<int>) -> int:\n    match v:\n        case Some(x):\n            return x\n        case None:\n            return 0\n    return 0\n",
        );
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
    }

    #[test]
    fn test_result_requires_ok_and_err() {
        let (_, reporter) = analyze_source(
            "def f(v: Result<int, string>) -> void:\n    match v:\n        case Ok(x):\n            print(int_to_string(x))\n",
        );
        assert_eq!(codes(&reporter, ReportCode::P001), 1);
    }

    #[test]
    fn test_user_enum_exhaustiveness() {
        let (_, reporter) = analyze_source(
            "enum Shape:\n    Circle(float64)\n    Rect(float64, float64)\ndef area(s: Shape) -> float64:\n    match s:\n        case Circle(r):\n            return r\n        case Rect(w, h):\n            return w * h\n    return 0.0\n",
        );
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
    }

    #[test]
    fn test_generic_function_inference() {
        let (analysis, reporter) = analyze_source(
            "def id<T>(x: T) -> T:\n    return x\nlet a: int = id(1)\nlet b: string = id(\"s\")\n",
        );
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
        // Both instantiations are recorded with concrete type arguments.
        let instantiations: Vec<_> = analysis
            .call_targets
            .values()
            .filter_map(|t| match t {
                CallTarget::Func { key, type_args } if key.as_str() == "id" => Some(type_args),
                _ => None,
            })
            .collect();
        assert_eq!(instantiations.len(), 2);
    }

    #[test]
    fn test_uninferable_generic_rejected() {
        let (_, reporter) = analyze_source(
            "def fst<T, U>(x: T) -> T:\n    return x\nlet a = fst(1)\n",
        );
        assert_eq!(codes(&reporter, ReportCode::T016), 1);
    }

    #[test]
    fn test_arity_mismatch() {
        let (_, reporter) = analyze_source(
            "def f(a: int, b: int) -> int:\n    return a\nlet x = f(1)\n",
        );
        assert_eq!(codes(&reporter, ReportCode::T007), 1);
    }

    #[test]
    fn test_default_parameter_fills_arity() {
        let (_, reporter) = analyze_source(
            "def f(a: int, b: int = 2) -> int:\n    return a + b\nlet x = f(1)\n",
        );
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
    }

    #[test]
    fn test_undefined_variable_and_function() {
        let (_, reporter) = analyze_source("let x = ghost\n");
        assert_eq!(codes(&reporter, ReportCode::T002), 1);

        let (_, reporter) = analyze_source("phantom()\n");
        assert_eq!(codes(&reporter, ReportCode::T003), 1);
    }

    #[test]
    fn test_redeclaration_in_same_scope() {
        let (_, reporter) = analyze_source(
            "def f() -> void:\n    let x = 1\n    let x = 2\n",
        );
        assert_eq!(codes(&reporter, ReportCode::M001), 1);
    }

    #[test]
    fn test_duplicate_lambda_parameter() {
        let (_, reporter) = analyze_source(
            "let f = lambda (x: int, x: int) -> int: x\n",
        );
        assert_eq!(codes(&reporter, ReportCode::M001), 1, "{:?}", reporter.diagnostics());
    }

    #[test]
    fn test_shadowing_in_inner_scope_allowed() {
        let (_, reporter) = analyze_source(
            "def f() -> void:\n    let x = 1\n    if x:\n        let x = 2\n        print(int_to_string(x))\n",
        );
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
    }

    #[test]
    fn test_await_outside_async() {
        let (_, reporter) = analyze_source(
            "async def work() -> int:\n    return 1\ndef f() -> void:\n    let x = await work()\n",
        );
        assert_eq!(codes(&reporter, ReportCode::C019), 1);
    }

    #[test]
    fn test_await_inside_async() {
        let (_, reporter) = analyze_source(
            "async def work() -> int:\n    return 1\nasync def f() -> int:\n    let x = await work()\n    return x\n",
        );
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
    }

    #[test]
    fn test_async_return_seen_as_future_by_callers() {
        let (_, reporter) = analyze_source(
            "async def work() -> int:\n    return 1\ndef f() -> void:\n    let x: int = work()\n",
        );
        // Future<int> is not assignable to int.
        assert_eq!(codes(&reporter, ReportCode::T001), 1);
    }

    #[test]
    fn test_channel_operations() {
        let (_, reporter) = analyze_source(
            "def f() -> int:\n    let ch = new Channel<int>()\n    ch <- 42\n    let v = <- ch\n    return v\n",
        );
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
    }

    #[test]
    fn test_channel_send_type_mismatch() {
        let (_, reporter) = analyze_source(
            "def f() -> void:\n    let ch = new Channel<int>()\n    ch <- \"nope\"\n",
        );
        assert_eq!(codes(&reporter, ReportCode::T001), 1);
    }

    #[test]
    fn test_class_fields_methods_and_inheritance() {
        let (_, reporter) = analyze_source(
            "class Animal:\n    name: string\n    def speak(self) -> string:\n        return self.name\nclass Dog(Animal):\n    def bark(self) -> string:\n        return self.speak()\ndef f(d: Dog) -> string:\n    return d.speak() + d.bark()\n",
        );
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
    }

    #[test]
    fn test_subclass_assignable_to_base() {
        let (_, reporter) = analyze_source(
            "class Animal:\n    name: string\nclass Dog(Animal):\n    breed: string\ndef f(d: Dog) -> void:\n    let a: Animal = d\n",
        );
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
    }

    #[test]
    fn test_extension_function_strict_fallback() {
        let (_, reporter) = analyze_source(
            "class P:\n    x: int\n    def get(self) -> int:\n        return self.x\ndef P.get_twice(self: P) -> int:\n    return self.get() * 2\ndef f(p: P) -> int:\n    return p.get_twice()\n",
        );
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
    }

    #[test]
    fn test_extension_on_primitive() {
        let (_, reporter) = analyze_source(
            "def string.twice(self: string) -> string:\n    return self + self\ndef f() -> string:\n    return \"ab\".twice()\n",
        );
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
    }

    #[test]
    fn test_trait_impl_and_bound() {
        let (_, reporter) = analyze_source(
            "trait Printable:\n    def fmt(self) -> string\nclass P:\n    x: int\nimpl Printable for P:\n    def fmt(self) -> string:\n        return \"p\"\ndef show(p: Printable) -> string:\n    return \"?\"\ndef f(p: P) -> string:\n    return show(p)\n",
        );
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
    }

    #[test]
    fn test_empty_list_needs_context() {
        let (_, reporter) = analyze_source("let xs = []\n");
        assert_eq!(codes(&reporter, ReportCode::T009), 1);

        let (_, reporter) = analyze_source("let xs: list<int> = []\n");
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
    }

    #[test]
    fn test_list_element_unification() {
        let (_, reporter) = analyze_source("let xs = [1, 2, \"three\"]\n");
        assert!(reporter.has_errors());
    }

    #[test]
    fn test_interpolation_types() {
        let (_, reporter) = analyze_source(
            "def f(n: int) -> string:\n    return `n=${n}`\n",
        );
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
    }

    #[test]
    fn test_for_over_range_and_list() {
        let (_, reporter) = analyze_source(
            "def f(xs: list<int>) -> int:\n    let total = 0\n    for i in 0..10:\n        total += i\n    for x in xs:\n        total += x\n    return total\n",
        );
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
    }

    #[test]
    fn test_condition_must_be_truthy() {
        let (_, reporter) = analyze_source(
            "def g() -> void:\n    return\ndef f(xs: list<int>) -> void:\n    if xs:\n        g()\n",
        );
        assert!(reporter.has_errors());
    }

    #[test]
    fn test_return_type_mismatch() {
        let (_, reporter) = analyze_source("def f() -> int:\n    return \"no\"\n");
        assert_eq!(codes(&reporter, ReportCode::T014), 1);
    }

    #[test]
    fn test_bare_return_requires_void() {
        let (_, reporter) = analyze_source("def f() -> int:\n    return\n");
        assert_eq!(codes(&reporter, ReportCode::T014), 1);
    }

    #[test]
    fn test_checker_survives_parse_holes() {
        let reporter = Reporter::new();
        let loader = ModuleLoader::new(Vec::new(), &reporter, LexOptions::default());
        // The first line is malformed; the second must still be checked.
        let set = loader.load_source("def (:\nlet y: int = \"s\"\n", "main.sbl");
        analyze(&set, &reporter);
        assert!(codes(&reporter, ReportCode::T001) >= 1);
    }

    #[test]
    fn test_cross_module_import_and_qualified_access() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("geom.sbl"),
            "export def area(w: int, h: int) -> int:\n    return w * h\ndef hidden() -> int:\n    return 0\n",
        )
        .unwrap();

        let reporter = Reporter::new();
        let loader = ModuleLoader::new(
            vec![dir.path().to_path_buf()],
            &reporter,
            LexOptions::default(),
        );
        let set = loader.load_source(
            "import geom\nfrom geom import area as compute\nlet a = geom::area(2, 3)\nlet b = compute(4, 5)\n",
            "main.sbl",
        );
        analyze(&set, &reporter);
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
    }

    #[test]
    fn test_import_of_unexported_symbol() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("geom.sbl"),
            "def hidden() -> int:\n    return 0\n",
        )
        .unwrap();

        let reporter = Reporter::new();
        let loader = ModuleLoader::new(
            vec![dir.path().to_path_buf()],
            &reporter,
            LexOptions::default(),
        );
        let set = loader.load_source("from geom import hidden\n", "main.sbl");
        analyze(&set, &reporter);
        assert!(codes(&reporter, ReportCode::M010) >= 1);
    }

    #[test]
    fn test_cyclic_modules_fail_but_entry_continues() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.sbl"), "import b\n").unwrap();
        std::fs::write(dir.path().join("b.sbl"), "import a\n").unwrap();

        let reporter = Reporter::new();
        let loader = ModuleLoader::new(
            vec![dir.path().to_path_buf()],
            &reporter,
            LexOptions::default(),
        );
        let set = loader.load_source("import a\nlet ok = 1\n", "main.sbl");
        analyze(&set, &reporter);
        assert_eq!(codes(&reporter, ReportCode::M002), 1);
        // The entry module itself checked fine apart from the cycle.
        let t_errors = reporter
            .diagnostics()
            .iter()
            .filter(|d| d.code.prefix == 'T' && d.severity >= Severity::Error)
            .count();
        assert_eq!(t_errors, 0);
    }

    #[test]
    fn test_module_block_qualified_access() {
        let (_, reporter) = analyze_source(
            "module geo:\n    def area(w: int, h: int) -> int:\n        return w * h\nlet a = geo::area(2, 3)\n",
        );
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
    }

    #[test]
    fn test_movable_class_flag() {
        let (analysis, reporter) = analyze_source(
            "class Holder:\n    name: string\nclass Pair:\n    a: int\n    b: int\n",
        );
        assert!(!reporter.has_errors());
        let holder = analysis.classes.get(&Symbol::intern("Holder")).unwrap();
        assert!(holder.movable);
        let pair = analysis.classes.get(&Symbol::intern("Pair")).unwrap();
        assert!(!pair.movable);
    }

    #[test]
    fn test_select_checks_channel_types() {
        let (_, reporter) = analyze_source(
            "def f() -> void:\n    let ch = new Channel<int>()\n    select:\n        case v = <- ch:\n            print(int_to_string(v))\n        default:\n            print(\"idle\")\n",
        );
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
    }

    #[test]
    fn test_go_requires_call() {
        let (_, reporter) = analyze_source("def w() -> void:\n    return\ngo w()\n");
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());

        let (_, reporter) = analyze_source("let x = 1\ngo x\n");
        assert_eq!(codes(&reporter, ReportCode::C013), 1);
    }

    #[test]
    fn test_union_types_accept_alternatives() {
        let (_, reporter) = analyze_source(
            "def f(v: int | string) -> void:\n    return\ndef g() -> void:\n    f(1)\n    f(\"s\")\n",
        );
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());

        let (_, reporter) = analyze_source(
            "def f(v: int | string) -> void:\n    return\ndef g() -> void:\n    f(true)\n",
        );
        assert!(reporter.has_errors());
    }

    #[test]
    fn test_strict_fallback_prefers_inherent_method() {
        // An extension with the same name as an inherent method is never
        // selected.
        let (analysis, reporter) = analyze_source(
            "class P:\n    x: int\n    def get(self) -> int:\n        return self.x\ndef P.get(self: P) -> int:\n    return 999\ndef f(p: P) -> int:\n    return p.get()\n",
        );
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
        let method_calls = analysis
            .call_targets
            .values()
            .filter(|t| matches!(t, CallTarget::Method { .. }))
            .count();
        assert!(method_calls >= 1);
        let ext_calls = analysis
            .call_targets
            .values()
            .filter(|t| matches!(t, CallTarget::Extension { .. }))
            .count();
        assert_eq!(ext_calls, 0);
    }
}
