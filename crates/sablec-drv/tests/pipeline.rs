//! End-to-end pipeline scenarios: full source in, IR and diagnostics out.

use sablec_drv::{compile_file, compile_source, CompileOptions};
use sablec_ir::{Instr, IrType, Terminator};
use sablec_util::{ReportCode, Severity};

fn count_code(result: &sablec_drv::Compilation, code: ReportCode) -> usize {
    result
        .diagnostics
        .iter()
        .filter(|d| d.code == code)
        .count()
}

#[test]
fn hello_world() {
    let result = compile_source(
        "def main() -> int:\n    print(\"hello\")\n    return 0\n",
        "main.sbl",
        &CompileOptions::default(),
    );
    assert_eq!(result.error_count(), 0, "{:?}", result.diagnostics);
    let ir = result.ir.expect("IR produced");

    let main = ir.function("main").expect("main lowered");
    assert_eq!(main.ret, IrType::I32);
    assert_eq!(main.calls_to("print"), 1);
    assert!(main
        .iter_instrs()
        .any(|i| matches!(i, Instr::ConstStr { value } if value.as_str() == "hello")));
    assert!(main
        .blocks
        .iter()
        .any(|b| matches!(b.terminator, Some(Terminator::Ret { value: Some(_) }))));
}

#[test]
fn nullable_propagation_rejected_without_narrowing() {
    let result = compile_source(
        "let x: int? = nil\nlet y: int = x\n",
        "main.sbl",
        &CompileOptions::default(),
    );
    assert_eq!(count_code(&result, ReportCode::T001), 1, "{:?}", result.diagnostics);
    assert!(result.ir.is_none());
}

#[test]
fn nullable_propagation_accepted_with_elvis() {
    let result = compile_source(
        "let x: int? = nil\nlet y: int = x ?: 0\n",
        "main.sbl",
        &CompileOptions::default(),
    );
    assert_eq!(result.error_count(), 0, "{:?}", result.diagnostics);
    assert!(result.ir.is_some());
}

#[test]
fn move_then_use() {
    let result = compile_source(
        "def make_string() -> string:\n    return \"s\"\nlet a = make_string()\nlet b = a\nprint(a)\n",
        "main.sbl",
        &CompileOptions::default(),
    );
    // Exactly one B001; the statement list was still processed to the end.
    assert_eq!(count_code(&result, ReportCode::B001), 1, "{:?}", result.diagnostics);
    assert!(result.ir.is_none());
}

#[test]
fn non_exhaustive_match_names_witness() {
    let result = compile_source(
        "def f(v: Option<int>) -> void:\n    match v:\n        case Some(x):\n            print(int_to_string(x))\n",
        "main.sbl",
        &CompileOptions::default(),
    );
    let p001: Vec<_> = result
        .diagnostics
        .iter()
        .filter(|d| d.code == ReportCode::P001)
        .collect();
    assert_eq!(p001.len(), 1);
    assert!(p001[0].message.contains("None"), "{}", p001[0].message);
}

#[test]
fn cyclic_import_reported_once() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.sbl"), "import b\n").unwrap();
    std::fs::write(dir.path().join("b.sbl"), "import a\n").unwrap();
    std::fs::write(dir.path().join("main.sbl"), "import a\n").unwrap();

    let result = compile_file(&dir.path().join("main.sbl"), &CompileOptions::default());
    let m002: Vec<_> = result
        .diagnostics
        .iter()
        .filter(|d| d.code == ReportCode::M002)
        .collect();
    assert_eq!(m002.len(), 1, "{:?}", result.diagnostics);
    assert!(m002[0].message.contains("a -> b -> a"), "{}", m002[0].message);
}

#[test]
fn generic_monomorphization_two_specializations() {
    let result = compile_source(
        "def id<T>(x: T) -> T:\n    return x\ndef main() -> int:\n    let a = id(1)\n    let s = id(\"s\")\n    return a\n",
        "main.sbl",
        &CompileOptions::default(),
    );
    assert_eq!(result.error_count(), 0, "{:?}", result.diagnostics);
    let ir = result.ir.unwrap();

    assert!(ir.function("id_int_").is_some());
    assert!(ir.function("id_string_").is_some());
    assert!(ir.function("id").is_none(), "generic residue in IR");

    let main = ir.function("main").unwrap();
    assert_eq!(main.calls_to("id_int_"), 1);
    assert_eq!(main.calls_to("id_string_"), 1);
}

#[test]
fn empty_source_is_a_valid_empty_module() {
    let result = compile_source("", "main.sbl", &CompileOptions::default());
    assert_eq!(result.error_count(), 0);
    let ir = result.ir.unwrap();
    // Only the synthesized main.
    assert!(ir.function("main").is_some());
}

#[test]
fn single_invalid_character_recovers_to_eof() {
    let result = compile_source("~@", "main.sbl", &CompileOptions::default());
    assert_eq!(count_code(&result, ReportCode::L001), 1);
    assert!(result.ir.is_none());
}

#[test]
fn cross_module_compilation() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("geom.sbl"),
        "export def area(w: int, h: int) -> int:\n    return w * h\n",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("main.sbl"),
        "from geom import area\ndef main() -> int:\n    return area(3, 4)\n",
    )
    .unwrap();

    let result = compile_file(&dir.path().join("main.sbl"), &CompileOptions::default());
    assert_eq!(result.error_count(), 0, "{:?}", result.diagnostics);
    let ir = result.ir.unwrap();
    assert!(ir.function("geom_area").is_some());
    let main = ir.function("main").unwrap();
    assert_eq!(main.calls_to("geom_area"), 1);
}

#[test]
fn warnings_do_not_suppress_ir() {
    let result = compile_source(
        "def main() -> int:\n    let x = 1\n    let y = x!\n    return y\n",
        "main.sbl",
        &CompileOptions::default(),
    );
    assert!(result
        .diagnostics
        .iter()
        .any(|d| d.severity == Severity::Warning));
    assert!(result.ir.is_some());
    assert_eq!(result.exit_code(), 0);
}

#[test]
fn match_move_and_null_diagnostics_accumulate() {
    // Several independent defects in one unit all surface in one run.
    let result = compile_source(
        concat!(
            "def make() -> string:\n    return \"s\"\n",
            "let a = make()\nlet b = a\nprint(a)\n",
            "let n: int? = nil\nlet m: int = n\n",
            "def f(v: Option<int>) -> void:\n    match v:\n        case Some(x):\n            print(int_to_string(x))\n",
        ),
        "main.sbl",
        &CompileOptions::default(),
    );
    assert_eq!(count_code(&result, ReportCode::B001), 1);
    assert_eq!(count_code(&result, ReportCode::T001), 1);
    assert_eq!(count_code(&result, ReportCode::P001), 1);
}

#[test]
fn concurrency_program_compiles_end_to_end() {
    let result = compile_source(
        concat!(
            "def worker(ch: Channel<int>) -> void:\n    ch <- 42\n",
            "def main() -> int:\n",
            "    let ch = new Channel<int>()\n",
            "    go worker(ch)\n",
            "    let v = <- ch\n",
            "    return v\n",
        ),
        "main.sbl",
        &CompileOptions::default(),
    );
    assert_eq!(result.error_count(), 0, "{:?}", result.diagnostics);
    let ir = result.ir.unwrap();
    let main = ir.function("main").unwrap();
    assert_eq!(main.calls_to("runtime_spawn"), 1);
    assert_eq!(main.calls_to("chan_recv"), 1);
}

#[test]
fn async_program_compiles_end_to_end() {
    let result = compile_source(
        concat!(
            "async def fetch(n: int) -> int:\n    return n * 2\n",
            "async def run() -> int:\n    let v = await fetch(21)\n    return v\n",
            "def main() -> int:\n    return 0\n",
        ),
        "main.sbl",
        &CompileOptions::default(),
    );
    assert_eq!(result.error_count(), 0, "{:?}", result.diagnostics);
    let ir = result.ir.unwrap();
    for name in ["fetch", "fetch_drive", "fetch_sync", "run", "run_drive", "run_sync"] {
        assert!(ir.function(name).is_some(), "missing {}", name);
    }
}
