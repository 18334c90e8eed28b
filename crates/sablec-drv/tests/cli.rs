//! CLI behavior of the `sablec` binary.

use assert_cmd::Command;
use predicates::prelude::*;

fn sablec() -> Command {
    Command::cargo_bin("sablec").expect("binary builds")
}

#[test]
fn compiles_clean_file_with_exit_zero() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("ok.sbl");
    std::fs::write(&file, "def main() -> int:\n    return 0\n").unwrap();

    sablec().arg(&file).assert().success();
}

#[test]
fn emit_ir_prints_module() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("ok.sbl");
    std::fs::write(&file, "def main() -> int:\n    print(\"hi\")\n    return 0\n").unwrap();

    sablec()
        .arg("--emit-ir")
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("define i32 @main"))
        .stdout(predicate::str::contains("declare void @print(ptr)"));
}

#[test]
fn type_error_exits_nonzero_with_coded_diagnostic() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("bad.sbl");
    std::fs::write(&file, "let x: int = \"nope\"\n").unwrap();

    sablec()
        .arg(&file)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("[T001]"));
}

#[test]
fn missing_input_is_a_usage_error() {
    sablec()
        .assert()
        .code(2)
        .stderr(predicate::str::contains("usage:"));
}

#[test]
fn unknown_option_is_a_usage_error() {
    sablec()
        .arg("--wat")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unrecognized option"));
}

#[test]
fn missing_file_reports_io_error() {
    sablec()
        .arg("definitely_not_here.sbl")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("[I001]"));
}

#[test]
fn module_path_flag_resolves_imports() {
    let lib_dir = tempfile::tempdir().unwrap();
    std::fs::write(
        lib_dir.path().join("util.sbl"),
        "export def three() -> int:\n    return 3\n",
    )
    .unwrap();

    let src_dir = tempfile::tempdir().unwrap();
    let file = src_dir.path().join("main.sbl");
    std::fs::write(
        &file,
        "from util import three\ndef main() -> int:\n    return three()\n",
    )
    .unwrap();

    sablec()
        .arg("-I")
        .arg(lib_dir.path())
        .arg(&file)
        .assert()
        .success();
}
