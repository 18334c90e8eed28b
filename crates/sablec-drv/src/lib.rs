//! sablec-drv - Pipeline Driver
//!
//! Orchestrates the compilation pipeline per compilation unit, strictly
//! linearly: source text → tokens → AST → resolved AST → typed AST → IR.
//! Diagnostics accumulate in one [`Reporter`] across every stage; the
//! pipeline continues past non-fatal errors to surface more of them and
//! stops when a stage trips the fatal latch.
//!
//! A run that records any error produces no IR; warnings alone do not
//! suppress output. The driver maps a non-zero error count to a non-zero
//! process exit code.

use std::path::{Path, PathBuf};

use sablec_ir::Module;
use sablec_lex::LexOptions;
use sablec_sem::ModuleLoader;
use sablec_util::{Diagnostic, Reporter, Severity};
use thiserror::Error;

/// Compile options supplied by the embedder or the CLI.
#[derive(Clone, Debug)]
pub struct CompileOptions {
    /// Ordered module search paths; first match wins.
    pub module_paths: Vec<PathBuf>,
    /// Spaces per indentation level.
    pub indent_width: u32,
    /// Lexer error budget.
    pub max_errors: u32,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            module_paths: Vec::new(),
            indent_width: 4,
            max_errors: 100,
        }
    }
}

/// Driver-level usage errors (not source diagnostics).
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("no input file provided")]
    NoInput,
    #[error("unrecognized option '{0}'")]
    UnknownOption(String),
    #[error("option '{0}' expects a value")]
    MissingValue(String),
}

/// The result of one compilation: the IR module (when the unit was
/// error-free) plus every diagnostic recorded along the way.
pub struct Compilation {
    pub ir: Option<Module>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Compilation {
    /// Number of error and fatal diagnostics.
    pub fn error_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity >= Severity::Error)
            .count()
    }

    /// Process exit code under the driver convention.
    pub fn exit_code(&self) -> i32 {
        if self.error_count() > 0 {
            1
        } else {
            0
        }
    }
}

/// Compile an in-memory source string as the entry module.
pub fn compile_source(source: &str, filename: &str, options: &CompileOptions) -> Compilation {
    let reporter = Reporter::new();
    let loader = ModuleLoader::new(
        options.module_paths.clone(),
        &reporter,
        LexOptions {
            indent_width: options.indent_width,
            max_errors: options.max_errors,
        },
    );
    let set = loader.load_source(source, filename);
    run_middle_end(set, reporter)
}

/// Compile the entry module from disk.
pub fn compile_file(path: &Path, options: &CompileOptions) -> Compilation {
    let reporter = Reporter::new();
    let mut paths = options.module_paths.clone();
    // The entry file's directory is implicitly searchable.
    if let Some(parent) = path.parent() {
        if !paths.iter().any(|p| p == parent) {
            paths.push(parent.to_path_buf());
        }
    }
    let loader = ModuleLoader::new(
        paths,
        &reporter,
        LexOptions {
            indent_width: options.indent_width,
            max_errors: options.max_errors,
        },
    );
    let set = loader.load_file(path);
    run_middle_end(set, reporter)
}

fn run_middle_end(set: sablec_sem::ModuleSet, reporter: Reporter) -> Compilation {
    if reporter.has_fatal() {
        return Compilation {
            ir: None,
            diagnostics: reporter.diagnostics(),
        };
    }

    let analysis = sablec_sem::analyze(&set, &reporter);
    if reporter.has_errors() {
        // Any error severity suppresses IR output.
        return Compilation {
            ir: None,
            diagnostics: reporter.diagnostics(),
        };
    }

    let module = sablec_ir::lower(&analysis, &reporter);
    let ir = if reporter.has_errors() {
        None
    } else {
        Some(module)
    };
    Compilation {
        ir,
        diagnostics: reporter.diagnostics(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_compile_produces_ir() {
        let result = compile_source(
            "def main() -> int:\n    return 0\n",
            "main.sbl",
            &CompileOptions::default(),
        );
        assert!(result.ir.is_some());
        assert_eq!(result.exit_code(), 0);
    }

    #[test]
    fn test_errors_suppress_ir() {
        let result = compile_source(
            "let x: int = \"mismatch\"\n",
            "main.sbl",
            &CompileOptions::default(),
        );
        assert!(result.ir.is_none());
        assert_eq!(result.exit_code(), 1);
        assert!(result.error_count() >= 1);
    }

    #[test]
    fn test_warnings_alone_keep_ir() {
        // An unnecessary not-null assertion warns but compiles.
        let result = compile_source(
            "def main() -> int:\n    let x = 5\n    let y = x!\n    return y\n",
            "main.sbl",
            &CompileOptions::default(),
        );
        assert!(result.ir.is_some(), "{:?}", result.diagnostics);
        assert_eq!(result.exit_code(), 0);
        assert!(result
            .diagnostics
            .iter()
            .any(|d| d.severity == Severity::Warning));
    }

    #[test]
    fn test_empty_source() {
        let result = compile_source("", "main.sbl", &CompileOptions::default());
        assert!(result.ir.is_some());
        assert_eq!(result.error_count(), 0);
    }

    #[test]
    fn test_diagnostic_rendering_format() {
        let result = compile_source("let x = @\n", "main.sbl", &CompileOptions::default());
        let rendered = result.diagnostics[0].to_string();
        // <filename>:<line>:<column>: <severity> [<code>]: <message>
        assert!(rendered.starts_with("main.sbl:1:"), "{}", rendered);
        assert!(rendered.contains(" error [L001]: "), "{}", rendered);
    }
}
