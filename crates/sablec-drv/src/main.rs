//! The `sablec` command-line entry point.
//!
//! Usage:
//!
//! ```text
//! sablec [options] <file.sbl>
//!
//!   -I <dir>             add a module search path (repeatable)
//!   --indent-width <n>   spaces per indentation level (default 4)
//!   --max-errors <n>     lexer error budget (default 100)
//!   --emit-ir            print the IR module to stdout on success
//! ```
//!
//! Exit codes: 0 on success, 1 when any error diagnostic was recorded,
//! 2 on usage errors.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use sablec_drv::{compile_file, CompileOptions, DriverError};

struct Cli {
    input: PathBuf,
    options: CompileOptions,
    emit_ir: bool,
}

fn parse_args(args: &[String]) -> Result<Cli, DriverError> {
    let mut input = None;
    let mut options = CompileOptions::default();
    let mut emit_ir = false;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-I" => {
                let value = iter
                    .next()
                    .ok_or_else(|| DriverError::MissingValue("-I".to_owned()))?;
                options.module_paths.push(PathBuf::from(value));
            }
            "--indent-width" => {
                let value = iter
                    .next()
                    .ok_or_else(|| DriverError::MissingValue("--indent-width".to_owned()))?;
                options.indent_width = value.parse().unwrap_or(4);
            }
            "--max-errors" => {
                let value = iter
                    .next()
                    .ok_or_else(|| DriverError::MissingValue("--max-errors".to_owned()))?;
                options.max_errors = value.parse().unwrap_or(100);
            }
            "--emit-ir" => emit_ir = true,
            other if other.starts_with('-') => {
                return Err(DriverError::UnknownOption(other.to_owned()))
            }
            _ => input = Some(PathBuf::from(arg)),
        }
    }

    let input = input.ok_or(DriverError::NoInput)?;
    Ok(Cli {
        input,
        options,
        emit_ir,
    })
}

fn run() -> Result<ExitCode> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = match parse_args(&args) {
        Ok(cli) => cli,
        Err(err) => {
            eprintln!("sablec: {}", err);
            eprintln!("usage: sablec [-I <dir>] [--indent-width <n>] [--max-errors <n>] [--emit-ir] <file.sbl>");
            return Ok(ExitCode::from(2));
        }
    };

    let result = compile_file(&cli.input, &cli.options);
    for diagnostic in &result.diagnostics {
        eprintln!("{}", diagnostic);
    }

    if let Some(ir) = &result.ir {
        if cli.emit_ir {
            print!("{}", ir);
        }
    }

    let code = u8::try_from(result.exit_code()).context("exit code out of range")?;
    Ok(ExitCode::from(code))
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("sablec: internal error: {:#}", err);
            ExitCode::from(2)
        }
    }
}
