use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser};
use slang_core::{CompileError, CompileOptions, SourceUnit, compile_wasm, emit_llvm_ir};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};
use walkdir::WalkDir;
use wasmi::{Engine, Linker, Module, Store};

const SOURCE_EXTENSION: &str = "sl";

/// Compile SLang sources to WebAssembly or LLVM-style IR.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Source files, or directories searched for `.sl` files. Compiled in order.
    #[arg(required = true, value_name = "INPUT")]
    inputs: Vec<PathBuf>,

    #[arg(short, long)]
    output: PathBuf,

    #[arg(
        long,
        value_name = "FORMAT",
        default_value = "wasm",
        help = "Output format: wasm, llvm"
    )]
    emit: String,

    #[arg(long, default_value = "main", help = "Module name used in the output")]
    name: String,

    #[arg(
        long,
        value_name = "PAGES",
        default_value_t = 16,
        help = "64 KiB pages reserved for the wasm stack"
    )]
    stack_pages: u32,

    #[arg(
        long,
        value_name = "FUNCTION",
        help = "Run an exported function without parameters (wasm only)"
    )]
    run: Option<String>,

    #[arg(short, long, action = ArgAction::Count, help = "-v for debug logs, -vv for trace")]
    verbose: u8,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    execute(cli)
}

/// `RUST_LOG` wins over `--verbose` when set.
fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let layer = tracing_subscriber::fmt::layer()
        .without_time()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(filter);
    tracing_subscriber::registry().with(layer).init();
}

fn execute(cli: Cli) -> Result<()> {
    let units = load_units(&cli.inputs)?;
    let options = CompileOptions {
        project_name: cli.name.clone(),
        stack_pages: cli.stack_pages,
    };

    match cli.emit.as_str() {
        "wasm" => {
            let artifact = compile_wasm(&units, &options)?;
            write_output(&cli.output, &artifact.wasm)?;
            if let Some(function) = &cli.run {
                match run_wasm(&artifact.wasm, function)? {
                    Some(result) => println!("Program exited with {result}"),
                    None => println!("Program exited"),
                }
            }
        }
        "llvm" => {
            let ir = emit_llvm_ir(&units, &options)?;
            write_output(&cli.output, ir.as_bytes())?;
            if cli.run.is_some() {
                warn!("--run is ignored for non-wasm outputs");
            }
        }
        other => bail!("unsupported emit format: {other}"),
    }
    Ok(())
}

/// Reads every input. Directories contribute their `.sl` files in file name
/// order.
fn load_units(inputs: &[PathBuf]) -> Result<Vec<SourceUnit>> {
    let mut units = Vec::new();
    for input in inputs {
        if !input.is_dir() {
            units.push(read_unit(input)?);
            continue;
        }

        for entry in WalkDir::new(input).sort_by_file_name() {
            let entry =
                entry.with_context(|| format!("failed to walk directory {}", input.display()))?;
            let path = entry.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == SOURCE_EXTENSION) {
                units.push(read_unit(path)?);
            }
        }
    }

    if units.is_empty() {
        bail!("no .{SOURCE_EXTENSION} sources found");
    }
    Ok(units)
}

fn read_unit(path: &Path) -> Result<SourceUnit> {
    let bytes = fs::read(path).map_err(|_| CompileError::FileNotFound(path.to_path_buf()))?;
    info!(path = %path.display(), bytes = bytes.len(), "loaded source");
    Ok(SourceUnit::new(path.display().to_string(), bytes))
}

fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
    }
    fs::write(path, bytes)
        .with_context(|| format!("failed to write output file {}", path.display()))?;
    info!(path = %path.display(), bytes = bytes.len(), "wrote output");
    Ok(())
}

/// Runs `function` and returns its integer result, if it has one.
fn run_wasm(wasm: &[u8], function: &str) -> Result<Option<i64>> {
    let engine = Engine::default();
    let module = Module::new(&engine, wasm).context("failed to compile wasm artifact")?;
    let linker = Linker::new(&engine);
    let mut store = Store::new(&engine, ());
    let instance = linker
        .instantiate_and_start(&mut store, &module)
        .context("failed to instantiate module")?;

    if let Ok(entry) = instance.get_typed_func::<(), i32>(&store, function) {
        let result = entry
            .call(&mut store, ())
            .with_context(|| format!("failed to execute {function}"))?;
        return Ok(Some(i64::from(result)));
    }
    if let Ok(entry) = instance.get_typed_func::<(), i64>(&store, function) {
        let result = entry
            .call(&mut store, ())
            .with_context(|| format!("failed to execute {function}"))?;
        return Ok(Some(result));
    }
    let entry = instance
        .get_typed_func::<(), ()>(&store, function)
        .with_context(|| {
            format!("exported function {function} missing or takes parameters")
        })?;
    entry
        .call(&mut store, ())
        .with_context(|| format!("failed to execute {function}"))?;
    Ok(None)
}

#[cfg(test)]
mod tests {
    use assert_cmd::Command;
    use predicates::prelude::*;
    use std::fs;
    use tempfile::tempdir;

    const ADD: &str = "add : (a: Int32, b: Int32) -> Int32 = {\n    return a + b\n}\n";
    const MAIN: &str = "main : () -> Int32 = {\n    return add(1, 2)\n}\n";

    fn slang() -> Command {
        Command::cargo_bin("slang-cli").expect("binary exists")
    }

    #[test]
    fn compiles_and_runs_wasm() {
        let dir = tempdir().expect("tempdir");
        let input_path = dir.path().join("input.sl");
        fs::write(&input_path, format!("{ADD}{MAIN}")).expect("write input");
        let output_path = dir.path().join("out.wasm");

        slang()
            .arg(&input_path)
            .arg("--output")
            .arg(&output_path)
            .arg("--run")
            .arg("main")
            .assert()
            .success()
            .stdout(predicate::str::contains("Program exited with 3"));

        assert!(output_path.exists(), "wasm output was not created");
    }

    #[test]
    fn emits_llvm_ir() {
        let dir = tempdir().expect("tempdir");
        let input_path = dir.path().join("input.sl");
        fs::write(&input_path, ADD).expect("write input");
        let output_path = dir.path().join("ir").join("out.ll");

        slang()
            .arg(&input_path)
            .arg("--output")
            .arg(&output_path)
            .arg("--emit")
            .arg("llvm")
            .arg("--name")
            .arg("adder")
            .assert()
            .success();

        let ir = fs::read_to_string(&output_path).expect("read ir");
        assert!(ir.contains("; ModuleID = \"adder\""));
        assert!(ir.contains("define i32 @add(i32 %p0, i32 %p1)"));
    }

    #[test]
    fn compiles_directories_in_file_name_order() {
        let dir = tempdir().expect("tempdir");
        let sources = dir.path().join("src");
        fs::create_dir_all(&sources).expect("create sources");
        fs::write(sources.join("a_lib.sl"), ADD).expect("write lib");
        fs::write(sources.join("b_main.sl"), MAIN).expect("write main");
        fs::write(sources.join("notes.txt"), "not a source").expect("write notes");
        let output_path = dir.path().join("out.wasm");

        slang()
            .arg(&sources)
            .arg("-o")
            .arg(&output_path)
            .arg("--run")
            .arg("main")
            .assert()
            .success()
            .stdout(predicate::str::contains("Program exited with 3"));
    }

    #[test]
    fn reports_missing_input() {
        let dir = tempdir().expect("tempdir");
        slang()
            .arg(dir.path().join("missing.sl"))
            .arg("-o")
            .arg(dir.path().join("out.wasm"))
            .assert()
            .failure()
            .stderr(predicate::str::contains("source file not found"));
    }

    #[test]
    fn reports_compile_errors_with_unit_and_position() {
        let dir = tempdir().expect("tempdir");
        let input_path = dir.path().join("broken.sl");
        fs::write(&input_path, "main : () -> Int32 = {\n return 2 * 3\n}\n").expect("write");

        slang()
            .arg(&input_path)
            .arg("-o")
            .arg(dir.path().join("out.wasm"))
            .assert()
            .failure()
            .stderr(predicate::str::contains("broken.sl"))
            .stderr(predicate::str::contains("unknown operation `*`"));
    }

    #[test]
    fn rejects_unknown_formats() {
        let dir = tempdir().expect("tempdir");
        let input_path = dir.path().join("input.sl");
        fs::write(&input_path, ADD).expect("write input");

        slang()
            .arg(&input_path)
            .arg("-o")
            .arg(dir.path().join("out.bin"))
            .arg("--emit")
            .arg("jvm")
            .assert()
            .failure()
            .stderr(predicate::str::contains("unsupported emit format: jvm"));
    }

    #[test]
    fn runs_void_functions() {
        let dir = tempdir().expect("tempdir");
        let input_path = dir.path().join("input.sl");
        fs::write(&input_path, "noop : () -> Void = {\n    return\n}\n").expect("write input");

        slang()
            .arg(&input_path)
            .arg("-o")
            .arg(dir.path().join("out.wasm"))
            .arg("--run")
            .arg("noop")
            .arg("-v")
            .assert()
            .success()
            .stdout(predicate::str::contains("Program exited"));
    }
}
