//! `hemlock` — command-line interpreter for the Hemlock language.
//!
//! With no script, starts the interactive REPL. With a script, runs it.
//! The bundling flags turn scripts into HMLC/HMLB containers, package them
//! into self-contained executables, and inspect existing bundles. At
//! startup the binary checks its own tail for an HMLP trailer and, when
//! present, executes the embedded payload instead of reading a script.

mod repl;

use anyhow::{bail, Context};
use clap::Parser;
use hemlock_runtime::{bundle, RuntimeOptions};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "hemlock")]
#[command(about = "Hemlock systems-scripting language interpreter")]
#[command(version)]
struct Cli {
    /// Script to run; starts the REPL when omitted
    script: Option<PathBuf>,

    /// Arguments passed to the program as `args`
    #[arg(trailing_var_arg = true)]
    args: Vec<String>,

    /// Compile the script to a bundle instead of running it
    #[arg(long)]
    bundle: bool,

    /// Produce a self-contained executable (interpreter + bundle)
    #[arg(long)]
    package: bool,

    /// Inspect a bundle or packaged executable
    #[arg(long)]
    info: bool,

    /// Force the compressed container (HMLB); the default for bundles
    #[arg(long)]
    compress: bool,

    /// Force the uncompressed container (HMLC)
    #[arg(long, conflicts_with = "compress")]
    no_compress: bool,

    /// Output path for --bundle / --package
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Narrate loading and execution steps
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let code = run();
    std::process::exit(code);
}

fn run() -> i32 {
    // A packaged executable carries its program in the trailer; flags and
    // arguments all belong to the embedded program.
    if let Ok(exe) = std::env::current_exe() {
        if let Ok(Some(payload)) = bundle::extract_embedded(&exe) {
            let args: Vec<String> = std::env::args().collect();
            return hemlock_runtime::run_bundle(&payload, &RuntimeOptions::default(), args);
        }
    }

    let cli = Cli::parse();
    let options = RuntimeOptions {
        verbose: cli.verbose,
        stdlib_root: std::env::var_os("HEMLOCK_STDLIB").map(PathBuf::from),
    };

    if cli.bundle || cli.package || cli.info {
        return match tool_command(&cli, &options) {
            Ok(()) => 0,
            Err(error) => {
                eprintln!("hemlock: {:#}", error);
                1
            }
        };
    }

    match &cli.script {
        Some(script) => {
            let mut args = vec![script.display().to_string()];
            args.extend(cli.args.iter().cloned());
            hemlock_runtime::run_script(script, &options, args)
        }
        None => repl::run(&options),
    }
}

fn tool_command(cli: &Cli, options: &RuntimeOptions) -> anyhow::Result<()> {
    let Some(input) = &cli.script else {
        bail!("--bundle, --package, and --info require an input path");
    };

    if cli.info {
        return info(input);
    }

    let compress = !cli.no_compress;
    let payload = encode_script(input, compress, options)?;

    if cli.bundle {
        let output = cli.output.clone().unwrap_or_else(|| {
            input.with_extension(if compress { "hmlb" } else { "hmlc" })
        });
        std::fs::write(&output, &payload)
            .with_context(|| format!("cannot write bundle `{}`", output.display()))?;
        if options.verbose {
            eprintln!(
                "hemlock: wrote {} ({} bytes)",
                output.display(),
                payload.len()
            );
        }
        return Ok(());
    }

    // --package: append the bundle to a copy of this interpreter binary.
    let interpreter = std::env::current_exe().context("cannot locate interpreter binary")?;
    let output = cli
        .output
        .clone()
        .unwrap_or_else(|| input.with_extension(""));
    bundle::package(&interpreter, &payload, &output)
        .with_context(|| format!("cannot package `{}`", output.display()))?;
    if options.verbose {
        eprintln!("hemlock: packaged {}", output.display());
    }
    Ok(())
}

fn encode_script(
    input: &Path,
    compress: bool,
    options: &RuntimeOptions,
) -> anyhow::Result<Vec<u8>> {
    let source = std::fs::read_to_string(input)
        .with_context(|| format!("cannot read `{}`", input.display()))?;
    let program = hemlock_engine::parser::parse(&source)
        .with_context(|| format!("cannot parse `{}`", input.display()))?;
    if options.verbose {
        eprintln!(
            "hemlock: parsed {} ({} top-level statements)",
            input.display(),
            program.statements.len()
        );
    }
    Ok(bundle::encode(&program, compress))
}

fn info(input: &Path) -> anyhow::Result<()> {
    // Accept either a bare container or a packaged executable.
    let bytes = if let Some(payload) = bundle::extract_embedded(input)? {
        println!("packaged executable with embedded payload");
        payload
    } else {
        std::fs::read(input).with_context(|| format!("cannot read `{}`", input.display()))?
    };
    let info = bundle::inspect(&bytes)?;
    println!("{}", info);
    Ok(())
}
