//! Entrypoint for CLI
use std::{
    env,
    error::Error,
    fs,
    path::{Path, PathBuf},
    process::{self, Command},
};

use log::{error, info};
use scl::prelude::*;
use scl::IMPL_VERSION;

static USAGE: &str = r#"
usage: scl CMD [ARGS]

commands:
    interpret FILE              Run FILE with the tree-walking interpreter
    compile FILE [OUT] [--run]  Compile FILE to assembly (OUT defaults to
                                FILE with its extension replaced by .asm)

options:
    --run          After compiling, assemble and emulate with the external
                   toolchain (override with SCL_FASM / SCL_EMU)
    -V, --version  Print the toolchain version

examples:
    scl interpret blink.scl
    scl compile blink.scl blink.asm --run
"#;

fn run_interpret(filepath: &str) -> SclResult<()> {
    let ast = build_ast(filepath)?;
    let mut interp = Interpreter::new(&ast);
    let value = interp.run()?;
    println!("Program executed successfully. Return value: {}", value);
    Ok(())
}

fn run_compile(filepath: &str, output: Option<String>, run_after: bool) -> SclResult<()> {
    let ast = build_ast(filepath)?;
    let listing = CodeGen::new(&ast).generate()?;

    let out_path = match output {
        Some(path) => PathBuf::from(path),
        None => Path::new(filepath).with_extension("asm"),
    };
    fs::write(&out_path, listing)?;
    info!("assembly written to {}", out_path.display());

    if run_after {
        assemble_and_emulate(&out_path)?;
    }
    Ok(())
}

/// Hand the listing to the external assembler and emulator. Neither is
/// part of the toolchain; both must be on PATH or named through the
/// environment.
fn assemble_and_emulate(asm_path: &Path) -> SclResult<()> {
    let fasm = env::var("SCL_FASM").unwrap_or_else(|_| "fasm".to_string());
    info!("assembling with {}", fasm);
    let status = Command::new(&fasm).arg(asm_path).status()?;
    if !status.success() {
        error!("assembler exited with {}", status);
        process::exit(1);
    }

    let bin_path = asm_path.with_extension("bin");
    let emu = env::var("SCL_EMU").unwrap_or_else(|_| "isa-emu".to_string());
    info!("running {}", bin_path.display());
    let status = Command::new(&emu).arg(&bin_path).status()?;
    if !status.success() {
        error!("emulator exited with {}", status);
        process::exit(1);
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    simple_logger::SimpleLogger::new().env().init()?;

    match parse_args() {
        Some(Cmd::Interpret { filepath }) => {
            if let Err(err) = run_interpret(&filepath) {
                eprintln!("{}", err);
                process::exit(1);
            }
        }
        Some(Cmd::Compile {
            filepath,
            output,
            run_after,
        }) => {
            if let Err(err) = run_compile(&filepath, output, run_after) {
                eprintln!("{}", err);
                process::exit(1);
            }
        }
        Some(Cmd::Version) => println!("scl v{}", IMPL_VERSION),
        None => {
            print_usage();
            // FreeBSD EX_USAGE (64)
            process::exit(64);
        }
    }

    Ok(())
}

enum Cmd {
    Interpret {
        filepath: String,
    },
    Compile {
        filepath: String,
        output: Option<String>,
        run_after: bool,
    },
    Version,
}

fn parse_args() -> Option<Cmd> {
    let mut args = env::args().skip(1);
    match args.next()?.as_str() {
        "interpret" => Some(Cmd::Interpret {
            filepath: args.next()?,
        }),
        "compile" => {
            let filepath = args.next()?;
            let mut output = None;
            let mut run_after = false;
            for arg in args {
                if arg == "--run" {
                    run_after = true;
                } else if !arg.starts_with('-') && output.is_none() {
                    output = Some(arg);
                } else {
                    return None;
                }
            }
            Some(Cmd::Compile {
                filepath,
                output,
                run_after,
            })
        }
        "-V" | "--version" => Some(Cmd::Version),
        _ => None,
    }
}

fn print_usage() {
    println!("scl v{}", IMPL_VERSION);
    println!("{}", USAGE);
}
