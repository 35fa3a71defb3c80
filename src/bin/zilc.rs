// zilc - ZIL to Z-Machine compiler driver
// Compiles ZIL source files to ZAP assembly or Z-Machine story files.

use std::env;
use std::fs;
use std::path::Path;
use std::process;

use zilc::{ZVersion, ZilCompiler};

fn main() {
    // Initialize logging
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage(&args[0]);
        process::exit(1);
    }

    let mut input_file = "";
    let mut output_file = String::new();
    let mut version = ZVersion::V5;
    let mut optimization_level: u8 = 1;
    let mut emit_zap = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-o" | "--output" => {
                if i + 1 >= args.len() {
                    eprintln!("Error: -o requires a filename");
                    process::exit(1);
                }
                output_file = args[i + 1].clone();
                i += 2;
            }
            "--version" => {
                if i + 1 >= args.len() {
                    eprintln!("Error: --version requires v3 through v8");
                    process::exit(1);
                }
                let designator = args[i + 1].trim_start_matches(['v', 'V']);
                version = match designator.parse::<u8>().ok().and_then(ZVersion::from_number) {
                    Some(v) => v,
                    None => {
                        eprintln!("Error: unsupported version '{}'", args[i + 1]);
                        process::exit(1);
                    }
                };
                i += 2;
            }
            "-O" | "--optimize" => {
                if i + 1 >= args.len() {
                    eprintln!("Error: -O requires a level");
                    process::exit(1);
                }
                optimization_level = args[i + 1].parse().unwrap_or(1);
                i += 2;
            }
            "--emit-zap" | "-S" => {
                emit_zap = true;
                i += 1;
            }
            "-h" | "--help" => {
                print_usage(&args[0]);
                process::exit(0);
            }
            arg if arg.starts_with('-') => {
                eprintln!("Error: unknown option '{}'", arg);
                print_usage(&args[0]);
                process::exit(1);
            }
            arg => {
                input_file = arg;
                i += 1;
            }
        }
    }

    if input_file.is_empty() {
        eprintln!("Error: no input file");
        print_usage(&args[0]);
        process::exit(1);
    }

    let input_path = Path::new(input_file);
    let mut compiler = ZilCompiler::with_version(version);
    compiler.set_optimization_level(optimization_level);

    if output_file.is_empty() {
        let stem = input_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "story".to_string());
        output_file = if emit_zap {
            format!("{}.zap", stem)
        } else {
            format!("{}.z{}", stem, version.number())
        };
    }

    let result = if input_path.extension().is_some_and(|e| e == "zap") {
        // Assemble pre-generated ZAP directly.
        match fs::read_to_string(input_path) {
            Ok(source) => compiler
                .assemble(&source)
                .and_then(|bytes| write_output(&output_file, &bytes)),
            Err(e) => {
                eprintln!("Error: cannot read {}: {}", input_file, e);
                process::exit(1);
            }
        }
    } else if emit_zap {
        compiler.compile_file_to_zap(input_path).and_then(|zap| {
            fs::write(&output_file, zap).map_err(|e| zilc::CompilerError::Io(e.to_string()))
        })
    } else {
        compiler
            .compile_file(input_path)
            .and_then(|bytes| write_output(&output_file, &bytes))
    };

    match result {
        Ok(()) => {
            println!("Wrote {}", output_file);
        }
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    }
}

fn write_output(path: &str, bytes: &[u8]) -> Result<(), zilc::CompilerError> {
    fs::write(path, bytes).map_err(|e| zilc::CompilerError::Io(e.to_string()))
}

fn print_usage(program: &str) {
    eprintln!("Usage: {} [options] <input.zil | input.zap>", program);
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -o, --output FILE    Output file name");
    eprintln!("      --version vN     Target Z-Machine version (v3-v8, default v5)");
    eprintln!("  -O, --optimize N     Optimization level (0 = annotated ZAP, 1 = production)");
    eprintln!("  -S, --emit-zap       Stop after ZAP generation");
    eprintln!("  -h, --help           Show this help");
}
