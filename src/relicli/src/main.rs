// Reliability CLI - loads a TOML project and prints the design point
use std::{env, error::Error, fs, io::Read};

use relilib::ReliabilityProject;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() > 1 && (args[1] == "-h" || args[1] == "--help") {
        println!("Usage: relicli [configfile]");
        println!("Reads the project from stdin when no file is given.");
        std::process::exit(0);
    }

    // file argument, or stdin when absent
    let config = if args.len() > 1 {
        match fs::read_to_string(&args[1]) {
            Ok(v) => v,
            Err(e) => {
                eprintln!("filename {}, {}", args[1], e);
                std::process::exit(1);
            }
        }
    } else {
        let mut buffer = String::new();
        std::io::stdin().read_to_string(&mut buffer)?;
        buffer
    };

    let project = match ReliabilityProject::load_toml(&config) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    let report = project.validate();
    if !report.is_valid() {
        for finding in report.findings() {
            eprintln!("{}", finding);
        }
        std::process::exit(1);
    }

    const STACKSIZE: usize = 8; // MiB, deep grids recurse in u-space
    std::thread::Builder::new()
        .stack_size(1024 * 1024 * STACKSIZE)
        .spawn(move || match project.calculate() {
            Ok(result) => println!("{}", result.report(4)),
            Err(e) => eprintln!("{}", e),
        })?
        .join()
        .unwrap();

    Ok(())
}
