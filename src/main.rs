//! Command line entry point: train or predict in ranking or classification mode.

use std::path::PathBuf;

use tzlink::ensemble::{WORKER_SUBCOMMAND, worker};
use tzlink::launch::{LaunchParams, launch};
use tzlink::logging;
use tzlink::modes::{EvalParams, mode_names};

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.first().map(String::as_str) == Some(WORKER_SUBCOMMAND) {
        return run_worker();
    }
    let options = parse_args(args)?;
    if let Err(err) = logging::init() {
        eprintln!("Logging disabled: {err}");
    }
    let outcome = launch(&options.config_paths, options.record, &options.params)
        .map_err(|err| err.to_string())?;
    if options.params.train {
        for path in &outcome.model_paths {
            println!("model: {}", path.display());
        }
    }
    Ok(())
}

fn run_worker() -> Result<(), String> {
    if let Err(err) = logging::init_worker() {
        eprintln!("Logging disabled: {err}");
    }
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    worker::serve(stdin.lock(), stdout.lock())
        .map(|_| ())
        .map_err(|err| err.to_string())
}

#[derive(Debug, Clone)]
struct CliOptions {
    config_paths: Vec<PathBuf>,
    record: bool,
    params: LaunchParams,
}

fn parse_args(args: Vec<String>) -> Result<CliOptions, String> {
    let train = match args.first().map(String::as_str) {
        Some("train") => true,
        Some("predict") => false,
        Some("-h") | Some("--help") | None => return Err(help_text()),
        Some(other) => return Err(format!("Unknown command: {other}\n\n{}", help_text())),
    };
    let mut config_paths = Vec::new();
    let mut mode = "rank".to_string();
    let mut dumpfns = Vec::new();
    let mut record = false;
    let mut eval = EvalParams::default();

    let mut idx = 1usize;
    while idx < args.len() {
        match args[idx].as_str() {
            "-h" | "--help" => return Err(help_text()),
            "--config" | "-c" => {
                idx += 1;
                let value = args.get(idx).ok_or_else(|| "--config requires a value".to_string())?;
                config_paths.push(PathBuf::from(value));
            }
            "--mode" => {
                idx += 1;
                let value = args.get(idx).ok_or_else(|| "--mode requires a value".to_string())?;
                if !mode_names().iter().any(|name| name == value) {
                    return Err(format!("Invalid --mode value: {value}"));
                }
                mode = value.clone();
            }
            "--model" | "-m" => {
                idx += 1;
                let value = args.get(idx).ok_or_else(|| "--model requires a value".to_string())?;
                dumpfns.push(PathBuf::from(value));
            }
            "--predict-out" => {
                idx += 1;
                let value = args
                    .get(idx)
                    .ok_or_else(|| "--predict-out requires a value".to_string())?;
                eval.predict_out = Some(PathBuf::from(value));
            }
            "--record" => {
                record = true;
            }
            "--no-eval" => {
                eval.evaluate = false;
            }
            unknown => return Err(format!("Unknown argument: {unknown}\n\n{}", help_text())),
        }
        idx += 1;
    }

    Ok(CliOptions {
        config_paths,
        record,
        params: LaunchParams {
            mode,
            train,
            dumpfns,
            eval,
        },
    })
}

fn help_text() -> String {
    [
        "tzlink",
        "",
        "Train or predict entity-linking scores in ranking or classification mode.",
        "",
        "Usage:",
        "  tzlink train [--config <toml>]... [--model <file>] [options]",
        "  tzlink predict [--config <toml>]... --model <file>... [options]",
        "",
        "Options:",
        "  -c, --config <toml>    Config file; repeat to layer several (later files win).",
        "  --mode <name>          rank or classify (default: rank).",
        "  -m, --model <file>     Model to save (train) or load (predict; repeat for an ensemble).",
        "  --predict-out <file>   Write scores as JSON lines.",
        "  --no-eval              Skip metrics on labelled validation data.",
        "  --record               Save a run record under the runs directory.",
        "",
        "Without --model, train saves to a fresh temporary file and prints its path.",
    ]
    .join("\n")
}
