//! Command-line interface for checker_calibrate
//!
//! Calibrates a photograph of a checker card, writes the corrected image and
//! prints the comparison table as JSON rows.
//!
//! Usage: cargo run --example calibrate -- [OPTIONS] <image_path>

use std::{
    env,
    path::{Path, PathBuf},
    process,
};

use checker_calibrate::{calibrate, image_loader, CalibrationOutcome, CalibrationRequest};
use tracing_subscriber::EnvFilter;

struct Options {
    image: PathBuf,
    output: Option<PathBuf>,
    config: Option<PathBuf>,
    card: String,
    algorithm: String,
    excluded: Vec<usize>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    let options = match parse_args(&args) {
        Ok(options) => options,
        Err(message) => {
            eprintln!("Error: {}", message);
            print_help(&args[0]);
            process::exit(1);
        }
    };

    let request = match &options.config {
        Some(path) => CalibrationRequest::from_json_file(path),
        None => CalibrationRequest::from_ids(&options.card, &options.algorithm, &options.excluded),
    };
    let request = request.unwrap_or_else(|error| fail(&error));

    let image = image_loader::load_image(&options.image).unwrap_or_else(|error| fail(&error));
    let outcome = calibrate(&image, &request).unwrap_or_else(|error| fail(&error));

    let output = options
        .output
        .unwrap_or_else(|| default_output(&options.image));
    if let Err(error) = image_loader::save_image(&outcome.image, &output) {
        fail(&error);
    }
    eprintln!("Corrected image written to {}", output.display());

    print_result(&outcome);
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut image = None;
    let mut output = None;
    let mut config = None;
    let mut card = "spyder24".to_string();
    let mut algorithm = "finlayson".to_string();
    let mut excluded = Vec::new();

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--help" | "-h" => {
                print_help(&args[0]);
                process::exit(0);
            }
            "--card" => card = next_value(args, &mut i)?,
            "--algorithm" => algorithm = next_value(args, &mut i)?,
            "--output" => output = Some(PathBuf::from(next_value(args, &mut i)?)),
            "--config" => config = Some(PathBuf::from(next_value(args, &mut i)?)),
            "--exclude" => {
                for part in next_value(args, &mut i)?.split(',').filter(|p| !p.is_empty()) {
                    let index = part
                        .trim()
                        .parse()
                        .map_err(|_| format!("invalid patch index '{}'", part))?;
                    excluded.push(index);
                }
            }
            arg if !arg.starts_with("--") => {
                if image.is_some() {
                    return Err("multiple image paths provided".to_string());
                }
                image = Some(PathBuf::from(arg));
            }
            other => return Err(format!("unknown option: {}", other)),
        }
        i += 1;
    }

    Ok(Options {
        image: image.ok_or("no image path given")?,
        output,
        config,
        card,
        algorithm,
        excluded,
    })
}

fn next_value(args: &[String], i: &mut usize) -> Result<String, String> {
    *i += 1;
    args.get(*i).cloned().ok_or_else(|| format!("{} needs a value", args[*i - 1]))
}

fn default_output(input: &Path) -> PathBuf {
    let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("output");
    input.with_file_name(format!("{}_calibrated.png", stem))
}

fn fail(error: &checker_calibrate::CalibrationError) -> ! {
    eprintln!("Calibration failed: {}", error);
    eprintln!("Suggestion: {}", error.user_message());
    process::exit(1);
}

fn print_help(program_name: &str) {
    eprintln!("Usage: {} [OPTIONS] <image_path>", program_name);
    eprintln!();
    eprintln!("Calibrate a photograph against the color checker it contains.");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --card ID          Card type (default: spyder24)");
    eprintln!("  --algorithm ID     finlayson | cheung | vandermonde (default: finlayson)");
    eprintln!("  --exclude LIST     Comma-separated patch indices to leave out, e.g. 3,17");
    eprintln!("  --config FILE      JSON calibration request (overrides the options above)");
    eprintln!("  --output FILE      Corrected image path (default: <input>_calibrated.png)");
    eprintln!("  --help, -h         Show this help message");
    eprintln!();
    eprintln!("Set RUST_LOG=debug for detection and fit diagnostics.");
}

fn print_result(outcome: &CalibrationOutcome) {
    // JSON rows on stdout for programmatic use
    match serde_json::to_string_pretty(&outcome.table.to_json_rows()) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing table: {}", e),
    }

    eprintln!();
    eprintln!("Calibration Summary:");
    eprintln!("  Method: {}", outcome.model.method());
    eprintln!("  White balance gains: {:.3?}", outcome.white_balance.gains);
    eprintln!(
        "  Patches: {} sampled, {} inferred from the grid",
        outcome.detection.swatches.len(),
        outcome.detection.inferred_count()
    );
    if let Some(summary) = outcome.table.summary() {
        eprintln!(
            "  ΔE00: mean {:.2}, median {:.2}, max {:.2} (patch {})",
            summary.mean_delta_e, summary.median_delta_e, summary.max_delta_e, summary.worst_label
        );
        if !summary.poor_labels.is_empty() {
            eprintln!("  Warning: poorly corrected patches {:?}", summary.poor_labels);
        }
    }
    if outcome.table.dropped_count() > 0 {
        eprintln!("  Dropped from comparison: {:?}", outcome.table.missing_in_source);
    }
}
