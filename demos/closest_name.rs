//! Nearest xkcd color name for an RGB value or an image region
//!
//! Usage:
//!   cargo run --example closest_name -- <r> <g> <b>
//!   cargo run --example closest_name -- <image_path> <x0> <y0> <x1> <y1>

use std::path::Path;
use std::process;

use checker_calibrate::color::NamedColorMatcher;
use checker_calibrate::{closest_name, get_average_color, image_loader, ColorSpace, Region};

fn main() {
    let args: Vec<String> = std::env::args().collect();

    match args.len() {
        4 => {
            let rgb = [parse(&args[1]), parse(&args[2]), parse(&args[3])];
            print_match(rgb);
        }
        6 => {
            let image = image_loader::load_image(Path::new(&args[1])).unwrap_or_else(|e| {
                eprintln!("Error: {}", e);
                process::exit(1);
            });
            let [x0, y0, x1, y1] = [2, 3, 4, 5].map(|i| parse(&args[i]) as u32);
            match get_average_color(Region::new(x0, y0, x1, y1), &image) {
                Ok(sample) => {
                    eprintln!("{} pixels, std {:.1?}", sample.samples.len(), sample.std);
                    print_match(sample.mean);
                }
                Err(e) => {
                    eprintln!("Error: {}", e.user_message());
                    process::exit(1);
                }
            }
        }
        _ => {
            eprintln!("Usage: {} <r> <g> <b>", args[0]);
            eprintln!("       {} <image_path> <x0> <y0> <x1> <y1>", args[0]);
            eprintln!("Example: {} 45 98 180", args[0]);
            process::exit(1);
        }
    }
}

fn parse(arg: &str) -> f32 {
    arg.parse().unwrap_or_else(|_| {
        eprintln!("Error: '{}' is not a number", arg);
        process::exit(1);
    })
}

fn print_match(rgb: [f32; 3]) {
    let Some(name) = closest_name(rgb) else {
        eprintln!("Error: no named colors loaded");
        process::exit(1);
    };
    let distance = NamedColorMatcher::xkcd()
        .closest_with_distance(rgb)
        .map(|(_, d)| d)
        .unwrap_or(f32::NAN);
    let hex = NamedColorMatcher::xkcd()
        .color_of(name)
        .map(ColorSpace::to_hex)
        .unwrap_or_default();
    println!("{}", name);
    eprintln!("  {} (ΔE00 {:.2} from [{:.0}, {:.0}, {:.0}])", hex, distance, rgb[0], rgb[1], rgb[2]);
}
