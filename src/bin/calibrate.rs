//! calibrate - camera calibration helper for the distance estimator
//!
//! `focal` derives a focal length from a reference shot; `distance` shows what distance a given
//! pixel width maps to under a calibration.

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};

use proximity_guard::{estimate_distance, focal_length_from_reference, Calibration};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Focal length (pixels) from an object of known width photographed at a known distance.
    Focal {
        /// Real width of the reference object, in meters.
        #[arg(long)]
        known_width_m: f64,
        /// Distance from the camera to the reference object, in meters.
        #[arg(long)]
        known_distance_m: f64,
        /// Width of the object in the image, in pixels.
        #[arg(long)]
        pixel_width: u32,
    },
    /// Distance (meters) for an apparent width under the given calibration.
    Distance {
        /// Width of the object in the image, in pixels.
        #[arg(long)]
        pixel_width: u32,
        #[arg(long, env = "GUARD_KNOWN_WIDTH_M")]
        known_width_m: Option<f64>,
        #[arg(long, env = "GUARD_FOCAL_LENGTH_PX")]
        focal_length_px: Option<f64>,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    match args.command {
        Command::Focal {
            known_width_m,
            known_distance_m,
            pixel_width,
        } => {
            let focal = focal_length_from_reference(known_width_m, known_distance_m, pixel_width)
                .ok_or_else(|| {
                    anyhow!("known width, known distance and pixel width must all be positive")
                })?;
            println!("focal_length_px = {:.1}", focal);
        }
        Command::Distance {
            pixel_width,
            known_width_m,
            focal_length_px,
        } => {
            let defaults = Calibration::default();
            let calibration = Calibration {
                known_width_m: known_width_m.unwrap_or(defaults.known_width_m),
                focal_length_px: focal_length_px.unwrap_or(defaults.focal_length_px),
            };
            match estimate_distance(&calibration, pixel_width).meters {
                Some(meters) => println!("distance_m = {:.2}", meters),
                None => println!("distance_m = undefined (zero pixel width)"),
            }
        }
    }
    Ok(())
}
