use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "radview",
    author,
    version,
    about = "Radiance cascade global illumination viewer",
    arg_required_else_help = false
)]
pub struct Cli {
    /// Scene manifest (TOML). Without one a built-in test scene is used.
    #[arg(long, value_name = "FILE")]
    pub scene: Option<PathBuf>,

    /// Number of cascade levels to generate and dispatch.
    #[arg(long, value_name = "N", default_value_t = 7, value_parser = clap::value_parser!(u32).range(1..=10))]
    pub levels: u32,

    /// Directory holding the kernel sources (cascade template, bake, merge, resolve).
    #[arg(long, value_name = "DIR", default_value = "shaders")]
    pub shaders_dir: PathBuf,

    /// Output directory for the generated per-level kernels.
    #[arg(long, value_name = "DIR", default_value = "generated")]
    pub out_dir: PathBuf,

    /// Window size (e.g. `1280x720`).
    #[arg(long, value_name = "WIDTHxHEIGHT", default_value = "1024x1024", value_parser = parse_size)]
    pub size: (u32, u32),

    /// Initial ray-length multiplier (adjustable with the scroll wheel).
    #[arg(long, value_name = "N", default_value_t = 1)]
    pub ray_length: i32,

    /// Cascade layer displayed at startup (debug aid; keys 0-9 at runtime).
    #[arg(long, value_name = "LAYER", default_value_t = 0)]
    pub layer: u32,

    /// Skip the merge reduction and display raw gather output.
    #[arg(long)]
    pub no_merge: bool,
}

pub fn parse() -> Cli {
    Cli::parse()
}

fn parse_size(value: &str) -> Result<(u32, u32), String> {
    let (width, height) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{value}'"))?;
    let width: u32 = width
        .trim()
        .parse()
        .map_err(|_| format!("invalid width in '{value}'"))?;
    let height: u32 = height
        .trim()
        .parse()
        .map_err(|_| format!("invalid height in '{value}'"))?;
    if width == 0 || height == 0 {
        return Err(format!("size must be non-zero, got '{value}'"));
    }
    Ok((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_sizes() {
        assert_eq!(parse_size("1280x720"), Ok((1280, 720)));
        assert_eq!(parse_size("1024X1024"), Ok((1024, 1024)));
        assert_eq!(parse_size(" 640 x 480 "), Ok((640, 480)));
    }

    #[test]
    fn rejects_malformed_sizes() {
        assert!(parse_size("1280").is_err());
        assert!(parse_size("0x720").is_err());
        assert!(parse_size("axb").is_err());
    }

    #[test]
    fn levels_outside_digit_range_are_rejected() {
        assert!(Cli::try_parse_from(["radview", "--levels", "0"]).is_err());
        assert!(Cli::try_parse_from(["radview", "--levels", "11"]).is_err());
        let cli = Cli::try_parse_from(["radview", "--levels", "7"]).unwrap();
        assert_eq!(cli.levels, 7);
    }
}
