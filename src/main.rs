// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "spu-video")]
#[command(about = "Coprocessor offloaded YUV video output")]
#[command(version)]
struct Cli {
    /// Configuration file (default: <config dir>/spu-video/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the display modes of the framebuffer backend
    Modes,

    /// Play a synthetic YUV clip through the offload pipeline
    Play {
        /// Display mode index to use (from 'spu-video modes')
        #[arg(short, long, default_value = "8")]
        mode: usize,

        /// Clip width in pixels
        #[arg(long, default_value = "320")]
        width: u32,

        /// Clip height in pixels
        #[arg(long, default_value = "240")]
        height: u32,

        /// Size the clip is scaled to on screen (default: clip size)
        #[arg(long, value_parser = cli::parse_size)]
        scale_to: Option<(u32, u32)>,

        /// Number of frames to play
        #[arg(short, long, default_value = "30")]
        frames: u32,

        /// Write the last visible frame as PNG
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=spu_video=trace, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Modes => cli::list_modes(),
        Commands::Play {
            mode,
            width,
            height,
            scale_to,
            frames,
            output,
        } => cli::play(cli::PlayOptions {
            mode,
            clip: (width, height),
            scale_to,
            frames,
            output,
            config: cli.config,
        }),
    }
}
