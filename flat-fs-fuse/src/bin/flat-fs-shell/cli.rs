use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
pub struct Cli {
    /// Image file to mount at startup
    #[arg(long, short)]
    pub image: Option<PathBuf>,

    /// Capacity in bytes used when a mounted image has to be created
    #[arg(long, short, default_value_t = 1024 * 1024)]
    pub capacity: u64,
}
