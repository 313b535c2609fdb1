use anyhow::Result;
use cloudsift::cli::process_cli;

pub fn main() -> Result<()> {
    process_cli()
}
