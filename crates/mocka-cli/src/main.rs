#![allow(clippy::print_stdout, clippy::print_stderr, clippy::exit)]

use clap::Parser;
use mocka_cli::{MockaCli, init_tracing, render_error, run};

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = MockaCli::parse();
    match run(cli).await {
        Ok(lines) => {
            for line in lines {
                println!("{line}");
            }
        }
        Err(error) => {
            for line in render_error(&error) {
                eprintln!("{line}");
            }
            std::process::exit(1);
        }
    }
}
