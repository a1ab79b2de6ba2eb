//! CLI smoke entry point.
//!
//! # Responsibility
//! - Provide a minimal executable to verify `taskrail_core` linkage.
//! - Keep output deterministic for quick local sanity checks.

use taskrail_core::db::{migrations, open_db_in_memory};

fn main() {
    println!("taskrail_core version={}", taskrail_core::core_version());
    match open_db_in_memory() {
        Ok(_) => println!(
            "taskrail_core schema_version={}",
            migrations::latest_version()
        ),
        Err(err) => {
            eprintln!("taskrail_core bootstrap failed: {err}");
            std::process::exit(1);
        }
    }
}
