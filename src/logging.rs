use std::io::Write;

use colored::{ColoredString, Colorize};
use log::Level;

/// Initializes `env_logger` with colored level labels, defaulting to `info`
/// when `RUST_LOG` is unset.
pub fn setup_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            let level = colorize_level(record.level());
            writeln!(buf, "[{level} {}] {}", record.target(), record.args())
        })
        .init();
}

fn colorize_level(level: Level) -> ColoredString {
    match level {
        Level::Error => "ERROR".red().bold(),
        Level::Warn => "WARN".yellow().bold(),
        Level::Info => "INFO".green(),
        Level::Debug => "DEBUG".blue(),
        Level::Trace => "TRACE".dimmed(),
    }
}

pub fn print_banner(title: &str, color: fn(&str) -> ColoredString) {
    let border = "╔═══════════════════════════════════════════════════════════════╗";
    let bottom = "╚═══════════════════════════════════════════════════════════════╝";

    println!("{}", color(border));
    println!("{}", color(&format!("║{:^63}║", title)));
    println!("{}", color(bottom));
}
