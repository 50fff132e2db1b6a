//! Console helpers.
//!
//! Stdout carries remote output and target listings; everything else goes to
//! stderr.

use colored::Colorize;

use crate::config::TargetKind;

/// Whether colour output should be enabled for this process.
#[must_use]
pub fn color_enabled(stdout_is_terminal: bool) -> bool {
    stdout_is_terminal && std::env::var_os("NO_COLOR").is_none()
}

/// Apply the colour decision globally.
pub fn configure_color(enabled: bool) {
    colored::control::set_override(enabled);
}

/// Print the available targets, one per line.
pub fn print_targets(kind: TargetKind, names: &[String]) {
    if names.is_empty() {
        eprintln!("{} No {kind} available", "ℹ".blue().bold());
        return;
    }
    eprintln!("{}", format!("Available {kind}:").cyan().bold());
    for name in names {
        println!("{name}");
    }
}

/// Print an error message.
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message.red());
}
