// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 seqflow contributors

//! Terminal color utilities
//!
//! Status glyphs and section headers shared by the commands.

use colored::{ColoredString, Colorize};

use crate::pipeline::TaskState;

/// Glyph for a task state
pub fn state_glyph(state: TaskState) -> ColoredString {
    match state {
        TaskState::Succeeded => "✓".green(),
        TaskState::Skipped => "○".dimmed(),
        TaskState::Failed => "✗".red(),
        TaskState::WouldRun => "→".blue(),
        TaskState::Pending | TaskState::Ready | TaskState::Running => "·".yellow(),
    }
}

/// Check if colors should be disabled
pub fn should_use_colors() -> bool {
    // NO_COLOR: https://no-color.org
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }

    console::Term::stdout().features().colors_supported()
}

/// Print a styled header
pub fn print_header(title: &str) {
    println!("{}", title.bold());
    println!("{}", "═".repeat(title.chars().count().max(40)));
}

/// Print a styled section
pub fn print_section(title: &str) {
    println!();
    println!("{}:", title.bold());
}

/// Print a success check
pub fn print_success(msg: &str) {
    println!("  {} {}", "✓".green(), msg);
}

/// Print an error cross
pub fn print_error(msg: &str) {
    println!("  {} {}", "✗".red(), msg);
}

/// Print a warning
pub fn print_warning(msg: &str) {
    println!("  {} {}", "⚠".yellow(), msg);
}
