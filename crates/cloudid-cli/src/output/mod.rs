//! Output formatting utilities
//!
//! Status messages go to stderr; stdout carries only command results such as
//! the token itself.

use console::style;

/// Print a success message with green checkmark
pub fn print_success(message: &str) {
    eprintln!("{} {}", style("✓").green().bold(), message);
}

/// Print an error message with red X
pub fn print_error(message: &str) {
    eprintln!("{} {}", style("✗").red().bold(), style(message).red());
}

/// Print an informational message with blue info icon
pub fn print_info(message: &str) {
    eprintln!("{} {}", style("ℹ").blue(), message);
}

/// Compress a path to use tilde notation for home directory
pub fn compress_path(path: &std::path::Path) -> String {
    if let Ok(home_dir) = std::env::var("HOME") {
        let home_path = std::path::Path::new(&home_dir);
        if let Ok(relative) = path.strip_prefix(home_path) {
            return format!("~/{}", relative.display());
        }
    }
    path.display().to_string()
}

/// Token line as printed by `cloudid token`
pub fn format_token(token: &str, bearer: bool) -> String {
    if bearer {
        format!("Bearer {token}")
    } else {
        token.to_string()
    }
}
