//! Program name detection for argv[0] support
//!
//! Returns the name the binary was invoked as, so help text and hints
//! stay correct when `st` is installed under another name or symlinked.

#[cfg(not(test))]
use std::sync::OnceLock;

#[cfg(not(test))]
static PROGRAM_NAME: OnceLock<String> = OnceLock::new();

/// Get the program name as invoked (respects symlinks)
///
/// Returns the basename of argv[0], falling back to "st" if unavailable.
/// The value is memoized on first call. In test mode, always returns "st".
pub fn program_name() -> &'static str {
    #[cfg(test)]
    {
        "st"
    }

    #[cfg(not(test))]
    {
        PROGRAM_NAME.get_or_init(|| {
            std::env::args()
                .next()
                .and_then(|s| {
                    std::path::Path::new(&s)
                        .file_name()
                        .and_then(|n| n.to_str())
                        .map(String::from)
                })
                .unwrap_or_else(|| "st".to_string())
        })
    }
}
