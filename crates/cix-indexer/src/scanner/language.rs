//! Language detection from file content.

/// Detect language from file content (shebang line).
///
/// Returns a language name that can be looked up in the scanner registry.
pub fn detect_language_from_content(content: &str) -> Option<&'static str> {
    let first_line = content.lines().next()?;

    if !first_line.starts_with("#!") {
        return None;
    }

    if first_line.contains("python") {
        return Some("Python");
    }
    if first_line.contains("ts-node") {
        return Some("TypeScript");
    }
    if first_line.contains("node") || first_line.contains("deno") || first_line.contains("bun") {
        return Some("JavaScript");
    }
    if first_line.contains("rust-script") {
        return Some("Rust");
    }

    None
}
