/// Punctuation allowed in a filename besides letters, digits and spaces.
const ALLOWED_PUNCTUATION: &[char] = &['-', '_', '.', '(', ')'];

/// Check a user-edited filename. Returns the message to show next to the
/// field, or `None` when the name is acceptable.
pub fn filename_error(name: &str, max_len: usize) -> Option<String> {
    let trimmed = name.trim();

    if trimmed.is_empty() {
        return Some("Filename cannot be empty".to_string());
    }

    let len = trimmed.chars().count();
    if len > max_len {
        return Some(format!(
            "Filename is too long ({len} characters, at most {max_len})"
        ));
    }

    if trimmed.starts_with('.') {
        return Some("Filename cannot start with a dot".to_string());
    }

    if let Some(bad) = trimmed
        .chars()
        .find(|c| !(c.is_alphanumeric() || *c == ' ' || ALLOWED_PUNCTUATION.contains(c)))
    {
        return Some(if bad.is_control() {
            "Filename cannot contain control characters".to_string()
        } else {
            format!("Filename cannot contain '{bad}'")
        });
    }

    None
}
