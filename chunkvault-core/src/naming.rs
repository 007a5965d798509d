use crate::error::{Result, VaultError};

const MAX_COMPONENT_LEN: usize = 128;

/// Ensure `name` is usable as a single path component: no separators, no
/// traversal, no hidden-file tricks, ASCII only.
pub fn validate_component(name: &str) -> Result<()> {
    let reject = |reason| Err(VaultError::InvalidName { name: name.to_string(), reason });
    if name.is_empty() {
        return reject("empty");
    }
    if name.len() > MAX_COMPONENT_LEN {
        return reject("too long");
    }
    if name == "." || name == ".." {
        return reject("parent traversal not allowed");
    }
    if name.contains('/') || name.contains('\\') {
        return reject("path separators not allowed");
    }
    if !name.bytes().all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.')) {
        return reject("only ASCII letters, digits, '-', '_' and '.' are allowed");
    }
    Ok(())
}

/// Reduce an uploaded file name to something safe to embed in a storage key.
/// Directory parts are dropped, whitespace becomes `_`, and anything outside
/// `[A-Za-z0-9._-]` is removed. Never returns an empty string.
pub fn secure_file_name(original: &str) -> String {
    let base = original.rsplit(['/', '\\']).next().unwrap_or_default();
    let mut out = String::with_capacity(base.len());
    for ch in base.chars() {
        if ch.is_whitespace() {
            out.push('_');
        } else if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
            out.push(ch);
        }
    }
    let trimmed = out.trim_start_matches(['.', '_']).trim_end_matches('.');
    let mut name: String = trimmed.chars().take(MAX_COMPONENT_LEN - 33).collect();
    if name.is_empty() {
        name.push_str("file");
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_traversal_and_separators() {
        assert!(validate_component("..").is_err());
        assert!(validate_component(".").is_err());
        assert!(validate_component("a/b").is_err());
        assert!(validate_component("a\\b").is_err());
        assert!(validate_component("").is_err());
        assert!(validate_component("naïve").is_err());
        assert!(validate_component(&"x".repeat(200)).is_err());
    }

    #[test]
    fn accepts_plain_components() {
        validate_component("alice").unwrap();
        validate_component("user-42_b.x").unwrap();
    }

    #[test]
    fn secure_name_strips_directories_and_odd_chars() {
        assert_eq!(secure_file_name("../../etc/passwd"), "passwd");
        assert_eq!(secure_file_name("C:\\Users\\bob\\My Report.pdf"), "My_Report.pdf");
        assert_eq!(secure_file_name(".bashrc"), "bashrc");
        assert_eq!(secure_file_name("résumé.txt"), "rsum.txt");
        assert_eq!(secure_file_name("///"), "file");
        assert_eq!(secure_file_name(""), "file");
    }

    #[test]
    fn secure_name_is_a_valid_component() {
        for raw in ["a b c", "../x", "...", "中文.doc", "ok.bin"] {
            validate_component(&secure_file_name(raw)).unwrap();
        }
    }
}
