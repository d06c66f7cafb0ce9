/// Real name of the OS user, or the login name when it is not set.
pub fn get_name() -> String {
    let name = whoami::realname();
    if name.trim().is_empty() {
        return whoami::username();
    }
    name
}

/// `<login>@<hostname>`, used as commit email when none is configured.
pub fn get_email() -> String {
    let host = whoami::fallible::hostname()
        .ok()
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| "localhost".to_string());
    format!("{}@{}", whoami::username(), host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity() {
        assert!(!get_name().trim().is_empty());
        let email = get_email();
        assert!(email.contains('@'));
        assert!(!email.ends_with('@'));
    }
}
