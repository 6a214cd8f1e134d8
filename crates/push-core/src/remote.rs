//! Git remote normalization for project scope keys.
//!
//! Tasks in the queue are scoped to a project by its normalized git remote
//! (e.g. `github.com/user/repo`). Normalization must agree across every
//! component that produces or filters by scope keys, so it lives here.

/// Normalize a git remote URL into a scope key.
///
/// * protocol prefixes (`https://`, `http://`, `ssh://git@`, `git@`) are
///   stripped
/// * scp-style `host:path` becomes `host/path`
/// * a trailing `.git` is removed
///
/// ```
/// use push_core::remote::normalize_remote_url;
/// assert_eq!(
///     normalize_remote_url("git@github.com:user/repo.git"),
///     "github.com/user/repo"
/// );
/// ```
pub fn normalize_remote_url(url: &str) -> String {
    let mut rest = url.trim();

    for prefix in ["https://", "http://", "ssh://git@", "git@"] {
        if let Some(stripped) = rest.strip_prefix(prefix) {
            rest = stripped;
            break;
        }
    }

    let mut key = rest.to_string();

    // scp-style: git@github.com:user/repo -> github.com/user/repo
    if key.contains(':') && !key.contains("://") {
        key = key.replacen(':', "/", 1);
    }

    if let Some(stripped) = key.strip_suffix(".git") {
        key = stripped.to_string();
    }

    key
}

#[cfg(test)]
mod tests {
    use super::normalize_remote_url;

    #[test]
    fn https_url() {
        assert_eq!(
            normalize_remote_url("https://github.com/user/repo.git"),
            "github.com/user/repo"
        );
    }

    #[test]
    fn https_url_without_suffix() {
        assert_eq!(
            normalize_remote_url("https://github.com/user/repo"),
            "github.com/user/repo"
        );
    }

    #[test]
    fn scp_style_url() {
        assert_eq!(
            normalize_remote_url("git@github.com:user/repo.git"),
            "github.com/user/repo"
        );
    }

    #[test]
    fn ssh_protocol_url() {
        assert_eq!(
            normalize_remote_url("ssh://git@gitlab.com/group/project.git"),
            "gitlab.com/group/project"
        );
    }

    #[test]
    fn colon_converted_once() {
        assert_eq!(
            normalize_remote_url("git@host.example:a/b:c"),
            "host.example/a/b:c"
        );
    }

    #[test]
    fn already_normalized_passthrough() {
        assert_eq!(
            normalize_remote_url("github.com/user/repo"),
            "github.com/user/repo"
        );
    }

    #[test]
    fn whitespace_trimmed() {
        assert_eq!(
            normalize_remote_url("  https://github.com/user/repo.git\n"),
            "github.com/user/repo"
        );
    }
}
