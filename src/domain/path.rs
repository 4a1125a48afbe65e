/**
 * Path normalization and `LIKE`-pattern escaping (component A, spec §3
 * "Path encoding rules" and design note "path normalization is the
 * trust boundary").
 *
 * All SQL parameters the VFS issues derive from `normalize`; all
 * prefix-matching `LIKE` patterns go through `escape_like`.
 */

/// Canonicalizes a POSIX-style path: collapses repeated slashes,
/// resolves `.` and `..` segments, and ensures a single leading slash
/// with no trailing slash (except the root `/`).
///
/// `normalize(normalize(p)) == normalize(p)` for all `p` (spec §8,
/// invariant 2).
pub fn normalize(path: &str) -> String {
    let mut stack: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            other => stack.push(other),
        }
    }
    if stack.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", stack.join("/"))
    }
}

/// Appends a trailing slash to a normalized path, used whenever a key
/// is being looked up or written as an explicit directory row.
pub fn as_dir_key(normalized: &str) -> String {
    if normalized == "/" {
        "/".to_string()
    } else {
        format!("{normalized}/")
    }
}

/// Escapes `\`, `%`, and `_` for use in a `LIKE ... ESCAPE '\'` pattern,
/// so a file literally named e.g. `/a%b` doesn't leak matches onto
/// sibling `/axb` (spec §8 invariant 7, design note on trust boundary).
pub fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c == '\\' || c == '%' || c == '_' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Builds a `path LIKE <prefix>% ESCAPE '\'` pattern matching every
/// descendant of `prefix` (prefix itself is expected to already end in
/// `/` when matching directory children).
pub fn like_prefix_pattern(prefix: &str) -> String {
    format!("{}%", escape_like(prefix))
}

/// The escape character used in every `LIKE ... ESCAPE` clause issued
/// by the VFS.
pub const LIKE_ESCAPE: &str = "\\";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_dot_and_dotdot_segments() {
        assert_eq!(normalize("/a//b/../c"), "/a/c");
        assert_eq!(normalize("/a/./b/"), "/a/b");
        assert_eq!(normalize(""), "/");
        assert_eq!(normalize("/"), "/");
        assert_eq!(normalize("a/b"), "/a/b");
        assert_eq!(normalize("/../../a"), "/a");
    }

    #[test]
    fn normalize_is_idempotent() {
        for p in ["/a//b/../c", "/", "/x/y/z/", "weird/../../path"] {
            let once = normalize(p);
            let twice = normalize(&once);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn strips_trailing_slash_except_root() {
        assert_eq!(normalize("/a/b/"), "/a/b");
        assert_eq!(normalize("/"), "/");
    }

    #[test]
    fn escapes_like_metacharacters() {
        assert_eq!(escape_like("a%b"), "a\\%b");
        assert_eq!(escape_like("a_b"), "a\\_b");
        assert_eq!(escape_like("a\\b"), "a\\\\b");
        assert_eq!(escape_like("plain"), "plain");
    }

    #[test]
    fn like_prefix_pattern_escapes_then_appends_wildcard() {
        assert_eq!(like_prefix_pattern("/a%b/"), "/a\\%b/%");
    }
}
