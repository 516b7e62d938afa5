//! `${VAR}` / `${VAR:-default}` expansion for raw config text.

/// Expand placeholders against the process environment.
///
/// Unset variables without a default are left verbatim so the parse error (if
/// any) points at the placeholder rather than at an empty value.
pub fn substitute_env(input: &str) -> String {
    substitute_with(input, |name| std::env::var(name).ok())
}

/// Expand placeholders using a custom lookup.
pub fn substitute_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            // Unterminated: keep the remainder literally.
            out.push_str(&rest[start..]);
            return out;
        };

        let inner = &after[..end];
        let (name, default) = match inner.split_once(":-") {
            Some((name, default)) => (name, Some(default)),
            None => (inner, None),
        };

        match (name.is_empty(), lookup(name), default) {
            (false, Some(value), _) => out.push_str(&value),
            (false, None, Some(default)) => out.push_str(default),
            _ => {
                out.push_str("${");
                out.push_str(inner);
                out.push('}');
            },
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}
