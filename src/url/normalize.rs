/// Normalizes a URL or path fragment
///
/// # Normalization Steps
///
/// 1. Trim surrounding whitespace
/// 2. Collapse runs of `/` in the path into a single `/`
/// 3. Drop a path that is only `/` when a scheme and host are present
/// 4. Drop the fragment (everything after `#`)
///
/// Scheme, host and query are kept as written. The function is idempotent.
///
/// # Examples
///
/// ```
/// use newscover::url::normalize;
///
/// assert_eq!(normalize("http://h.com/a//b///c"), "http://h.com/a/b/c");
/// assert_eq!(normalize("http://h.com///"), "http://h.com");
/// ```
pub fn normalize(url: &str) -> String {
    let url = url.trim();
    let url = match url.find('#') {
        Some(idx) => &url[..idx],
        None => url,
    };

    let (authority, rest) = split_authority(url);

    let query_start = rest.find('?').unwrap_or(rest.len());
    let (path, query) = rest.split_at(query_start);

    let mut collapsed = String::with_capacity(path.len());
    for c in path.chars() {
        if c == '/' && collapsed.ends_with('/') {
            continue;
        }
        collapsed.push(c);
    }

    if !authority.is_empty() && collapsed == "/" {
        collapsed.clear();
    }

    format!("{}{}{}", authority, collapsed, query)
}

/// Splits `scheme://host[:port]` (or a protocol-relative `//host`) from the rest
fn split_authority(url: &str) -> (&str, &str) {
    let host_start = if let Some(idx) = url.find("://") {
        idx + 3
    } else if url.starts_with("//") {
        2
    } else {
        return ("", url);
    };

    match url[host_start..].find(|c| c == '/' || c == '?') {
        Some(end) => url.split_at(host_start + end),
        None => (url, ""),
    }
}
