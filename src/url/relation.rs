use super::normalize;
use url::{ParseError, Url};

/// Returns true if `url` has neither a scheme nor a host
///
/// Protocol-relative references (`//host/path`) carry a host and are not paths.
pub fn is_path(url: &str) -> bool {
    !url.starts_with("//") && matches!(Url::parse(url), Err(ParseError::RelativeUrlWithoutBase))
}

/// Returns true if `url` is a path starting at the root (`/a/b`)
pub fn is_absolute_path(url: &str) -> bool {
    is_path(url) && url.starts_with('/')
}

/// Returns true if `url` is a path or points at the same host and port as `index`
pub fn is_same_host(index: &str, url: &str) -> bool {
    if is_path(url) {
        return true;
    }

    match (authority(index), authority(url)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Returns true if `url` lives under `index`
///
/// Relative paths are always under `index`. Otherwise the hosts must match and
/// the path segments of `index` must be a prefix of the path segments of `url`,
/// so `/a` contains `/a/b` but not `/ab`.
pub fn is_sub_url(index: &str, url: &str) -> bool {
    if !is_same_host(index, url) {
        return false;
    }

    if is_path(url) && !is_absolute_path(url) {
        return true;
    }

    let index_path = path_of(index);
    let url_path = path_of(url);
    segments(&url_path).starts_with(&segments(&index_path))
}

/// Resolves `url` against `index`
///
/// Full URLs are returned as they are, absolute paths are joined onto the
/// scheme and host of `index`, and relative paths are joined onto the whole of
/// `index`. The result is always normalized.
///
/// # Examples
///
/// ```
/// use newscover::url::fill_url;
///
/// assert_eq!(fill_url("http://h.com/news", "/about"), "http://h.com/about");
/// assert_eq!(fill_url("http://h.com/news", "today"), "http://h.com/news/today");
/// assert_eq!(fill_url("http://h.com/news", "http://o.com/x"), "http://o.com/x");
/// ```
pub fn fill_url(index: &str, url: &str) -> String {
    let url = url.trim();

    if url.starts_with("//") {
        let scheme = Url::parse(index)
            .map(|u| u.scheme().to_string())
            .unwrap_or_else(|_| "http".to_string());
        return normalize(&format!("{}:{}", scheme, url));
    }

    if !is_path(url) {
        return normalize(url);
    }

    if is_absolute_path(url) {
        return match Url::parse(index) {
            Ok(parsed) => normalize(&format!("{}{}", parsed.origin().ascii_serialization(), url)),
            Err(_) => normalize(url),
        };
    }

    normalize(&format!("{}/{}", index.trim_end_matches('/'), url))
}

/// Counts the path segments of `url` below `index`
///
/// Returns `None` when `url` is not a sub-URL of `index`, `Some(0)` when both
/// point at the same path.
///
/// # Examples
///
/// ```
/// use newscover::url::depth;
///
/// assert_eq!(depth("http://h/a/", "http://h/a/b/c"), Some(2));
/// assert_eq!(depth("http://h/a/", "http://o/a/b"), None);
/// ```
pub fn depth(index: &str, url: &str) -> Option<usize> {
    if !is_sub_url(index, url) {
        return None;
    }

    let url_path = path_of(url);
    let target = segments(&url_path);
    if is_path(url) && !is_absolute_path(url) {
        return Some(target.len());
    }

    let index_path = path_of(index);
    let base = segments(&index_path);
    Some(target.len() - base.len())
}

/// Returns the lowercase extension of the last path segment, if any
pub fn file_extension(url: &str) -> Option<String> {
    let path = path_of(url);
    let last = path.rsplit('/').next()?;
    let (stem, ext) = last.rsplit_once('.')?;

    if stem.is_empty() || ext.is_empty() {
        return None;
    }

    Some(ext.to_ascii_lowercase())
}

/// Host and effective port of a full URL
fn authority(url: &str) -> Option<(String, Option<u16>)> {
    let parsed = if url.starts_with("//") {
        Url::parse(&format!("http:{}", url)).ok()?
    } else {
        Url::parse(url).ok()?
    };

    let host = parsed.host_str()?.to_ascii_lowercase();
    Some((host, parsed.port_or_known_default()))
}

/// Path component of a URL or path, without query and fragment
fn path_of(url: &str) -> String {
    if is_path(url) {
        let end = url.find(|c| c == '?' || c == '#').unwrap_or(url.len());
        return url[..end].to_string();
    }

    match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => String::new(),
    }
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}
