//! URL helpers for the backend base address.

/// Normalize a base URL by trimming whitespace and trailing slashes.
///
/// ```
/// use parlor::utils::url::normalize_base_url;
///
/// assert_eq!(normalize_base_url("http://localhost:8000/api/"), "http://localhost:8000/api");
/// assert_eq!(normalize_base_url(" http://localhost:8000 "), "http://localhost:8000");
/// ```
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim().trim_end_matches('/').to_string()
}
