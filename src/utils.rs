pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Last path segment of a URL or file path, query string dropped.
pub fn url_file_name(location: &str) -> String {
    let path = location.split(['?', '#']).next().unwrap_or(location);
    path.split(&['\\', '/'][..])
        .rfind(|segment| !segment.is_empty())
        .unwrap_or(path)
        .to_string()
}

pub fn format_optional(value: Option<f64>, precision: usize) -> String {
    value
        .map(|v| format!("{:.*}", precision, v))
        .unwrap_or_else(|| "-".to_string())
}
