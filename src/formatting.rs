//! Presentation helpers for the HTML pages
//!
//! Thousands separators, HTML escaping and commit-message rendering.

/// Format a line count with comma thousands separators (e.g., 1,234,567)
pub fn format_line_count(count: i64) -> String {
    let digits = count.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if count < 0 {
        out.push('-');
    }
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Escape text for use inside HTML element content or quoted attributes
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

/// Render a raw commit message as HTML: escaped, newlines as `<br>`
pub fn commit_message_html(message: &str) -> String {
    escape_html(message).replace("\r\n", "\n").replace('\n', "<br>")
}

/// First line of a commit message (the subject)
pub fn commit_subject(message: &str) -> &str {
    message.lines().next().unwrap_or("")
}

/// Truncate string safely at char boundary
pub fn truncate_str(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}
