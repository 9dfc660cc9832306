//! Writing decoded attachments to disk.

pub mod attachment;

/// Sanitize a string for use in filenames.
///
/// Replaces invalid characters with `_` and truncates to `max_len`. Names
/// made only of dots would escape the target directory and become `unknown`.
pub fn sanitize_filename_part(s: &str, max_len: usize) -> String {
    let sanitized: String = s
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '.' || c == '_' || c == '@' {
                c
            } else {
                '_'
            }
        })
        .take(max_len)
        .collect();

    if sanitized.chars().all(|c| c == '.') {
        "unknown".to_string()
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename_part("hello world", 20), "hello_world");
        assert_eq!(sanitize_filename_part("[1] eicar.txt", 30), "_1__eicar.txt");
        assert_eq!(sanitize_filename_part("../../etc/passwd", 30), ".._.._etc_passwd");
        assert_eq!(sanitize_filename_part("abcdef", 3), "abc");
    }

    #[test]
    fn test_sanitize_dots_and_empty() {
        assert_eq!(sanitize_filename_part("", 10), "unknown");
        assert_eq!(sanitize_filename_part("..", 10), "unknown");
        assert_eq!(sanitize_filename_part(".", 10), "unknown");
    }
}
