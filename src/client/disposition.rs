use regex::Regex;
use std::sync::OnceLock;

fn extended_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?i)filename\*\s*=\s*([A-Za-z0-9_-]*)'[^']*'([^;]+)"#)
            .expect("static pattern compiles")
    })
}

fn quoted_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?i)filename\s*=\s*"([^"]*)""#)
            .expect("static pattern compiles")
    })
}

fn bare_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?i)filename\s*=\s*([^;"\s]+)"#)
            .expect("static pattern compiles")
    })
}

/// Extract a safe file name from a `Content-Disposition` header value.
///
/// `filename*=` (RFC 5987) wins over `filename=`. Path components are
/// stripped; an empty result is treated as absent.
pub fn filename_from_content_disposition(header: &str) -> Option<String> {
    let raw = if let Some(caps) = extended_pattern().captures(header) {
        let encoded = caps.get(2)?.as_str().trim();
        urlencoding::decode(encoded)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| encoded.to_string())
    } else if let Some(caps) = quoted_pattern().captures(header) {
        caps.get(1)?.as_str().to_string()
    } else {
        bare_pattern().captures(header)?.get(1)?.as_str().to_string()
    };

    let name = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim()
        .to_string();

    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quoted_filename() {
        assert_eq!(
            filename_from_content_disposition(r#"attachment; filename="Invoice 42.docx""#),
            Some("Invoice 42.docx".to_string())
        );
    }

    #[test]
    fn test_bare_filename() {
        assert_eq!(
            filename_from_content_disposition("attachment; filename=report.pdf; size=12"),
            Some("report.pdf".to_string())
        );
    }

    #[test]
    fn test_extended_filename_preferred() {
        assert_eq!(
            filename_from_content_disposition(
                r#"attachment; filename="fallback.docx"; filename*=UTF-8''Angebot%20M%C3%BCller.docx"#
            ),
            Some("Angebot Müller.docx".to_string())
        );
    }

    #[test]
    fn test_paths_stripped_and_empty_rejected() {
        assert_eq!(
            filename_from_content_disposition(r#"attachment; filename="../../etc/passwd""#),
            Some("passwd".to_string())
        );
        assert_eq!(
            filename_from_content_disposition(r#"attachment; filename="""#),
            None
        );
        assert_eq!(filename_from_content_disposition("inline"), None);
    }
}
