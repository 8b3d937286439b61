//! Content-Type resolution: explicit override, then file name, then the bytes themselves.

use http::header::{HeaderMap, HeaderValue, CONTENT_TYPE};

const OCTET_STREAM: &str = "application/octet-stream";

/// Resolve the Content-Type for a body served under `file_name`.
pub fn resolve(overrides: &HeaderMap, file_name: &str, content: &[u8]) -> HeaderValue {
    if let Some(v) = overrides.get(CONTENT_TYPE) {
        return v.clone();
    }
    let guessed = from_file_name(file_name).unwrap_or_else(|| sniff(content).to_string());
    HeaderValue::from_str(&guessed).unwrap_or_else(|_| HeaderValue::from_static(OCTET_STREAM))
}

/// MIME type implied by the file extension, with a utf-8 charset on textual types.
pub fn from_file_name(file_name: &str) -> Option<String> {
    let mime = mime_guess::from_path(file_name).first()?;
    let essence = mime.essence_str().to_string();
    let textual = mime.type_() == mime_guess::mime::TEXT
        || matches!(
            essence.as_str(),
            "application/javascript" | "application/json" | "application/xml" | "image/svg+xml"
        );
    if textual {
        Some(format!("{}; charset=utf-8", essence))
    } else {
        Some(essence)
    }
}

/// Best-effort MIME type from magic bytes.
pub fn sniff(content: &[u8]) -> &'static str {
    const SIGNATURES: &[(&[u8], &str)] = &[
        (b"\x89PNG\r\n\x1a\n", "image/png"),
        (b"\xff\xd8\xff", "image/jpeg"),
        (b"GIF87a", "image/gif"),
        (b"GIF89a", "image/gif"),
        (b"wOFF", "font/woff"),
        (b"wOF2", "font/woff2"),
        (b"\0asm", "application/wasm"),
        (b"%PDF-", "application/pdf"),
        (b"\x1f\x8b", "application/gzip"),
    ];
    for &(magic, mime) in SIGNATURES {
        if content.starts_with(magic) {
            return mime;
        }
    }
    if content.len() >= 12 && &content[..4] == b"RIFF" && &content[8..12] == b"WEBP" {
        return "image/webp";
    }

    let Ok(text) = std::str::from_utf8(content) else {
        return OCTET_STREAM;
    };
    let lower: String = text
        .trim_start()
        .chars()
        .take(256)
        .map(|c| c.to_ascii_lowercase())
        .collect();
    if lower.starts_with("<!doctype html") || lower.starts_with("<html") {
        "text/html; charset=utf-8"
    } else if lower.starts_with("<svg") || (lower.starts_with("<?xml") && lower.contains("<svg")) {
        "image/svg+xml"
    } else if lower.starts_with("<?xml") {
        "application/xml"
    } else {
        "text/plain; charset=utf-8"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/x-custom"));
        assert_eq!(resolve(&headers, "app.js", b"x"), "text/x-custom");
    }

    #[test]
    fn test_file_name_inference() {
        let css = resolve(&HeaderMap::new(), "site.css", b"body{}");
        assert_eq!(css, "text/css; charset=utf-8");
        let js = resolve(&HeaderMap::new(), "app.js", b"1");
        assert!(js.to_str().unwrap().contains("javascript"));
        assert_eq!(resolve(&HeaderMap::new(), "logo.png", b""), "image/png");
    }

    #[test]
    fn test_sniff_when_name_has_no_extension() {
        let png = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
        assert_eq!(resolve(&HeaderMap::new(), "logo", png), "image/png");
        assert_eq!(
            resolve(&HeaderMap::new(), "page", b"  <!DOCTYPE html><p>hi"),
            "text/html; charset=utf-8"
        );
        assert_eq!(
            resolve(&HeaderMap::new(), "blob", &[0xff, 0x00, 0xfe, 0x01]),
            OCTET_STREAM
        );
    }

    #[test]
    fn test_sniff_webp_and_plain_text() {
        assert_eq!(sniff(b"RIFF\x10\0\0\0WEBPVP8 "), "image/webp");
        assert_eq!(sniff(b"just words"), "text/plain; charset=utf-8");
    }
}
