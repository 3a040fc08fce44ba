use std::path::Path;

pub const FALLBACK_MIME: &str = "application/octet-stream";

/// Content type from magic bytes, then from the file extension.
pub fn detect_mimetype(bytes: &[u8], file_name: &str) -> String {
    if let Some(kind) = infer::get(bytes) {
        return kind.mime_type().to_string();
    }

    let extension = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("txt") => "text/plain",
        Some("md") => "text/markdown",
        Some("csv") => "text/csv",
        Some("json") => "application/json",
        Some("svg") => "image/svg+xml",
        _ => FALLBACK_MIME,
    }
    .to_string()
}

pub fn is_image(mime: &str) -> bool {
    mime.starts_with("image/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_from_magic_bytes() {
        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
        assert_eq!(detect_mimetype(&png, "whatever.bin"), "image/png");

        let pdf = b"%PDF-1.7\n";
        assert_eq!(detect_mimetype(pdf, "notes"), "application/pdf");
    }

    #[test]
    fn falls_back_to_extension_then_octet_stream() {
        assert_eq!(detect_mimetype(b"hello", "README.TXT"), "text/plain");
        assert_eq!(detect_mimetype(b"hello", "blob"), FALLBACK_MIME);
        assert!(!is_image(FALLBACK_MIME));
    }
}
