//! Product name normalization
//!
//! Canonical comparison key for product and certified image names:
//! lower-case, NFD decomposition with combining diacritics (U+0300..U+036F)
//! removed, everything outside `[a-z0-9]` and whitespace dropped, ends trimmed.
//! Internal whitespace is kept as-is.

use unicode_normalization::UnicodeNormalization;

fn is_combining_diacritic(ch: char) -> bool {
    ('\u{0300}'..='\u{036f}').contains(&ch)
}

/// Canonical key for exact-match lookups
///
/// Total and idempotent: `normalize(&normalize(s)) == normalize(s)`.
pub fn normalize(text: &str) -> String {
    let folded: String = text
        .to_lowercase()
        .nfd()
        .filter(|ch| !is_combining_diacritic(*ch))
        .filter(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch.is_whitespace())
        .collect();

    folded.trim().to_string()
}

/// Display name derived from an uploaded file name
///
/// Drops the extension and turns `-`/`_` into spaces:
/// `"leite_integral-1L.jpg"` becomes `"leite integral 1L"`.
pub fn product_name_from_filename(filename: &str) -> String {
    let stem = match filename.rfind('.') {
        Some(dot) if dot > 0 => {
            let extension = &filename[dot + 1..];
            if extension.is_empty() || extension.contains(['/', '\\']) {
                filename
            } else {
                &filename[..dot]
            }
        }
        _ => filename,
    };

    stem.replace(['-', '_'], " ").trim().to_string()
}
