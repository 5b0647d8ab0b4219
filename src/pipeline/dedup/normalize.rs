//! Filename and content normalization for similarity comparison.
//!
//! Scanned documents arrive with capture-device names (`IMG_20240112_093015.jpg`,
//! `Scan 2024-01-12 (2).pdf`) that say nothing about content. Normalization
//! strips the noise so the edit-distance tier compares what is left.

use std::sync::OnceLock;

use regex::Regex;

fn device_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^(?:img|image|dsc[nf]?|pxl|mvimg|pano|scan(?:ned)?(?:_doc(?:ument)?)?|camscanner|screenshot|photo|pic)[ _-]*",
        )
        .unwrap()
    })
}

fn embedded_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // 2024-01-12, 20240112, 20240112_093015 and similar
    RE.get_or_init(|| {
        Regex::new(r"(?:19|20)\d{2}[-_. ]?\d{2}[-_. ]?\d{2}(?:[-_. ]?\d{6})?").unwrap()
    })
}

fn version_suffix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // trailing "v2", "copy", "copy 3", "(1)", "final"
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:[ _-]*(?:v\d+|copy(?:[ _]?\d+)?|final|\(\d+\)))+$").unwrap()
    })
}

fn punctuation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-z0-9]+").unwrap())
}

/// Normalize a filename for tier-0 comparison.
///
/// Lower-cases, drops the extension, strips capture-device prefixes,
/// embedded dates, version suffixes and punctuation, and collapses
/// whitespace. May return an empty string when nothing but noise remains
/// (pure camera names); empty names carry no similarity signal.
pub fn normalize_filename(filename: &str) -> String {
    let lower = filename.trim().to_lowercase();

    // Drop the extension, keeping dotfiles intact.
    let stem = match lower.rfind('.') {
        Some(idx) if idx > 0 => &lower[..idx],
        _ => lower.as_str(),
    };

    let stripped = device_prefix_re().replace(stem, "");
    let stripped = embedded_date_re().replace_all(&stripped, " ");
    let stripped = version_suffix_re().replace(&stripped, "");
    let spaced = punctuation_re().replace_all(&stripped, " ");

    spaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lower-cased text sample for the content and semantic tiers.
///
/// Truncation is by character, not byte, so multibyte text never splits
/// mid-codepoint.
pub fn content_sample(text: &str, max_chars: usize) -> String {
    text.trim().chars().take(max_chars).collect::<String>().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_device_prefix_and_date() {
        assert_eq!(normalize_filename("IMG_20240112_093015.jpg"), "");
        assert_eq!(normalize_filename("Scan 2024-01-12 invoice.pdf"), "invoice");
        assert_eq!(normalize_filename("DSC_0042 lease agreement.jpg"), "0042 lease agreement");
    }

    #[test]
    fn strips_version_suffixes() {
        assert_eq!(normalize_filename("contract_v2.pdf"), "contract");
        assert_eq!(normalize_filename("tax return (1).pdf"), "tax return");
        assert_eq!(normalize_filename("lease copy 2.pdf"), "lease");
        assert_eq!(normalize_filename("report final.pdf"), "report");
    }

    #[test]
    fn collapses_punctuation_and_case() {
        assert_eq!(
            normalize_filename("Invoice--ACME_Corp..March.pdf"),
            "invoice acme corp march"
        );
    }

    #[test]
    fn same_document_different_capture_names_converge() {
        let a = normalize_filename("SCAN_bank statement january.pdf");
        let b = normalize_filename("Bank Statement - January (2).jpg");
        assert_eq!(a, "bank statement january");
        assert_eq!(a, b);
    }

    #[test]
    fn normalization_is_idempotent() {
        let once = normalize_filename("Scan 2024-01-12 Invoice v3.pdf");
        let twice = normalize_filename(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn content_sample_truncates_by_char() {
        let text = "é".repeat(1500);
        let sample = content_sample(&text, 1000);
        assert_eq!(sample.chars().count(), 1000);
    }

    #[test]
    fn content_sample_lowercases() {
        assert_eq!(content_sample("  INVOICE Total Due  ", 1000), "invoice total due");
    }

    #[test]
    fn empty_inputs_stay_empty() {
        assert_eq!(normalize_filename(""), "");
        assert_eq!(content_sample("", 1000), "");
    }
}
