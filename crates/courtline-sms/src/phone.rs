//! Phone normalization and message cost estimation.
//!
//! Pure functions. Providers want numbers in international format with the
//! country code and no plus sign ("9665xxxxxxxx"); operators type them in
//! every other way ("05...", "+966...", "00966...", with spaces and dashes).

use courtline_core::error::{CourtlineError, Result};

/// Characters per segment for a pure-ASCII (GSM 03.38) message.
pub const GSM_SEGMENT_LIMIT: usize = 160;
/// Characters per segment once any non-ASCII character forces UCS-2.
pub const UCS2_SEGMENT_LIMIT: usize = 70;

/// Normalize a raw phone number to canonical international format.
///
/// Strips separators, international prefixes ("+", "00"), and the local
/// trunk zero, then enforces the configured country code.
pub fn normalize(raw: &str, country_code: &str) -> Result<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return Err(CourtlineError::rejected(format!("not a phone number: '{raw}'")));
    }

    let digits = digits.strip_prefix("00").unwrap_or(&digits);
    let canonical = if digits.starts_with(country_code) {
        digits.to_string()
    } else if let Some(local) = digits.strip_prefix('0') {
        format!("{country_code}{local}")
    } else {
        format!("{country_code}{digits}")
    };

    // Sanity bounds per E.164: country code + subscriber number.
    let subscriber_len = canonical.len() - country_code.len();
    if !(7..=12).contains(&subscriber_len) {
        return Err(CourtlineError::rejected(format!(
            "implausible number '{raw}' (normalized '{canonical}')"
        )));
    }
    Ok(canonical)
}

/// Whether the body fits the GSM alphabet. Any non-ASCII character (Arabic
/// text in practice) pushes the whole message to UCS-2 encoding.
pub fn is_gsm(body: &str) -> bool {
    body.is_ascii()
}

/// Number of SMS segments the body occupies. UCS-2 budgets count UTF-16
/// code units, so a supplementary-plane character (emoji) costs two.
pub fn segments(body: &str) -> u32 {
    let (units, limit) = if is_gsm(body) {
        (body.len(), GSM_SEGMENT_LIMIT)
    } else {
        (body.encode_utf16().count(), UCS2_SEGMENT_LIMIT)
    };
    (units.div_ceil(limit)).max(1) as u32
}

/// Estimated cost: segments × per-segment rate × recipient count.
pub fn estimate_cost(body: &str, recipients: usize, per_segment_rate: f64) -> f64 {
    segments(body) as f64 * per_segment_rate * recipients as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_local_format() {
        assert_eq!(normalize("0501234567", "966").unwrap(), "966501234567");
    }

    #[test]
    fn test_normalize_plus_and_spaces() {
        assert_eq!(normalize("+966 50 123 4567", "966").unwrap(), "966501234567");
        assert_eq!(normalize("00966501234567", "966").unwrap(), "966501234567");
    }

    #[test]
    fn test_normalize_bare_subscriber() {
        assert_eq!(normalize("501234567", "966").unwrap(), "966501234567");
    }

    #[test]
    fn test_normalize_already_canonical() {
        assert_eq!(normalize("966501234567", "966").unwrap(), "966501234567");
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        assert!(normalize("call me", "966").is_err());
        assert!(normalize("12", "966").is_err());
    }

    #[test]
    fn test_segments_gsm() {
        assert_eq!(segments(""), 1);
        assert_eq!(segments(&"a".repeat(160)), 1);
        assert_eq!(segments(&"a".repeat(161)), 2);
    }

    #[test]
    fn test_segments_unicode() {
        // One Arabic character forces UCS-2 for the whole body.
        let body = format!("{}م", "a".repeat(70));
        assert_eq!(segments(&body), 2);
        assert_eq!(segments("مرحبا"), 1);
    }

    #[test]
    fn test_segments_count_utf16_units() {
        // 69 Arabic chars + one emoji = 71 UTF-16 units → 2 segments, even
        // though the body is only 70 characters.
        let body = format!("{}🎾", "م".repeat(69));
        assert_eq!(body.chars().count(), 70);
        assert_eq!(segments(&body), 2);

        let exact = "م".repeat(70);
        assert_eq!(segments(&exact), 1);
    }

    #[test]
    fn test_estimate_cost() {
        let cost = estimate_cost(&"a".repeat(200), 3, 0.05);
        // 2 segments * 0.05 * 3 recipients
        assert!((cost - 0.30).abs() < f64::EPSILON);
    }
}
