//! Canonical phone identity normalization
//!
//! Every phone number is stored and looked up in one canonical form:
//! optional leading `+`, digits only. Channel prefixes (`whatsapp:`) and
//! separators are stripped before anything touches the database.

/// Normalize a raw sender identity to the canonical storage form.
///
/// `"whatsapp:+91 98765-43210"` becomes `"+919876543210"`.
pub fn normalize_phone(raw: &str) -> String {
    let trimmed = raw.trim();
    let without_prefix = trimmed
        .strip_prefix("whatsapp:")
        .or_else(|| trimmed.strip_prefix("tel:"))
        .unwrap_or(trimmed);

    let mut out = String::with_capacity(without_prefix.len());
    for (i, c) in without_prefix.chars().enumerate() {
        if c.is_ascii_digit() {
            out.push(c);
        } else if c == '+' && i == 0 {
            out.push(c);
        }
    }
    out
}
