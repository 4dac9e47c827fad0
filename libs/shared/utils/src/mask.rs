use regex::Regex;
use std::sync::OnceLock;

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap())
}

fn phone_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\+?\d[\d .()-]{6,}\d").unwrap())
}

/// Masks phones and e-mail addresses in free text before it reaches a log
/// line. Phones keep their last four digits; e-mails keep only the first
/// character of the local part.
pub fn mask_pii(text: &str) -> String {
    let masked = email_re().replace_all(text, |caps: &regex::Captures| {
        let m = caps.get(0).map(|m| m.as_str()).unwrap_or("");
        match m.chars().next() {
            Some(first) => format!("{}***@***", first),
            None => "***@***".to_string(),
        }
    });

    phone_re()
        .replace_all(&masked, |caps: &regex::Captures| {
            let digits: String = caps
                .get(0)
                .map(|m| m.as_str())
                .unwrap_or("")
                .chars()
                .filter(|c| c.is_ascii_digit())
                .collect();
            mask_phone(&digits)
        })
        .into_owned()
}

/// `5511999999999` → `*********9999`.
pub fn mask_phone(digits: &str) -> String {
    if digits.len() <= 4 {
        return "*".repeat(digits.len());
    }
    let visible = &digits[digits.len() - 4..];
    format!("{}{}", "*".repeat(digits.len() - 4), visible)
}

/// Keeps the first name, masks the rest.
pub fn mask_name(full_name: &str) -> String {
    let mut parts = full_name.split_whitespace();
    match parts.next() {
        Some(first) if parts.next().is_some() => format!("{} ***", first),
        Some(first) => first.to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_phone_keeping_last_four() {
        assert_eq!(mask_phone("5511999999999"), "*********9999");
        assert_eq!(mask_phone("123"), "***");
    }

    #[test]
    fn masks_pii_in_free_text() {
        let masked = mask_pii("contato: maria@example.com ou +55 11 99999-9999");
        assert!(!masked.contains("maria@example.com"));
        assert!(!masked.contains("99999-9999"));
        assert!(masked.contains("m***@***"));
        assert!(masked.ends_with("9999"));
    }

    #[test]
    fn masks_full_name() {
        assert_eq!(mask_name("Maria da Silva"), "Maria ***");
        assert_eq!(mask_name("Maria"), "Maria");
    }
}
