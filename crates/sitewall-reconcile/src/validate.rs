//! Request validation.
//!
//! The site ends up both as a literal lookup key on the appliance and inside
//! a layer-7 regular expression, so only plain hostnames are accepted.

use crate::error::ValidationError;
use sitewall_common::SiteAction;

const MAX_SITE_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// A request that passed validation. Site is lowercase and hostname-shaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRequest {
    site: String,
    action: SiteAction,
}

impl ValidatedRequest {
    pub fn site(&self) -> &str {
        &self.site
    }

    pub fn action(&self) -> SiteAction {
        self.action
    }
}

pub fn validate(site: &str, action: &str) -> Result<ValidatedRequest, ValidationError> {
    let action = parse_action(action)?;
    let site = normalize_site(site)?;
    Ok(ValidatedRequest { site, action })
}

pub fn parse_action(action: &str) -> Result<SiteAction, ValidationError> {
    match action.trim().to_ascii_lowercase().as_str() {
        "block" => Ok(SiteAction::Block),
        "allow" => Ok(SiteAction::Allow),
        _ => Err(ValidationError::InvalidAction(action.to_string())),
    }
}

fn normalize_site(site: &str) -> Result<String, ValidationError> {
    let site = site.trim();
    if site.is_empty() {
        return Err(ValidationError::EmptySite);
    }

    let invalid = |reason| ValidationError::InvalidSite {
        site: site.to_string(),
        reason,
    };

    if site.len() > MAX_SITE_LEN {
        return Err(invalid("longer than 253 characters"));
    }

    for label in site.split('.') {
        if label.is_empty() {
            return Err(invalid("empty label"));
        }
        if label.len() > MAX_LABEL_LEN {
            return Err(invalid("label longer than 63 characters"));
        }
        if !label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-') {
            return Err(invalid("only letters, digits, '-' and '.' are allowed"));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(invalid("label starts or ends with '-'"));
        }
    }

    Ok(site.to_ascii_lowercase())
}

/// Escape regex metacharacters, leaving `.` alone.
///
/// A bare `.` in a hostname matches any single byte, which only widens the
/// match to near-identical names; the layer-7 patterns the appliance already
/// carries use this form.
pub fn escape_pattern(site: &str) -> String {
    let mut out = String::with_capacity(site.len());
    for ch in site.chars() {
        if matches!(
            ch,
            '\\' | '^' | '$' | '|' | '?' | '*' | '+' | '(' | ')' | '[' | ']' | '{' | '}'
        ) {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// The layer-7 pattern that matches traffic for `site`.
pub fn site_pattern(site: &str) -> String {
    format!(".*{}.*", escape_pattern(site))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_plain_hostname() {
        let req = validate("youtube.com", "block").unwrap();
        assert_eq!(req.site(), "youtube.com");
        assert_eq!(req.action(), SiteAction::Block);
    }

    #[test]
    fn test_action_is_case_insensitive() {
        assert_eq!(validate("a.com", "BLOCK").unwrap().action(), SiteAction::Block);
        assert_eq!(validate("a.com", "Allow").unwrap().action(), SiteAction::Allow);
        assert_eq!(validate("a.com", " allow ").unwrap().action(), SiteAction::Allow);
    }

    #[test]
    fn test_rejects_unknown_action() {
        let err = validate("a.com", "bloquear").unwrap_err();
        assert_eq!(err, ValidationError::InvalidAction("bloquear".to_string()));
        assert_eq!(err.to_string(), "invalid action");
        assert!(validate("a.com", "").is_err());
    }

    #[test]
    fn test_rejects_empty_site() {
        assert_eq!(validate("", "block").unwrap_err(), ValidationError::EmptySite);
        assert_eq!(validate("   ", "block").unwrap_err(), ValidationError::EmptySite);
    }

    #[test]
    fn test_site_is_trimmed_and_lowercased() {
        let req = validate("  WWW.YouTube.com ", "block").unwrap();
        assert_eq!(req.site(), "www.youtube.com");
    }

    #[test]
    fn test_rejects_regex_metacharacters() {
        for site in ["you*tube.com", "a|b.com", "(x).com", "a+b.com", "a?.com", "^a.com", "a.com$", "a\\d.com"] {
            assert!(
                matches!(validate(site, "block"), Err(ValidationError::InvalidSite { .. })),
                "{site} should be rejected"
            );
        }
    }

    #[test]
    fn test_rejects_malformed_labels() {
        assert!(validate("a..com", "block").is_err());
        assert!(validate(".a.com", "block").is_err());
        assert!(validate("a.com.", "block").is_err());
        assert!(validate("-a.com", "block").is_err());
        assert!(validate("a-.com", "block").is_err());
        assert!(validate(&format!("{}.com", "a".repeat(64)), "block").is_err());
        assert!(validate(&format!("{}com", "a.".repeat(130)), "block").is_err());
    }

    #[test]
    fn test_accepts_hyphens_and_digits() {
        assert!(validate("my-site2.example.co.uk", "allow").is_ok());
        assert!(validate("10.0.0.1", "block").is_ok());
    }

    #[test]
    fn test_site_pattern_wraps_hostname() {
        assert_eq!(site_pattern("youtube.com"), ".*youtube.com.*");
    }

    #[test]
    fn test_escape_pattern_escapes_metacharacters() {
        assert_eq!(escape_pattern("a*b(c)"), "a\\*b\\(c\\)");
        assert_eq!(escape_pattern("x.y"), "x.y");
    }
}
