//! SMS send path: phone normalization, merge-tag substitution and opt-out
//! disclaimer injection.
//!
//! Normalization happens before any transport call; a number that cannot
//! be shaped into E.164 is failed locally without touching the provider.

use chrono::Utc;

use crate::error::EngineError;
use crate::model::{CampaignSettings, Contact};

/// Default opt-out disclaimer appended to SMS bodies.
pub const DEFAULT_OPTOUT_TEXT: &str = "Responda SAIR para cancelar";

/// Placeholder that positions the opt-out disclaimer inside a template.
const OPTOUT_TAG: &str = "{{optout}}";

/// Normalize a phone number into E.164.
///
/// Separators and formatting are stripped. Numbers with a leading `+` (or
/// international `00` prefix) are taken as-is; bare numbers are assumed to
/// be local and get the default country code, unless they already start
/// with it and carry a plausible subscriber length.
///
/// The result must match `+` followed by 8-15 digits or the recipient is
/// rejected before any transport call.
pub fn normalize_e164(raw: &str, default_country_code: &str) -> Result<String, EngineError> {
    let trimmed = raw.trim();
    let has_plus = trimmed.starts_with('+');
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();

    if digits.is_empty() {
        return Err(EngineError::InvalidPhone(raw.to_string()));
    }

    let normalized = if has_plus {
        format!("+{}", digits)
    } else if let Some(rest) = digits.strip_prefix("00") {
        // International dialing prefix
        format!("+{}", rest)
    } else if digits.starts_with(default_country_code)
        && (digits.len() - default_country_code.len()) >= 10
    {
        // Already carries the country code plus a full subscriber number
        format!("+{}", digits)
    } else {
        format!("+{}{}", default_country_code, digits)
    };

    if is_valid_e164(&normalized) {
        Ok(normalized)
    } else {
        Err(EngineError::InvalidPhone(raw.to_string()))
    }
}

/// `+` followed by 8-15 digits, first digit non-zero.
fn is_valid_e164(phone: &str) -> bool {
    let Some(digits) = phone.strip_prefix('+') else {
        return false;
    };
    (8..=15).contains(&digits.len())
        && digits.chars().all(|c| c.is_ascii_digit())
        && !digits.starts_with('0')
}

/// Substitute merge tags into a template body.
///
/// Supported tags: `{{first_name}}`, `{{last_name}}`, `{{email}}`,
/// `{{phone}}`, `{{company}}`, `{{date}}`. Unknown tags are left
/// untouched; missing contact fields substitute as empty strings.
pub fn render_merge_tags(template: &str, contact: &Contact) -> String {
    let date = Utc::now().format("%d/%m/%Y").to_string();
    let mut body = template.to_string();

    let substitutions = [
        ("{{first_name}}", contact.first_name.as_deref().unwrap_or("")),
        ("{{last_name}}", contact.last_name.as_deref().unwrap_or("")),
        ("{{email}}", contact.email.as_deref().unwrap_or("")),
        ("{{phone}}", contact.phone.as_deref().unwrap_or("")),
        ("{{company}}", contact.company.as_deref().unwrap_or("")),
        ("{{date}}", date.as_str()),
    ];

    for (tag, value) in substitutions {
        if body.contains(tag) {
            body = body.replace(tag, value);
        }
    }

    body
}

/// Append or substitute the opt-out disclaimer unless settings suppress it.
pub fn apply_optout_text(body: &str, settings: &CampaignSettings) -> String {
    if settings.skip_optout_text {
        return body.replace(OPTOUT_TAG, "").trim_end().to_string();
    }

    let optout = settings.optout_text.as_deref().unwrap_or(DEFAULT_OPTOUT_TEXT);

    if body.contains(OPTOUT_TAG) {
        body.replace(OPTOUT_TAG, optout)
    } else {
        format!("{}\n{}", body.trim_end(), optout)
    }
}

/// Full SMS body rendering: merge tags, then the opt-out disclaimer.
pub fn render_body(template: &str, contact: &Contact, settings: &CampaignSettings) -> String {
    apply_optout_text(&render_merge_tags(template, contact), settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact() -> Contact {
        let mut c = Contact::new(
            Some("ana@example.com".to_string()),
            Some("+5511999990000".to_string()),
        );
        c.first_name = Some("Ana".to_string());
        c.last_name = Some("Silva".to_string());
        c.company = Some("Acme".to_string());
        c
    }

    #[test]
    fn test_normalize_already_e164() {
        assert_eq!(
            normalize_e164("+5511999990000", "55").unwrap(),
            "+5511999990000"
        );
    }

    #[test]
    fn test_normalize_strips_formatting() {
        assert_eq!(
            normalize_e164("+55 (11) 99999-0000", "55").unwrap(),
            "+5511999990000"
        );
    }

    #[test]
    fn test_normalize_bare_local_number_gets_country_code() {
        assert_eq!(
            normalize_e164("11 99999-0000", "55").unwrap(),
            "+5511999990000"
        );
    }

    #[test]
    fn test_normalize_country_code_without_plus() {
        assert_eq!(
            normalize_e164("5511999990000", "55").unwrap(),
            "+5511999990000"
        );
    }

    #[test]
    fn test_normalize_international_prefix() {
        assert_eq!(
            normalize_e164("005511999990000", "55").unwrap(),
            "+5511999990000"
        );
    }

    #[test]
    fn test_normalize_rejects_short_numbers() {
        assert!(normalize_e164("123", "55").is_err());
        assert!(normalize_e164("", "55").is_err());
        assert!(normalize_e164("+1", "55").is_err());
    }

    #[test]
    fn test_normalize_rejects_too_long() {
        assert!(normalize_e164("+1234567890123456", "55").is_err());
    }

    #[test]
    fn test_merge_tags_substituted() {
        let body = render_merge_tags(
            "Oi {{first_name}} {{last_name}} da {{company}}!",
            &contact(),
        );
        assert_eq!(body, "Oi Ana Silva da Acme!");
    }

    #[test]
    fn test_missing_fields_substitute_empty() {
        let bare = Contact::new(None, Some("+5511999990000".to_string()));
        let body = render_merge_tags("Oi {{first_name}}!", &bare);
        assert_eq!(body, "Oi !");
    }

    #[test]
    fn test_unknown_tags_left_untouched() {
        let body = render_merge_tags("Cupom {{coupon}}", &contact());
        assert_eq!(body, "Cupom {{coupon}}");
    }

    #[test]
    fn test_optout_appended_by_default() {
        let settings = CampaignSettings::default();
        let body = apply_optout_text("Promo hoje", &settings);
        assert_eq!(body, "Promo hoje\nResponda SAIR para cancelar");
    }

    #[test]
    fn test_optout_substituted_at_placeholder() {
        let settings = CampaignSettings::default();
        let body = apply_optout_text("Promo. {{optout}}. Obrigado", &settings);
        assert_eq!(body, "Promo. Responda SAIR para cancelar. Obrigado");
    }

    #[test]
    fn test_optout_suppressed_by_settings() {
        let settings = CampaignSettings {
            skip_optout_text: true,
            ..Default::default()
        };
        assert_eq!(apply_optout_text("Promo hoje", &settings), "Promo hoje");
        assert_eq!(apply_optout_text("Promo {{optout}}", &settings), "Promo");
    }

    #[test]
    fn test_custom_optout_text() {
        let settings = CampaignSettings {
            optout_text: Some("Envie PARAR p/ sair".to_string()),
            ..Default::default()
        };
        let body = apply_optout_text("Promo", &settings);
        assert_eq!(body, "Promo\nEnvie PARAR p/ sair");
    }
}
