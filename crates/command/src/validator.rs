//! Per-action structural validation of parsed parameters.

use aman_core::types::{ParamMap, ValidationResult};

use crate::parser::is_phone_number;

const MAX_SMS_LEN: usize = 160;
const MAX_MODULE_NAME_LEN: usize = 50;
const MAX_LEARN_COMMAND_LEN: usize = 30;
const MAX_LEARN_ACTION_LEN: usize = 200;

/// Extensions accepted for self-update packages.
const PACKAGE_EXTENSIONS: &[&str] = &[".pkg", ".so", ".bin", ".zip"];

/// Validate parameters for a known action.
///
/// Pure and side-effect-free. Unknown actions validate as trivially true;
/// the module registry decides whether anything handles them.
pub fn validate(action: &str, parameters: &ParamMap) -> ValidationResult {
    match action {
        "sms" => validate_sms(parameters),
        "photo" => validate_photo(parameters),
        "add_number" | "remove_number" => validate_number(parameters),
        "learn" => validate_learn(parameters),
        "load_module" => validate_load_module(parameters),
        "update" => validate_update(parameters),
        "status" | "pause" | "unpause" | "resume" | "list_numbers" | "list_modules" | "help"
        | "shutdown" => ValidationResult::ok(),
        _ => ValidationResult::ok(),
    }
}

fn validate_sms(parameters: &ParamMap) -> ValidationResult {
    let Some(to) = parameters.get("to") else {
        return ValidationResult::invalid("Usage: sms to=<number> message=<text>");
    };
    if !is_phone_number(to) {
        return ValidationResult::invalid(format!("Invalid phone number: {}", to));
    }
    let message = parameters.get("message").or_else(|| parameters.get("text"));
    match message {
        None => ValidationResult::invalid("Usage: sms to=<number> message=<text>"),
        Some(m) if m.chars().count() > MAX_SMS_LEN => ValidationResult::invalid(format!(
            "Message too long ({} chars, max {})",
            m.chars().count(),
            MAX_SMS_LEN
        )),
        Some(_) => ValidationResult::ok(),
    }
}

fn validate_photo(parameters: &ParamMap) -> ValidationResult {
    if let Some(camera) = parameters.get("camera") {
        if !matches!(camera.to_lowercase().as_str(), "front" | "back") {
            return ValidationResult::invalid("camera must be 'front' or 'back'");
        }
    }
    if let Some(quality) = parameters.get("quality") {
        match quality.parse::<u8>() {
            Ok(q) if (1..=100).contains(&q) => {}
            _ => return ValidationResult::invalid("quality must be 1-100"),
        }
    }
    if let Some(send_to) = parameters.get("send_to") {
        if !is_phone_number(send_to) {
            return ValidationResult::invalid(format!("Invalid phone number: {}", send_to));
        }
    }
    ValidationResult::ok()
}

fn validate_number(parameters: &ParamMap) -> ValidationResult {
    match parameters.get("number") {
        Some(n) if is_phone_number(n) => ValidationResult::ok(),
        Some(n) => ValidationResult::invalid(format!("Invalid phone number: {}", n)),
        None => ValidationResult::invalid("Usage: add_number number=<number>"),
    }
}

fn validate_learn(parameters: &ParamMap) -> ValidationResult {
    let Some(command) = parameters.get("command") else {
        return ValidationResult::invalid("Usage: learn command=<name> action=<text>");
    };
    if command.is_empty() || command.chars().count() > MAX_LEARN_COMMAND_LEN {
        return ValidationResult::invalid(format!(
            "Command name must be 1-{} chars",
            MAX_LEARN_COMMAND_LEN
        ));
    }
    match parameters.get("action") {
        None => ValidationResult::invalid("Usage: learn command=<name> action=<text>"),
        Some(a) if a.is_empty() || a.chars().count() > MAX_LEARN_ACTION_LEN => {
            ValidationResult::invalid(format!("Action must be 1-{} chars", MAX_LEARN_ACTION_LEN))
        }
        Some(_) => ValidationResult::ok(),
    }
}

fn validate_load_module(parameters: &ParamMap) -> ValidationResult {
    let Some(name) = parameters.get("name") else {
        return ValidationResult::invalid("Usage: load_module name=<id> url=<url>");
    };
    if name.is_empty() || name.chars().count() > MAX_MODULE_NAME_LEN {
        return ValidationResult::invalid(format!(
            "Module name must be 1-{} chars",
            MAX_MODULE_NAME_LEN
        ));
    }
    match parameters.get("url") {
        None => ValidationResult::invalid("Usage: load_module name=<id> url=<url>"),
        Some(u) => validate_http_url(u),
    }
}

fn validate_update(parameters: &ParamMap) -> ValidationResult {
    let Some(u) = parameters.get("url") else {
        return ValidationResult::invalid("Usage: update url=<package url>");
    };
    let result = validate_http_url(u);
    if !result.valid {
        return result;
    }
    let path = url::Url::parse(u)
        .map(|parsed| parsed.path().to_lowercase())
        .unwrap_or_default();
    if PACKAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        ValidationResult::ok()
    } else {
        ValidationResult::invalid(format!(
            "URL must end in a package extension ({})",
            PACKAGE_EXTENSIONS.join(", ")
        ))
    }
}

fn validate_http_url(value: &str) -> ValidationResult {
    match url::Url::parse(value) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => ValidationResult::ok(),
        Ok(parsed) => ValidationResult::invalid(format!("Unsupported URL scheme: {}", parsed.scheme())),
        Err(e) => ValidationResult::invalid(format!("Invalid URL: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn params(raw: &str) -> ParamMap {
        parse(raw).unwrap().parameters
    }

    #[test]
    fn sms_requires_phone_and_message() {
        assert!(validate("sms", &params("sms to=15551234567 message=Hello")).valid);
        assert!(!validate("sms", &params("sms message=Hello")).valid);
        assert!(!validate("sms", &params("sms to=abc message=Hello")).valid);
        assert!(!validate("sms", &params("sms to=15551234567")).valid);
    }

    #[test]
    fn sms_message_length_capped() {
        let long = "x".repeat(161);
        assert!(!validate("sms", &params(&format!("sms to=15551234567 message={}", long))).valid);
        let ok = "x".repeat(160);
        assert!(validate("sms", &params(&format!("sms to=15551234567 message={}", ok))).valid);
    }

    #[test]
    fn sms_accepts_text_alias() {
        assert!(validate("sms", &params("sms to=15551234567 text=Hi")).valid);
    }

    #[test]
    fn photo_parameter_ranges() {
        assert!(validate("photo", &params("photo")).valid);
        assert!(validate("photo", &params("photo camera=front quality=80")).valid);
        assert!(!validate("photo", &params("photo camera=left")).valid);
        assert!(!validate("photo", &params("photo quality=0")).valid);
        assert!(!validate("photo", &params("photo quality=101")).valid);
    }

    #[test]
    fn load_module_rules() {
        assert!(validate("load_module", &params("load_module name=weather url=http://x/w.pkg")).valid);
        assert!(!validate("load_module", &params("load_module url=http://x/w.pkg")).valid);
        assert!(!validate("load_module", &params("load_module name=weather url=notaurl")).valid);
        let long = "m".repeat(51);
        assert!(
            !validate(
                "load_module",
                &params(&format!("load_module name={} url=http://x/w.pkg", long))
            )
            .valid
        );
    }

    #[test]
    fn update_requires_package_extension() {
        assert!(validate("update", &params("update url=http://x/agent-2.pkg")).valid);
        assert!(validate("update", &params("update url=https://x/agent.so")).valid);
        assert!(!validate("update", &params("update url=http://x/readme.html")).valid);
        assert!(!validate("update", &params("update url=ftp://x/agent.pkg")).valid);
    }

    #[test]
    fn learn_length_limits() {
        assert!(validate("learn", &params("learn command=ping action=status")).valid);
        let long_cmd = "c".repeat(31);
        assert!(!validate("learn", &params(&format!("learn command={} action=status", long_cmd))).valid);
        let long_action = "a".repeat(201);
        assert!(!validate("learn", &params(&format!("learn command=ping action={}", long_action))).valid);
    }

    #[test]
    fn unknown_actions_are_trivially_valid() {
        assert!(validate("weather", &params("weather city=berlin")).valid);
    }

    #[test]
    fn validation_is_idempotent() {
        let p = params("sms to=15551234567 message=Hello");
        let first = validate("sms", &p);
        let second = validate("sms", &p);
        assert_eq!(first, second);
    }
}
