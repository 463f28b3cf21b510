use crate::error::{Result, ScsError};

/// Validate a value destined for a comma-separated record field.
///
/// The on-disk format has no escape character, so commas and newlines are
/// rejected outright.
pub fn validate_field(name: &str, value: &str) -> Result<()> {
    if value.contains(',') {
        return Err(ScsError::validation(format!(
            "field '{}' must not contain a comma: '{}'",
            name, value
        )));
    }
    if value.contains('\n') || value.contains('\r') {
        return Err(ScsError::validation(format!(
            "field '{}' must not contain a newline",
            name
        )));
    }
    Ok(())
}

/// Clean a free-text description: commas are stripped (never escaped),
/// newlines collapse to spaces.
pub fn clean_description(value: &str) -> String {
    value
        .replace(',', "")
        .replace(['\n', '\r'], " ")
        .trim()
        .to_string()
}

/// A name usable as a record key: non-empty, no whitespace, no comma.
pub fn validate_name(kind: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(ScsError::validation(format!("{} name must not be empty", kind)));
    }
    if value.chars().any(|c| c.is_whitespace() || c == ',') {
        return Err(ScsError::validation(format!(
            "{} name must not contain whitespace or commas: '{}'",
            kind, value
        )));
    }
    Ok(())
}

/// 3-4 octal digits, as accepted for file modes.
pub fn validate_octal_mode(value: &str) -> Result<()> {
    let ok = (3..=4).contains(&value.len()) && value.chars().all(|c| ('0'..='7').contains(&c));
    if ok {
        Ok(())
    } else {
        Err(ScsError::validation(format!(
            "'{}' is not a valid octal mode (3-4 octal digits)",
            value
        )))
    }
}

/// Parse a dotted-quad IPv4 address.
pub fn parse_ipv4(value: &str) -> Result<std::net::Ipv4Addr> {
    value
        .parse()
        .map_err(|_| ScsError::validation(format!("'{}' is not a dotted-quad address", value)))
}

/// A yes/no flag as stored on disk.
pub fn parse_yn(name: &str, value: &str) -> Result<bool> {
    match value {
        "y" => Ok(true),
        "n" => Ok(false),
        _ => Err(ScsError::validation(format!(
            "field '{}' must be y or n, got '{}'",
            name, value
        ))),
    }
}

pub fn yn(value: bool) -> &'static str {
    if value { "y" } else { "n" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_field_rejects_comma() {
        assert!(validate_field("alias", "a,b").is_err());
        assert!(validate_field("alias", "ab").is_ok());
    }

    #[test]
    fn test_validate_field_rejects_newline() {
        assert!(validate_field("alias", "a\nb").is_err());
        assert!(validate_field("alias", "a\rb").is_err());
    }

    #[test]
    fn test_clean_description_strips_commas() {
        assert_eq!(clean_description("web, api, and db"), "web api and db");
        assert_eq!(clean_description("line\nbreak"), "line break");
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("system", "web01").is_ok());
        assert!(validate_name("system", "").is_err());
        assert!(validate_name("system", "web 01").is_err());
        assert!(validate_name("system", "web,01").is_err());
    }

    #[test]
    fn test_validate_octal_mode() {
        assert!(validate_octal_mode("644").is_ok());
        assert!(validate_octal_mode("0755").is_ok());
        assert!(validate_octal_mode("77").is_err());
        assert!(validate_octal_mode("0868").is_err());
        assert!(validate_octal_mode("07555").is_err());
    }

    #[test]
    fn test_parse_yn() {
        assert!(parse_yn("locked", "y").unwrap());
        assert!(!parse_yn("locked", "n").unwrap());
        assert!(parse_yn("locked", "yes").is_err());
    }

    #[test]
    fn test_parse_ipv4() {
        assert!(parse_ipv4("10.0.0.1").is_ok());
        assert!(parse_ipv4("10.0.0").is_err());
        assert!(parse_ipv4("dhcp").is_err());
    }
}
