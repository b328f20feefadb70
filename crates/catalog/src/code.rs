use stockroom_core::{DomainError, DomainResult};

pub const MAX_CODE_LEN: usize = 10;

/// Normalize a store or category code: trimmed, uppercase, `[A-Z0-9]{1,10}`.
pub fn normalize_code(raw: &str, field: &str) -> DomainResult<String> {
    let code = raw.trim().to_ascii_uppercase();
    if code.is_empty() {
        return Err(DomainError::validation(format!("{field} cannot be empty")));
    }
    if code.len() > MAX_CODE_LEN {
        return Err(DomainError::validation(format!(
            "{field} must be at most {MAX_CODE_LEN} characters"
        )));
    }
    if !code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()) {
        return Err(DomainError::validation(format!(
            "{field} may only contain letters and digits"
        )));
    }
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_uppercased_and_trimmed() {
        assert_eq!(normalize_code(" str01 ", "code").unwrap(), "STR01");
    }

    #[test]
    fn invalid_codes_are_rejected() {
        assert!(normalize_code("", "code").is_err());
        assert!(normalize_code("AB-1", "code").is_err());
        assert!(normalize_code("ABCDEFGHIJK", "code").is_err());
    }
}
