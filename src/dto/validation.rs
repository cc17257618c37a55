//! Validation helpers for DTOs.

use validator::ValidationError;

/// Longest display name accepted for a player.
pub const MAX_PLAYER_NAME_CHARS: usize = 24;

/// Validates that a room code is exactly 6 ASCII digits.
///
/// # Examples
///
/// ```ignore
/// validate_room_code("042917") // Ok
/// validate_room_code("42917")  // Err - too short
/// validate_room_code("04291a") // Err - not a digit
/// ```
pub fn validate_room_code(code: &str) -> Result<(), ValidationError> {
    if code.len() != 6 {
        let mut err = ValidationError::new("room_code_length");
        err.message = Some(format!("Room code must be exactly 6 digits (got {})", code.len()).into());
        return Err(err);
    }

    if !code.chars().all(|c| c.is_ascii_digit()) {
        let mut err = ValidationError::new("room_code_format");
        err.message = Some("Room code must contain only digits".into());
        return Err(err);
    }

    Ok(())
}

/// Validates a display name: 1 to [`MAX_PLAYER_NAME_CHARS`] characters once trimmed, no control
/// characters.
pub fn validate_player_name(name: &str) -> Result<(), ValidationError> {
    let trimmed = name.trim();
    let count = trimmed.chars().count();
    if count == 0 || count > MAX_PLAYER_NAME_CHARS {
        let mut err = ValidationError::new("player_name_length");
        err.message = Some(
            format!("Player name must be 1 to {MAX_PLAYER_NAME_CHARS} characters (got {count})")
                .into(),
        );
        return Err(err);
    }

    if trimmed.chars().any(char::is_control) {
        let mut err = ValidationError::new("player_name_format");
        err.message = Some("Player name must not contain control characters".into());
        return Err(err);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_room_code_valid() {
        assert!(validate_room_code("000000").is_ok());
        assert!(validate_room_code("981234").is_ok());
    }

    #[test]
    fn test_validate_room_code_invalid() {
        assert!(validate_room_code("12345").is_err()); // too short
        assert!(validate_room_code("1234567").is_err()); // too long
        assert!(validate_room_code("12a456").is_err()); // letter
        assert!(validate_room_code("１２３４５６").is_err()); // full-width digits
        assert!(validate_room_code("").is_err());
    }

    #[test]
    fn test_validate_player_name() {
        assert!(validate_player_name("Ada").is_ok());
        assert!(validate_player_name("  Ada  ").is_ok());
        assert!(validate_player_name("   ").is_err());
        assert!(validate_player_name(&"x".repeat(25)).is_err());
        assert!(validate_player_name("a\u{7}b").is_err());
    }
}
