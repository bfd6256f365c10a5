use crate::error::{AppError, Result};

const MAX_INSTANCE_ID_LEN: usize = 64;

/// Instance ids double as keys in the console store and event filters, so
/// they must be short, non-empty and free of separators.
pub fn validate_instance_id(instance_id: &str) -> Result<()> {
    let is_safe = !instance_id.is_empty()
        && instance_id.len() <= MAX_INSTANCE_ID_LEN
        && instance_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'));

    if !is_safe {
        return Err(AppError::invalid_instance(instance_id));
    }
    Ok(())
}

/// Normalize console input. Returns `None` for blank input.
pub fn normalize_command(command: &str) -> Option<&str> {
    let trimmed = command.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_uuid_and_short_ids() {
        assert!(validate_instance_id("A").is_ok());
        assert!(validate_instance_id("7d3f9c2e-1b4a-4c8e-9f0a-2b6d8e1c3a5f").is_ok());
        assert!(validate_instance_id("survival_01").is_ok());
    }

    #[test]
    fn rejects_empty_and_path_like_ids() {
        assert!(validate_instance_id("").is_err());
        assert!(validate_instance_id("../instances").is_err());
        assert!(validate_instance_id("a b").is_err());
        assert!(validate_instance_id(&"x".repeat(65)).is_err());
    }

    #[test]
    fn normalize_trims_and_drops_blank_input() {
        assert_eq!(normalize_command("  say hi \n"), Some("say hi"));
        assert_eq!(normalize_command(" \t "), None);
    }
}
