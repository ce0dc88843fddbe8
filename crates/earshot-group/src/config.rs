//! Group settings and name rules.

use crate::GroupError;

/// Shortest allowed group name, in characters.
pub const MIN_NAME_LEN: usize = 3;

/// Limits applied to groups.
#[derive(Debug, Clone)]
pub struct GroupConfig {
    /// Longest allowed group name, in characters.
    pub max_name_len: usize,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self { max_name_len: 32 }
    }
}

impl GroupConfig {
    /// Checks `name` against the length bound and `[A-Za-z0-9 -]+`.
    pub fn validate_name(&self, name: &str) -> Result<(), GroupError> {
        let len = name.chars().count();
        if len < MIN_NAME_LEN || len > self.max_name_len {
            return Err(GroupError::InvalidName(format!(
                "must be {MIN_NAME_LEN} to {} characters",
                self.max_name_len
            )));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == ' ' || c == '-')
        {
            return Err(GroupError::InvalidName(
                "only letters, digits, spaces and hyphens are allowed".into(),
            ));
        }
        Ok(())
    }
}
