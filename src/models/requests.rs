//! Request DTOs for the cache API
//!
//! Query parameters accepted by the invalidation and event feed endpoints.

use serde::Deserialize;

/// Query string for `DELETE /cache`.
///
/// A missing or empty `pattern` clears the whole cache.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvalidateParams {
    #[serde(default)]
    pub pattern: Option<String>,
}

impl InvalidateParams {
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        match &self.pattern {
            Some(pattern) if pattern.len() > 256 => {
                Some("Pattern exceeds maximum length of 256 characters".to_string())
            }
            _ => None,
        }
    }

    pub fn pattern(&self) -> Option<&str> {
        self.pattern.as_deref().filter(|p| !p.is_empty())
    }
}

/// Query string for `GET /maintenance/events`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventsParams {
    #[serde(default)]
    pub limit: Option<usize>,
}

impl EventsParams {
    pub const DEFAULT_LIMIT: usize = 10;
    pub const MAX_LIMIT: usize = 500;

    pub fn validate(&self) -> Option<String> {
        match self.limit {
            Some(0) => Some("Limit must be at least 1".to_string()),
            Some(n) if n > Self::MAX_LIMIT => {
                Some(format!("Limit exceeds maximum of {}", Self::MAX_LIMIT))
            }
            _ => None,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalidate_params_empty_pattern_clears_all() {
        let params: InvalidateParams = serde_json::from_str(r#"{"pattern": ""}"#).unwrap();
        assert_eq!(params.pattern(), None);
        assert!(params.validate().is_none());
    }

    #[test]
    fn test_invalidate_params_long_pattern() {
        let params = InvalidateParams {
            pattern: Some("p".repeat(300)),
        };
        assert!(params.validate().is_some());
    }

    #[test]
    fn test_events_params_default() {
        let params: EventsParams = serde_json::from_str("{}").unwrap();
        assert_eq!(params.limit(), EventsParams::DEFAULT_LIMIT);
        assert!(params.validate().is_none());
    }

    #[test]
    fn test_events_params_bounds() {
        assert!(EventsParams { limit: Some(0) }.validate().is_some());
        assert!(EventsParams { limit: Some(501) }.validate().is_some());
        assert!(EventsParams { limit: Some(5) }.validate().is_none());
    }
}
