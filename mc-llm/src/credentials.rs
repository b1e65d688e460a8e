//! API key lookup from the process environment and an optional `.env` file.

use crate::error::{LlmError, Result};

pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Use `explicit` when given, otherwise look the key up in the environment.
pub fn resolve_api_key(explicit: Option<String>) -> Result<String> {
    if let Some(key) = non_blank(explicit) {
        return Ok(key);
    }
    load_dotenv();
    lookup_api_key_with(|name| std::env::var(name).ok()).ok_or_else(|| {
        LlmError::Configuration(format!(
            "no API key given and {API_KEY_ENV} is not set; check the API key"
        ))
    })
}

/// Read the key through `lookup`. Blank values count as missing.
pub fn lookup_api_key_with<F>(lookup: F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    non_blank(lookup(API_KEY_ENV))
}

fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!(path = %path.display(), "loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!(error = %e, "failed to load .env; continuing with process env"),
    }
}

fn non_blank(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_key_wins_without_touching_env() {
        assert_eq!(
            resolve_api_key(Some("sk-explicit".to_string())).expect("key"),
            "sk-explicit"
        );
    }

    #[test]
    fn lookup_reads_the_openai_variable() {
        let key = lookup_api_key_with(|name| {
            assert_eq!(name, "OPENAI_API_KEY");
            Some(" sk-env ".to_string())
        });
        assert_eq!(key.as_deref(), Some("sk-env"));
    }

    #[test]
    fn blank_or_missing_values_are_absent() {
        assert_eq!(lookup_api_key_with(|_| None), None);
        assert_eq!(lookup_api_key_with(|_| Some("   ".to_string())), None);
    }
}
