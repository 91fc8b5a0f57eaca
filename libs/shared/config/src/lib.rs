use std::env;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    pub allowed_origins: String,
    pub port: u16,
    pub appointment_write_retries: u32,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            allowed_origins: env::var("ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "*".to_string()),
            port: parse_or_default("PORT", 3000),
            appointment_write_retries: parse_or_default("APPOINTMENT_WRITE_RETRIES", 3),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
    }

    /// Origins for the CORS layer; `None` means any origin is accepted.
    pub fn cors_origins(&self) -> Option<Vec<String>> {
        let origins: Vec<String> = self.allowed_origins
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        if origins.is_empty() || origins.iter().any(|origin| origin == "*") {
            None
        } else {
            Some(origins)
        }
    }
}

fn parse_or_default<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using default {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_origins(origins: &str) -> AppConfig {
        AppConfig {
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "anon".to_string(),
            supabase_jwt_secret: "secret".to_string(),
            allowed_origins: origins.to_string(),
            port: 3000,
            appointment_write_retries: 3,
        }
    }

    #[test]
    fn wildcard_origin_allows_any() {
        assert_eq!(config_with_origins("*").cors_origins(), None);
        assert_eq!(config_with_origins("").cors_origins(), None);
    }

    #[test]
    fn explicit_origins_are_split_and_trimmed() {
        let origins = config_with_origins("http://localhost:3000, https://clinic.example.com")
            .cors_origins()
            .unwrap();
        assert_eq!(origins, vec![
            "http://localhost:3000".to_string(),
            "https://clinic.example.com".to_string(),
        ]);
    }

    #[test]
    fn configured_requires_supabase_settings() {
        let mut config = config_with_origins("*");
        assert!(config.is_configured());
        config.supabase_jwt_secret.clear();
        assert!(!config.is_configured());
    }
}
