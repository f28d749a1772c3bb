use std::env;

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub service_version: String,
    pub environment: String,
    pub json_logs: bool,
    /// Filter used when `RUST_LOG` is not set.
    pub default_filter: String,
}

impl TelemetryConfig {
    pub fn from_env(default_service_name: &str, default_service_version: &str) -> Self {
        Self::from_lookup(default_service_name, default_service_version, |key| {
            env::var(key).ok()
        })
    }

    pub fn from_lookup<F>(
        default_service_name: &str,
        default_service_version: &str,
        lookup: F,
    ) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let service_name =
            lookup("OTEL_SERVICE_NAME").unwrap_or_else(|| default_service_name.to_string());
        let service_version = lookup("OTEL_SERVICE_VERSION")
            .unwrap_or_else(|| default_service_version.to_string());
        let environment = lookup("DEPLOYMENT_ENV")
            .or_else(|| lookup("NODE_ENV"))
            .unwrap_or_else(|| "development".into());
        let json_logs = lookup("LOG_FORMAT")
            .map(|v| !matches!(v.to_lowercase().as_str(), "text" | "pretty" | "plain"))
            .unwrap_or(true);
        let default_filter = lookup("LOG_LEVEL")
            .or_else(|| lookup("WHATSAPP_LOG_LEVEL"))
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "info".into());

        Self {
            service_name,
            service_version,
            environment,
            json_logs,
            default_filter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> TelemetryConfig {
        let map: HashMap<&str, &str> = pairs.iter().copied().collect();
        TelemetryConfig::from_lookup("svc", "1.0.0", |key| {
            map.get(key).map(|v| v.to_string())
        })
    }

    #[test]
    fn defaults_to_json_info_logs() {
        let cfg = config(&[]);
        assert!(cfg.json_logs);
        assert_eq!(cfg.default_filter, "info");
        assert_eq!(cfg.service_name, "svc");
        assert_eq!(cfg.environment, "development");
    }

    #[test]
    fn text_format_and_legacy_level_are_honoured() {
        let cfg = config(&[
            ("LOG_FORMAT", "Pretty"),
            ("WHATSAPP_LOG_LEVEL", "debug"),
            ("NODE_ENV", "production"),
        ]);
        assert!(!cfg.json_logs);
        assert_eq!(cfg.default_filter, "debug");
        assert_eq!(cfg.environment, "production");
    }
}
