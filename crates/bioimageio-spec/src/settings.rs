use crate::summary::Severity;

const PERFORM_IO_CHECKS_VAR: &str = "BIOIMAGEIO_PERFORM_IO_CHECKS";
const LOG_WARNINGS_VAR: &str = "BIOIMAGEIO_LOG_WARNINGS";
const WARNING_LEVEL_VAR: &str = "BIOIMAGEIO_WARNING_LEVEL";

/// Process-wide defaults read from the environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    pub perform_io_checks: bool,
    pub log_warnings: bool,
    pub warning_level: Severity,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            perform_io_checks: true,
            log_warnings: true,
            warning_level: Severity::Error,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary variable lookup; unknown values keep the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            perform_io_checks: lookup(PERFORM_IO_CHECKS_VAR)
                .and_then(|raw| parse_flag(&raw))
                .unwrap_or(defaults.perform_io_checks),
            log_warnings: lookup(LOG_WARNINGS_VAR)
                .and_then(|raw| parse_flag(&raw))
                .unwrap_or(defaults.log_warnings),
            warning_level: lookup(WARNING_LEVEL_VAR)
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(defaults.warning_level),
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim() {
        "1" | "true" | "TRUE" | "True" | "yes" => Some(true),
        "0" | "false" | "FALSE" | "False" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn reads_flags_and_level() {
        let vars: HashMap<&str, &str> = [
            (PERFORM_IO_CHECKS_VAR, "0"),
            (LOG_WARNINGS_VAR, "false"),
            (WARNING_LEVEL_VAR, "alert"),
        ]
        .into_iter()
        .collect();
        let settings = Settings::from_lookup(|key| vars.get(key).map(|v| v.to_string()));
        assert!(!settings.perform_io_checks);
        assert!(!settings.log_warnings);
        assert_eq!(settings.warning_level, Severity::Alert);
    }

    #[test]
    fn garbage_values_keep_defaults() {
        let settings = Settings::from_lookup(|key| match key {
            PERFORM_IO_CHECKS_VAR => Some("maybe".into()),
            WARNING_LEVEL_VAR => Some("loud".into()),
            _ => None,
        });
        assert_eq!(settings, Settings::default());
    }
}
