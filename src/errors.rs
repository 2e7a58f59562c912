//! Error handling integration for the munin bridge
//!
//! This module provides helper functions for creating domain-specific errors
//! using the TYL framework error system. It follows the established TYL
//! pattern of providing semantic error constructors rather than custom error types.

use super::*;

/// Create a metric validation error
///
/// Used when metric names, labels or values fail validation.
///
/// # Example
/// ```rust
/// use tyl_munin_exporter::metric_error;
///
/// let error = metric_error("metric_name", "Names cannot contain spaces");
/// ```
pub fn metric_error(field: impl Into<String>, message: impl Into<String>) -> TylError {
    TylError::validation(field.into(), message.into())
}

/// Create a bridge configuration error
///
/// # Example
/// ```rust
/// use tyl_munin_exporter::bridge_config_error;
///
/// let error = bridge_config_error("scrape_interval_secs", "Interval must be positive");
/// ```
pub fn bridge_config_error(config_key: impl Into<String>, message: impl Into<String>) -> TylError {
    TylError::configuration(format!(
        "Bridge config error for {}: {}",
        config_key.into(),
        message.into()
    ))
}

/// Create a connection error
///
/// Used when the munin-node cannot be reached or its banner cannot be read.
///
/// # Example
/// ```rust
/// use tyl_munin_exporter::connection_error;
///
/// let error = connection_error("localhost:4949", "Connection refused");
/// ```
pub fn connection_error(endpoint: impl Into<String>, message: impl Into<String>) -> TylError {
    TylError::network(format!(
        "Munin connection error to {}: {}",
        endpoint.into(),
        message.into()
    ))
}

/// Create a protocol error
///
/// Used when a munin-node response violates the line protocol framing
/// (unexpected banner, error marker, truncated response).
pub fn protocol_error(command: impl Into<String>, message: impl Into<String>) -> TylError {
    TylError::internal(format!(
        "Munin protocol error for '{}': {}",
        command.into(),
        message.into()
    ))
}

/// Create a descriptor registration error
///
/// Raised by sinks when a descriptor collides with an existing canonical name
/// or cannot be accepted. Fatal during catalog build.
///
/// # Example
/// ```rust
/// use tyl_munin_exporter::registration_error;
///
/// let error = registration_error("cpu_user", "Metric already registered");
/// ```
pub fn registration_error(metric_name: impl Into<String>, message: impl Into<String>) -> TylError {
    TylError::internal(format!(
        "Metric registration error for {}: {}",
        metric_name.into(),
        message.into()
    ))
}

/// Helper trait for adding bridge context to existing errors
///
/// Used by the catalog builder and the scrape loop to tag errors bubbling up
/// from the protocol client with the plugin or command that caused them.
pub trait BridgeErrorExt {
    /// Add plugin context to an existing error by wrapping it
    fn with_plugin(self, plugin: impl Into<String>) -> TylError;

    /// Add command context to an existing error by wrapping it
    fn with_command(self, command: impl Into<String>) -> TylError;
}

impl BridgeErrorExt for TylError {
    fn with_plugin(self, plugin: impl Into<String>) -> TylError {
        TylError::internal(format!("Plugin [{}]: {}", plugin.into(), self))
    }

    fn with_command(self, command: impl Into<String>) -> TylError {
        TylError::internal(format!("Command [{}]: {}", command.into(), self))
    }
}

/// Convert an I/O error raised while talking to `endpoint` into a bridge error
///
/// Note: This is a helper function rather than a From impl to avoid orphan rule issues
pub fn from_io_error(endpoint: impl Into<String>, error: std::io::Error) -> TylError {
    match error.kind() {
        std::io::ErrorKind::ConnectionRefused
        | std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::BrokenPipe => connection_error(endpoint, error.to_string()),
        _ => TylError::internal(format!(
            "Munin IO error on {}: {}",
            endpoint.into(),
            error
        )),
    }
}

/// Convert a JSON decoding error raised while loading configuration
pub fn from_serde_json_error(error: serde_json::Error) -> TylError {
    bridge_config_error("json", error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_error() {
        let error = metric_error("metric_name", "Invalid characters");
        assert!(error.to_string().contains("Invalid characters"));
    }

    #[test]
    fn test_bridge_config_error() {
        let error = bridge_config_error("scrape_interval_secs", "must be positive");
        assert!(error.to_string().contains("scrape_interval_secs"));
        assert!(error.to_string().contains("must be positive"));
    }

    #[test]
    fn test_connection_error() {
        let error = connection_error("localhost:4949", "Connection refused");
        assert!(error.to_string().contains("localhost:4949"));
        assert!(error.to_string().contains("Connection refused"));
    }

    #[test]
    fn test_protocol_error() {
        let error = protocol_error("config cpu", "# Unknown service");
        assert!(error.to_string().contains("config cpu"));
        assert!(error.to_string().contains("Unknown service"));
    }

    #[test]
    fn test_registration_error() {
        let error = registration_error("cpu_user", "already registered");
        assert!(error.to_string().contains("cpu_user"));
    }

    #[test]
    fn test_error_extension_trait() {
        let extended = protocol_error("fetch load", "truncated response")
            .with_command("fetch load")
            .with_plugin("load");

        let error_string = extended.to_string();
        assert!(error_string.contains("Plugin [load]"));
        assert!(error_string.contains("truncated response"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error =
            std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "Connection refused");
        let error = from_io_error("localhost:4949", io_error);
        assert!(error.to_string().contains("localhost:4949"));
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let json_error = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let error = from_serde_json_error(json_error);
        assert!(error.to_string().contains("json"));
    }
}
