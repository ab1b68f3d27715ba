//! Descriptive `User-Agent` header.
//!
//! ```text
//! speech-runtime/0.1.0 (linux x86_64; model; config-id; device; release)
//! ```

use crate::config::{ClientConfig, ServiceConfig};

/// Ingredients of the `User-Agent` string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub sdk_version: String,
    pub os: String,
    pub device_model: String,
    pub configuration_id: String,
    pub device_name: String,
    pub build_context: String,
}

impl ClientInfo {
    pub fn from_config(client: &ClientConfig, service: &ServiceConfig) -> Self {
        Self {
            sdk_version: client.sdk_version.clone(),
            os: format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
            device_model: client.device_model.clone(),
            configuration_id: service.configuration_id.clone(),
            device_name: client.device_name.clone(),
            build_context: client.build_context.clone(),
        }
    }

    pub fn user_agent(&self) -> String {
        format!(
            "speech-runtime/{} ({}; {}; {}; {}; {})",
            sanitize(&self.sdk_version),
            sanitize(&self.os),
            sanitize(&self.device_model),
            sanitize(&self.configuration_id),
            sanitize(&self.device_name),
            sanitize(&self.build_context),
        )
    }
}

/// Header values must be visible ASCII; the separators are reserved.
fn sanitize(value: &str) -> String {
    let cleaned: String = value
        .trim()
        .chars()
        .map(|c| match c {
            ';' | '(' | ')' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}
