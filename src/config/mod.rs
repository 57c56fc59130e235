use std::env;

/// Runtime configuration: CLI values plus environment overrides.
#[derive(Clone, Debug)]
pub struct Config {
    /// Bind address; `RELAY_HOST` overrides the all-interfaces default.
    pub host: String,
    pub port: u16,
    /// Advisory only; acknowledged in logs, supervision is external.
    pub daemon: bool,
    /// Whether `viewer_audio_opus` is also forwarded between subscribers
    /// (the publisher always receives it). `VIEWER_AUDIO_MESH=0` disables.
    pub viewer_audio_mesh: bool,
}

impl Config {
    pub fn load(port: u16, daemon: bool) -> Self {
        dotenvy::dotenv().ok();

        Config {
            host: env::var("RELAY_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port,
            daemon,
            viewer_audio_mesh: env::var("VIEWER_AUDIO_MESH")
                .map(|v| flag_enabled(&v))
                .unwrap_or(true),
        }
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn flag_enabled(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "0" | "false" | "off" | "no"
    )
}
