//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::game::MovementTuning;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origins for CORS, comma-separated, or "*"
    pub client_origin: String,

    /// Request the rigid-body solver; off forces kinematic movement
    pub physics_enabled: bool,
    /// Include per-body solver descriptors in snapshots
    pub physics_debug: bool,
    /// Seed for spawn jitter and colors; random when unset
    pub sim_seed: Option<u64>,
    pub movement: MovementTuning,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // PORT wins over SERVER_ADDR so PaaS-style deployments work unchanged
        let server_addr = if let Some(port) = lookup("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            lookup("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string())
        };

        let mut movement = MovementTuning::default();
        if let Some(speed) = parse_speed(&lookup, "MOVE_SPEED")? {
            movement.move_speed = speed;
        }
        if let Some(speed) = parse_speed(&lookup, "JUMP_SPEED")? {
            movement.jump_speed = speed;
        }

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            client_origin: lookup("CLIENT_ORIGIN").unwrap_or_else(|| "*".to_string()),
            physics_enabled: parse(&lookup, "PHYSICS_ENABLED")?.unwrap_or(true),
            physics_debug: parse(&lookup, "PHYSICS_DEBUG")?.unwrap_or(true),
            sim_seed: parse(&lookup, "SIM_SEED")?,
            movement,
        })
    }
}

fn parse<F, T>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(None),
    }
}

/// Speeds must be finite and positive; `f32` parsing alone admits NaN and inf
fn parse_speed<F>(lookup: &F, key: &'static str) -> Result<Option<f32>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match parse::<F, f32>(lookup, key)? {
        Some(speed) if !(speed.is_finite() && speed > 0.0) => Err(ConfigError::Invalid {
            key,
            value: speed.to_string(),
        }),
        speed => Ok(speed),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },

    #[error("Invalid server address format")]
    InvalidAddress,
}
