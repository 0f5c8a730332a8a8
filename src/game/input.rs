//! Input validation and per-connection intake

use governor::clock::{Clock, DefaultClock};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::util::rate_limit::{ConnectionRateLimiter, MIN_INPUT_INTERVAL};

use super::participant::Participant;

/// Held movement intents of one participant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InputState {
    pub left: bool,
    pub right: bool,
    pub forward: bool,
    pub backward: bool,
    pub jump: bool,
}

impl InputState {
    /// Overwrite the keys present in `patch`, keep the rest
    pub fn apply(&mut self, patch: &InputPatch) {
        if let Some(v) = patch.left {
            self.left = v;
        }
        if let Some(v) = patch.right {
            self.right = v;
        }
        if let Some(v) = patch.forward {
            self.forward = v;
        }
        if let Some(v) = patch.backward {
            self.backward = v;
        }
        if let Some(v) = patch.jump {
            self.jump = v;
        }
    }
}

/// Normalized partial input record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputPatch {
    pub left: Option<bool>,
    pub right: Option<bool>,
    pub forward: Option<bool>,
    pub backward: Option<bool>,
    pub jump: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InputError {
    #[error("input record missing")]
    Missing,

    #[error("input record is not an object")]
    NotAnObject,
}

/// Normalize a raw input record.
///
/// Only the five movement keys survive; each is coerced with the same
/// truthiness rules a browser client would apply.
pub fn validate(raw: &Value) -> Result<InputPatch, InputError> {
    let record = match raw {
        Value::Null => return Err(InputError::Missing),
        Value::Object(map) => map,
        _ => return Err(InputError::NotAnObject),
    };

    let key = |name: &str| record.get(name).map(truthy);
    Ok(InputPatch {
        left: key("left"),
        right: key("right"),
        forward: key("forward"),
        backward: key("backward"),
        jump: key("jump"),
    })
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Validates and rate-limits inbound input before it touches a participant
pub struct InputHandler<C: Clock = DefaultClock> {
    limiter: ConnectionRateLimiter<C>,
}

impl InputHandler<DefaultClock> {
    pub fn new() -> Self {
        Self::with_clock(MIN_INPUT_INTERVAL, DefaultClock::default())
    }
}

impl Default for InputHandler<DefaultClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> InputHandler<C> {
    pub fn with_clock(min_interval: Duration, clock: C) -> Self {
        Self {
            limiter: ConnectionRateLimiter::with_clock(min_interval, clock),
        }
    }

    /// Enforce the minimum inter-arrival interval for this connection
    pub fn should_accept(&mut self, connection_id: Uuid) -> bool {
        self.limiter.check(connection_id)
    }

    /// Validate, rate-limit and apply. Returns whether the input was applied.
    pub fn process(
        &mut self,
        connection_id: Uuid,
        raw: &Value,
        participant: &mut Participant,
    ) -> bool {
        let patch = match validate(raw) {
            Ok(patch) => patch,
            Err(e) => {
                debug!(connection_id = %connection_id, error = %e, "Dropping malformed input");
                return false;
            }
        };

        if !self.should_accept(connection_id) {
            debug!(connection_id = %connection_id, "Rate limited input message");
            return false;
        }

        participant.update_input(&patch);
        true
    }

    /// Forget the connection's rate-limit state (call on disconnect)
    pub fn cleanup(&mut self, connection_id: &Uuid) {
        self.limiter.remove(connection_id);
    }

    /// Size of the per-connection bookkeeping
    pub fn tracked_connections(&self) -> usize {
        self.limiter.len()
    }
}
