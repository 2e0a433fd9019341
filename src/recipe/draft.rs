//! Recipe drafts and the validation that gates them.
//!
//! A draft is a sequence of servo steps: move to `angles[i]`, hold for
//! `delays[i]` seconds. Drafts come from an untrusted generator, so nothing
//! reaches the device state until [`RecipeDraft::validate`] passes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const MAX_RECIPE_STEPS: usize = 12;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RecipeDraft {
    pub angles: Vec<f64>,
    pub delays: Vec<f64>,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DraftError {
    #[error("response is not valid JSON: {0}")]
    Malformed(String),

    #[error("response is not a JSON object")]
    NotAnObject,

    #[error("generator reported an error: {0}")]
    Remote(String),

    #[error("missing angles/delays arrays")]
    MissingArrays,

    #[error("{field} must be numbers")]
    NonNumeric { field: &'static str },

    #[error("angles and delays must be same length (got {angles} angles, {delays} delays)")]
    LengthMismatch { angles: usize, delays: usize },

    #[error("steps should be between 1 and {max} (got {steps})", max = MAX_RECIPE_STEPS)]
    StepCount { steps: usize },

    #[error("angle {angle} at step {index} out of range 0..{max}")]
    AngleOutOfRange { index: usize, angle: f64, max: f64 },

    #[error("delay {delay} at step {index} must be a positive number of seconds")]
    NonPositiveDelay { index: usize, delay: f64 },
}

impl RecipeDraft {
    /// Checks every draft invariant against `max_angle`. The first violated
    /// clause is reported.
    pub fn validate(&self, max_angle: f64) -> Result<(), DraftError> {
        if self.angles.len() != self.delays.len() {
            return Err(DraftError::LengthMismatch {
                angles: self.angles.len(),
                delays: self.delays.len(),
            });
        }

        let steps = self.angles.len();
        if !(1..=MAX_RECIPE_STEPS).contains(&steps) {
            return Err(DraftError::StepCount { steps });
        }

        for (index, &angle) in self.angles.iter().enumerate() {
            if !angle.is_finite() || angle < 0.0 || angle > max_angle {
                return Err(DraftError::AngleOutOfRange {
                    index,
                    angle,
                    max: max_angle,
                });
            }
        }

        for (index, &delay) in self.delays.iter().enumerate() {
            if !delay.is_finite() || delay <= 0.0 {
                return Err(DraftError::NonPositiveDelay { index, delay });
            }
        }

        Ok(())
    }
}

/// A decoded draft response, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct DraftResponse {
    /// Request token echoed by the generator, if it echoes one.
    pub request_id: Option<u64>,
    pub outcome: Result<RecipeDraft, DraftError>,
}

/// Removes a surrounding Markdown code fence, if there is one.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Skip the info string (`json`, `JSON`, nothing).
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

fn numbers(value: Option<&Value>, field: &'static str) -> Result<Vec<f64>, DraftError> {
    let items = value
        .and_then(Value::as_array)
        .ok_or(DraftError::MissingArrays)?;
    items
        .iter()
        .map(|v| v.as_f64().ok_or(DraftError::NonNumeric { field }))
        .collect()
}

/// Decodes a response payload.
///
/// The outer `Err` means the payload could not be read at all (so not even
/// the request id is known); an explicit error marker or bad arrays land in
/// `outcome`.
pub fn parse_response(payload: &str) -> Result<DraftResponse, DraftError> {
    let value: Value = serde_json::from_str(strip_code_fence(payload))
        .map_err(|e| DraftError::Malformed(e.to_string()))?;
    let object = value.as_object().ok_or(DraftError::NotAnObject)?;

    let request_id = object.get("id").and_then(Value::as_u64);

    let outcome = match object.get("error") {
        Some(marker) if !marker.is_null() => {
            let text = marker
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| marker.to_string());
            Err(DraftError::Remote(text))
        }
        _ => numbers(object.get("angles"), "angles").and_then(|angles| {
            numbers(object.get("delays"), "delays").map(|delays| RecipeDraft { angles, delays })
        }),
    };

    Ok(DraftResponse {
        request_id,
        outcome,
    })
}
