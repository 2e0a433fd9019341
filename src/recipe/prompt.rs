// Outbound request envelope for the recipe generator.

use serde::Serialize;

use crate::device::state::SERVO_MAX_ANGLE;

pub const DEFAULT_USER_PROMPT: &str = "Generate a concise servo recipe.";

/// Maps an operator-supplied limit onto the servo's real travel.
pub fn effective_max_angle(requested: f64) -> f64 {
    if !requested.is_finite() || requested <= 0.0 {
        SERVO_MAX_ANGLE
    } else {
        requested.min(SERVO_MAX_ANGLE)
    }
}

/// Wraps the operator prompt with the actuation limit and the output shape
/// the response parser expects.
pub fn compose_prompt(user_prompt: &str, max_angle: f64) -> String {
    let user_prompt = match user_prompt.trim() {
        "" => DEFAULT_USER_PROMPT,
        p => p,
    };
    format!(
        "You control a servo (0..{max_angle} degrees). Return ONLY minified JSON with shape \
         {{\"angles\":[...],\"delays\":[...]}}. Length 3-8. Delays are seconds. No extra text.\
         \n\nUser request: {user_prompt}"
    )
}

#[derive(Serialize, Debug)]
pub struct DraftRequest<'a> {
    pub id: u64,
    pub prompt: &'a str,
    #[serde(serialize_with = "super::wire::number")]
    pub max_angle: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<&'a str>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_angle_is_bounded_by_servo_travel() {
        assert_eq!(effective_max_angle(90.0), 90.0);
        assert_eq!(effective_max_angle(500.0), 140.0);
        assert_eq!(effective_max_angle(0.0), 140.0);
        assert_eq!(effective_max_angle(f64::NAN), 140.0);
    }

    #[test]
    fn prompt_embeds_limit_and_shape() {
        let prompt = compose_prompt("wave slowly", 90.0);
        assert!(prompt.starts_with("You control a servo (0..90 degrees)."));
        assert!(prompt.contains(r#"{"angles":[...],"delays":[...]}"#));
        assert!(prompt.ends_with("User request: wave slowly"));

        assert!(compose_prompt("  ", 90.0).ends_with(DEFAULT_USER_PROMPT));
    }

    #[test]
    fn envelope_keeps_fractional_limit() {
        let request = DraftRequest {
            id: 4,
            prompt: "p",
            max_angle: 92.5,
            api_key: Some("k"),
        };
        assert_eq!(
            serde_json::to_string(&request).unwrap(),
            r#"{"id":4,"prompt":"p","max_angle":92.5,"api_key":"k"}"#
        );
    }

    #[test]
    fn envelope_omits_missing_key() {
        let request = DraftRequest {
            id: 3,
            prompt: "p",
            max_angle: 140.0,
            api_key: None,
        };
        assert_eq!(
            serde_json::to_string(&request).unwrap(),
            r#"{"id":3,"prompt":"p","max_angle":140}"#
        );
    }
}
