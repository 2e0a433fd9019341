// Topic layout shared with the device firmware and the recipe backend.

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct TopicMap {
    pub telemetry: String,
    pub alert_text: String,
    pub emergency: String,
    pub angle: String,
    pub mode: String,
    pub recipe: String,
    pub recipe_json: String,
    pub draft_request: String,
    pub draft_response: String,
}

impl Default for TopicMap {
    fn default() -> Self {
        Self {
            telemetry: "arduino/to/pi".to_string(),
            alert_text: "arduino/alert".to_string(),
            emergency: "alert".to_string(),
            angle: "mobile/angle".to_string(),
            mode: "mobile/mode".to_string(),
            recipe: "mobile/recipe".to_string(),
            recipe_json: "mobile/recipe_json".to_string(),
            draft_request: "ai/recipe/request".to_string(),
            draft_response: "ai/recipe/response".to_string(),
        }
    }
}

impl TopicMap {
    /// The fixed subscription set declared on every successful connect.
    pub fn subscriptions(&self) -> [&str; 7] {
        [
            self.telemetry.as_str(),
            self.alert_text.as_str(),
            self.emergency.as_str(),
            self.angle.as_str(),
            self.mode.as_str(),
            self.recipe.as_str(),
            self.draft_response.as_str(),
        ]
    }
}
