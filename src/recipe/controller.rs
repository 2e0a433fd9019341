//! Recipe protocol controller: request → generate → validate → apply.
//!
//! ```text
//! request_draft ──publish──► draft_request topic ──► generator
//!                                                        │
//! handle_response ◄── draft_response topic ◄─────────────┘
//!       │ validate against the pending max angle
//!       ▼
//! DeviceState.last_ai_recipe ──apply_draft──► recipe_json, recipe, mode
//! ```
//!
//! Single flight: a new request supersedes the pending one. Every request
//! carries a monotonic token; a response echoing an older token is dropped.
//! Responses without a token are matched to whatever is pending.

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::draft::parse_response;
use super::prompt::{compose_prompt, effective_max_angle, DraftRequest};
use super::wire::Numbers;
use crate::device::events::{ConsoleEvent, EventBus};
use crate::device::state::{is_valid_slot, DeviceState, Mode};
use crate::device::topics::TopicMap;
use crate::error::IntentError;
use crate::mqtt::session::Session;
use crate::mqtt::transport::BusTransport;

#[derive(Clone, Debug, PartialEq)]
pub struct PendingRecipeRequest {
    pub token: u64,
    pub prompt: String,
    pub issued_at: DateTime<Local>,
    pub max_angle: f64,
}

#[derive(Serialize)]
struct AppliedRecipe<'a> {
    angles: Numbers<'a>,
    delays: Numbers<'a>,
    slot: u8,
}

pub struct RecipeController {
    topics: TopicMap,
    last_token: u64,
    pending: Option<PendingRecipeRequest>,
}

impl RecipeController {
    pub fn new(topics: TopicMap) -> Self {
        RecipeController {
            topics,
            last_token: 0,
            pending: None,
        }
    }

    pub fn pending(&self) -> Option<&PendingRecipeRequest> {
        self.pending.as_ref()
    }

    /// Publishes a generation request and returns its token.
    ///
    /// Fire and forget: no timeout, no retry. Any accepted draft that was not
    /// applied yet is discarded.
    pub fn request_draft<T: BusTransport>(
        &mut self,
        session: &mut Session<T>,
        state: &mut DeviceState,
        prompt: &str,
        max_angle: f64,
        api_key: Option<&str>,
    ) -> Result<u64, IntentError> {
        if !session.is_connected() {
            return Err(IntentError::NotConnected);
        }

        let max_angle = effective_max_angle(max_angle);
        let composed = compose_prompt(prompt, max_angle);
        let token = self.last_token + 1;

        let envelope = serde_json::to_string(&DraftRequest {
            id: token,
            prompt: &composed,
            max_angle,
            api_key,
        })
        .map_err(|e| IntentError::Transport(e.to_string()))?;

        session.publish(&self.topics.draft_request, &envelope)?;
        self.last_token = token;

        if let Some(old) = self.pending.replace(PendingRecipeRequest {
            token,
            prompt: composed,
            issued_at: Local::now(),
            max_angle,
        }) {
            debug!("Request {} superseded by {}", old.token, token);
        }
        state.last_ai_recipe = None;

        info!("Requested AI recipe draft {} (max angle {})", token, max_angle);
        Ok(token)
    }

    /// Resolves the pending request with a response payload.
    ///
    /// Returns `true` when the device state changed.
    pub fn handle_response(&mut self, payload: &str, state: &mut DeviceState, events: &EventBus) -> bool {
        let Some(pending) = self.pending.as_ref() else {
            warn!("Dropping draft response with no request pending");
            return false;
        };

        let response = match parse_response(payload) {
            Ok(response) => response,
            Err(e) => {
                self.pending = None;
                warn!("Unreadable draft response: {}", e);
                events.emit(ConsoleEvent::AiDraftFailed(e.to_string()));
                return false;
            }
        };

        if let Some(id) = response.request_id {
            if id != pending.token {
                debug!("Dropping stale draft response {} (pending {})", id, pending.token);
                return false;
            }
        }

        let max_angle = pending.max_angle;
        self.pending = None;

        match response
            .outcome
            .and_then(|draft| draft.validate(max_angle).map(|_| draft))
        {
            Ok(draft) => {
                info!("Accepted AI draft with {} steps", draft.angles.len());
                state.last_ai_recipe = Some(draft.clone());
                events.emit(ConsoleEvent::AiDraftReady(draft));
                true
            }
            Err(e) => {
                warn!("Rejected AI draft: {}", e);
                events.emit(ConsoleEvent::AiDraftFailed(e.to_string()));
                false
            }
        }
    }

    /// Publishes the accepted draft into `slot` and starts it.
    ///
    /// Three independent sends in fixed order: draft JSON with slot, slot
    /// selection, mode = Recipe. A failed send does not stop the others; the
    /// first failure is returned.
    pub fn apply_draft<T: BusTransport>(
        &self,
        session: &mut Session<T>,
        state: &DeviceState,
        slot: Option<u8>,
    ) -> Result<(), IntentError> {
        if state.emergency_lockout {
            return Err(IntentError::Lockout);
        }
        if !session.is_connected() {
            return Err(IntentError::NotConnected);
        }
        let draft = state
            .last_ai_recipe
            .as_ref()
            .ok_or(IntentError::NoAcceptedDraft)?;
        let slot = slot.ok_or(IntentError::NoSelection)?;
        if !is_valid_slot(slot) {
            return Err(IntentError::InvalidSlot(slot));
        }

        let payload = serde_json::to_string(&AppliedRecipe {
            angles: Numbers(&draft.angles),
            delays: Numbers(&draft.delays),
            slot,
        })
        .map_err(|e| IntentError::Transport(e.to_string()))?;

        let sends = [
            (self.topics.recipe_json.as_str(), payload),
            (self.topics.recipe.as_str(), slot.to_string()),
            (self.topics.mode.as_str(), Mode::Recipe.wire_value().to_string()),
        ];

        let mut first_error = None;
        for (topic, payload) in sends.iter() {
            if let Err(e) = session.publish(topic, payload) {
                warn!("Apply step on {} failed: {}", topic, e);
                first_error.get_or_insert(IntentError::from(e));
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!("Applied AI draft to recipe slot {}", slot);
                Ok(())
            }
        }
    }
}
