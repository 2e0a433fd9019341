//! The console core: one session, the topic synchronizer, the recipe
//! controller and the shared device state, wired together.
//!
//! Every method runs to completion on the caller's turn; nothing here awaits.
//! The runtime loop in [`crate::runtime`] feeds it transport events, operator
//! intents and reconnect timer expiries one at a time.
//!
//! All outbound control passes through this type, which is where the
//! emergency lockout is enforced.

use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ConsoleConfig;
use crate::device::events::{ConsoleEvent, EventBus};
use crate::device::state::{is_valid_angle, is_valid_slot, DeviceState, Mode};
use crate::device::synchronizer::{Routed, TopicSynchronizer};
use crate::error::IntentError;
use crate::mqtt::config::ConnectionProfile;
use crate::mqtt::message_manager::BusMessage;
use crate::mqtt::session::{Session, SessionSignal, SessionState};
use crate::mqtt::transport::{BusTransport, TransportEvent};
use crate::recipe::controller::RecipeController;

/// What the operator can ask the console to do.
#[derive(Clone, Debug, PartialEq)]
pub enum OperatorIntent {
    Connect(ConnectionProfile),
    Disconnect,
    SetAngle(f64),
    SetMode(Mode),
    SelectRecipe(Option<u8>),
    RequestAiDraft { prompt: String, max_angle: f64 },
    ApplyAiDraft(Option<u8>),
    SaveProfile(ConnectionProfile),
    SaveAiKey(String),
}

pub struct Console<T: BusTransport> {
    session: Session<T>,
    sync: TopicSynchronizer,
    recipes: RecipeController,
    device: watch::Sender<DeviceState>,
    events: EventBus,
}

impl<T: BusTransport> Console<T> {
    pub fn new(transport: T, config: &ConsoleConfig) -> Self {
        let (device, _) = watch::channel(DeviceState::default());
        Console {
            session: Session::new(transport, config.timing.reconnect_delay()),
            sync: TopicSynchronizer::new(config.topics.clone()),
            recipes: RecipeController::new(config.topics.clone()),
            device,
            events: EventBus::new(config.event_capacity),
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ConsoleEvent> {
        self.events.subscribe()
    }

    pub fn device_state(&self) -> watch::Receiver<DeviceState> {
        self.device.subscribe()
    }

    pub fn session_state(&self) -> watch::Receiver<SessionState> {
        self.session.subscribe_state()
    }

    pub fn snapshot(&self) -> DeviceState {
        self.device.borrow().clone()
    }

    pub fn reconnect_deadline(&self) -> Option<Instant> {
        self.session.reconnect_deadline()
    }

    pub fn on_reconnect_timer(&mut self) {
        self.session.fire_reconnect();
    }

    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        match self.session.handle_event(event) {
            SessionSignal::Established => self.subscribe_all(),
            SessionSignal::Message(msg) => self.route(msg),
            SessionSignal::Lost | SessionSignal::Nothing => {}
        }
    }

    fn subscribe_all(&mut self) {
        let topics = self.sync.topics().clone();
        for topic in topics.subscriptions() {
            if let Err(e) = self.session.subscribe(topic) {
                warn!("Subscribing to {} failed: {}", topic, e);
            }
        }
        info!("Subscribed to device topics");
    }

    fn route(&mut self, msg: BusMessage) {
        debug!("Inbound {}", msg);
        let sync = &self.sync;
        let events = &self.events;
        let mut routed = Routed::Ignored;
        self.device.send_if_modified(|state| {
            routed = sync.apply(&msg, state, events);
            routed.changed()
        });

        if let Routed::DraftResponse(payload) = routed {
            let recipes = &mut self.recipes;
            self.device
                .send_if_modified(|state| recipes.handle_response(&payload, state, events));
        }
    }

    /// Lockout first, then session: a locked console refuses control even
    /// while disconnected.
    fn control_gate(&self) -> Result<(), IntentError> {
        if self.device.borrow().emergency_lockout {
            debug!("Control intent suppressed by emergency lockout");
            return Err(IntentError::Lockout);
        }
        if !self.session.is_connected() {
            return Err(IntentError::NotConnected);
        }
        Ok(())
    }

    pub fn connect(&mut self, profile: ConnectionProfile) -> Result<(), IntentError> {
        self.session.connect(profile).map_err(IntentError::from)
    }

    pub fn disconnect(&mut self) {
        self.session.disconnect();
    }

    pub fn set_angle(&mut self, angle: f64) -> Result<(), IntentError> {
        self.control_gate()?;
        if !is_valid_angle(angle) {
            return Err(IntentError::AngleOutOfRange(angle));
        }
        let topic = self.sync.topics().angle.clone();
        self.session.publish(&topic, &angle.to_string())?;
        Ok(())
    }

    pub fn set_mode(&mut self, mode: Mode) -> Result<(), IntentError> {
        self.control_gate()?;
        let topic = self.sync.topics().mode.clone();
        self.session.publish(&topic, mode.wire_value())?;
        Ok(())
    }

    pub fn select_recipe(&mut self, slot: Option<u8>) -> Result<(), IntentError> {
        self.control_gate()?;
        let slot = slot.ok_or(IntentError::NoSelection)?;
        if !is_valid_slot(slot) {
            return Err(IntentError::InvalidSlot(slot));
        }
        let topic = self.sync.topics().recipe.clone();
        self.session.publish(&topic, &slot.to_string())?;
        Ok(())
    }

    /// Returns the request token.
    pub fn request_ai_draft(
        &mut self,
        prompt: &str,
        max_angle: f64,
        api_key: Option<&str>,
    ) -> Result<u64, IntentError> {
        let recipes = &mut self.recipes;
        let session = &mut self.session;
        let mut result = Err(IntentError::NotConnected);
        self.device.send_if_modified(|state| {
            let had_draft = state.last_ai_recipe.is_some();
            result = recipes.request_draft(session, state, prompt, max_angle, api_key);
            had_draft && result.is_ok()
        });
        result
    }

    pub fn apply_ai_draft(&mut self, slot: Option<u8>) -> Result<(), IntentError> {
        let state = self.device.borrow().clone();
        self.recipes.apply_draft(&mut self.session, &state, slot)
    }
}
