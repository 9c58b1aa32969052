use crate::events::{Event, EventBus};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Tracks which subscriber may write to each `(agent, tab)` pair.
///
/// Gaining control always succeeds, stealing from any current owner; the
/// displaced owner learns about it through a `ControlChanged` event and
/// becomes view-only. Product behavior, not an oversight.
pub struct ControlRegistry {
    owners: Mutex<HashMap<(Uuid, Uuid), Uuid>>,
    bus: EventBus,
}

impl ControlRegistry {
    pub fn new(bus: EventBus) -> Arc<Self> {
        Arc::new(Self {
            owners: Mutex::new(HashMap::new()),
            bus,
        })
    }

    /// Unconditionally take control of the tab for `subscriber_id`.
    pub fn try_gain_control(&self, agent_id: Uuid, tab_id: Uuid, subscriber_id: Uuid) {
        let previous = self
            .lock()
            .insert((agent_id, tab_id), subscriber_id);
        if previous != Some(subscriber_id) {
            tracing::debug!(%agent_id, %tab_id, %subscriber_id, ?previous, "control taken");
        }
        self.bus.publish(Event::ControlChanged {
            agent_id,
            tab_id,
            new_owner: Some(subscriber_id),
        });
    }

    /// Claim control only when the tab is currently unowned (attach path).
    /// Returns whether `subscriber_id` holds control afterwards.
    pub fn claim_if_unowned(&self, agent_id: Uuid, tab_id: Uuid, subscriber_id: Uuid) -> bool {
        *self
            .lock()
            .entry((agent_id, tab_id))
            .or_insert(subscriber_id)
            == subscriber_id
    }

    pub fn owner_of(&self, agent_id: Uuid, tab_id: Uuid) -> Option<Uuid> {
        self.lock().get(&(agent_id, tab_id)).copied()
    }

    pub fn is_owner(&self, agent_id: Uuid, tab_id: Uuid, subscriber_id: Uuid) -> bool {
        self.owner_of(agent_id, tab_id) == Some(subscriber_id)
    }

    /// Release control if (and only if) `subscriber_id` currently owns it.
    pub fn release(&self, agent_id: Uuid, tab_id: Uuid, subscriber_id: Uuid) {
        let released = {
            let mut owners = self.lock();
            match owners.get(&(agent_id, tab_id)) {
                Some(owner) if *owner == subscriber_id => {
                    owners.remove(&(agent_id, tab_id));
                    true
                }
                _ => false,
            }
        };
        if released {
            self.bus.publish(Event::ControlChanged {
                agent_id,
                tab_id,
                new_owner: None,
            });
        }
    }

    /// Release everything a disconnecting subscriber owns.
    pub fn release_all(&self, subscriber_id: Uuid) {
        let released: Vec<(Uuid, Uuid)> = {
            let mut owners = self.lock();
            let keys: Vec<(Uuid, Uuid)> = owners
                .iter()
                .filter(|(_, owner)| **owner == subscriber_id)
                .map(|(key, _)| *key)
                .collect();
            for key in &keys {
                owners.remove(key);
            }
            keys
        };
        for (agent_id, tab_id) in released {
            self.bus.publish(Event::ControlChanged {
                agent_id,
                tab_id,
                new_owner: None,
            });
        }
    }

    /// Drop the entry for a closed tab without publishing.
    pub(crate) fn clear_tab(&self, agent_id: Uuid, tab_id: Uuid) {
        self.lock().remove(&(agent_id, tab_id));
    }

    /// Drop all entries for a deleted agent without publishing.
    pub(crate) fn clear_agent(&self, agent_id: Uuid) {
        self.lock().retain(|(owner_agent, _), _| *owner_agent != agent_id);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(Uuid, Uuid), Uuid>> {
        self.owners.lock().unwrap_or_else(|e| e.into_inner())
    }
}
