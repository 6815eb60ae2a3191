use tracing::{info, warn};

use super::Session;
use crate::registry::BrokerRegistry;
use crate::utils::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailoverOutcome {
    /// A standby link closed and was removed; the selected broker is unchanged.
    StandbyDropped { broker_id: String },
    /// The selected broker closed and `to` now serves the client.
    Promoted {
        from: String,
        to: String,
        replayed: usize,
    },
    /// The broker was not part of this session.
    Unknown,
}

impl Session {
    /// Handle the close of the link to `broker_id`.
    ///
    /// Losing the selected broker promotes the next one in link order,
    /// replays every logged SUBSCRIBE onto it and moves the session's topics
    /// from the old broker to the new one. Fails with `NoAlternateBroker` if
    /// the closed broker was the only one left; the session is then unusable.
    pub fn on_broker_closed(
        &mut self,
        broker_id: &str,
        registry: &BrokerRegistry,
    ) -> Result<FailoverOutcome> {
        let Some(index) = self.brokers.iter().position(|b| b.id == broker_id) else {
            return Ok(FailoverOutcome::Unknown);
        };

        if broker_id != self.selected {
            self.brokers.remove(index);
            info!(
                "Standby broker '{broker_id}' left session '{}', {} remaining",
                self.client_id,
                self.brokers.len()
            );
            return Ok(FailoverOutcome::StandbyDropped {
                broker_id: broker_id.to_string(),
            });
        }

        let count = self.brokers.len();
        if count == 1 {
            self.brokers.clear();
            self.selected.clear();
            warn!(
                "Selected broker '{broker_id}' closed and session '{}' has no other",
                self.client_id
            );
            return Err(Error::NoAlternateBroker(self.client_id.clone()));
        }

        let next = self.brokers[(index + 1) % count].clone();
        self.selected = next.id.clone();
        for subscription in &self.subscriptions {
            next.send(&subscription.frame);
        }
        self.brokers.remove(index);

        let topics: Vec<String> = self
            .subscriptions
            .iter()
            .flat_map(|s| s.topics.iter().cloned())
            .collect();
        registry.reassign_topics(&topics, broker_id, &next.id);

        info!(
            "Session '{}' failed over from '{broker_id}' to '{}', {} subscription(s) replayed",
            self.client_id,
            next.id,
            self.subscriptions.len()
        );
        Ok(FailoverOutcome::Promoted {
            from: broker_id.to_string(),
            to: next.id,
            replayed: self.subscriptions.len(),
        })
    }
}
