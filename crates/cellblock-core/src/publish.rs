//! Typed event publishing

use cellblock_api::{Event, EventPayload, JailView, PrisonerView};
use cellblock_host_api::EventNotifier;
use cellblock_util::JailName;
use std::sync::Arc;

/// One publish function per engine event
#[derive(Clone)]
pub struct Publisher {
    notifier: Arc<dyn EventNotifier>,
}

impl Publisher {
    pub fn new(notifier: Arc<dyn EventNotifier>) -> Self {
        Self { notifier }
    }

    fn publish(&self, payload: EventPayload) {
        self.notifier.notify(Event::new(payload));
    }

    pub fn player_jailed(&self, prisoner: PrisonerView) {
        self.publish(EventPayload::PlayerJailed { prisoner });
    }

    /// `prisoner` is the snapshot from before release
    pub fn player_released(&self, prisoner: PrisonerView) {
        self.publish(EventPayload::PlayerReleased { prisoner });
    }

    pub fn jail_created(&self, jail: JailView) {
        self.publish(EventPayload::JailCreated { jail });
    }

    pub fn jail_deleted(&self, name: JailName) {
        self.publish(EventPayload::JailDeleted { name });
    }

    pub fn data_saved(&self, prisoner_count: usize, jail_count: usize) {
        self.publish(EventPayload::DataSaved {
            prisoner_count,
            jail_count,
        });
    }

    pub fn config_reloaded(&self, prisoner_count: usize, jail_count: usize) {
        self.publish(EventPayload::ConfigReloaded {
            prisoner_count,
            jail_count,
        });
    }
}
