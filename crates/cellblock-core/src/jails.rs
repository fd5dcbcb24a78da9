//! Jail registry

use cellblock_api::{JailView, Location};
use cellblock_store::{JailRecord, Pending, StorageGateway, StoreResult};
use cellblock_util::JailName;
use std::collections::BTreeMap;
use std::future::Future;
use tracing::{debug, info};

use crate::Publisher;

/// A named place prisoners are held
#[derive(Debug, Clone, PartialEq)]
pub struct Jail {
    pub name: JailName,
    pub location: Location,
    /// Where prisoners go on release instead of their last location
    pub release_location: Option<Location>,
}

impl Jail {
    pub fn view(&self) -> JailView {
        JailView {
            name: self.name.clone(),
            location: self.location.clone(),
            release_location: self.release_location.clone(),
        }
    }

    fn to_record(&self) -> JailRecord {
        JailRecord {
            name: self.name.clone(),
            location: self.location.clone(),
            release_location: self.release_location.clone(),
        }
    }
}

impl From<JailRecord> for Jail {
    fn from(record: JailRecord) -> Self {
        Self {
            name: record.name,
            location: record.location,
            release_location: record.release_location,
        }
    }
}

/// All jails, keyed by lowercase name
pub struct JailRegistry {
    jails: BTreeMap<JailName, Jail>,
    gateway: StorageGateway,
    publisher: Publisher,
}

impl JailRegistry {
    pub fn new(gateway: StorageGateway, publisher: Publisher) -> Self {
        Self {
            jails: BTreeMap::new(),
            gateway,
            publisher,
        }
    }

    /// Replace the in-memory jails with what storage holds
    pub async fn load(&mut self) -> StoreResult<usize> {
        let records = self.gateway.load_jails().await?;
        self.jails = records
            .into_iter()
            .map(|r| (r.name.clone(), Jail::from(r)))
            .collect();

        info!(count = self.jails.len(), "Jails loaded");
        Ok(self.jails.len())
    }

    pub async fn reload(&mut self) -> StoreResult<usize> {
        self.load().await
    }

    pub fn get(&self, name: &JailName) -> Option<&Jail> {
        self.jails.get(name)
    }

    /// Jails in name order
    pub fn all(&self) -> impl Iterator<Item = &Jail> {
        self.jails.values()
    }

    /// Alphabetically first jail, the fallback for prisoners whose jail is gone
    pub fn first(&self) -> Option<&Jail> {
        self.jails.values().next()
    }

    pub fn len(&self) -> usize {
        self.jails.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jails.is_empty()
    }

    /// Create a jail, or move an existing one to `location`.
    ///
    /// The registry changes immediately; the returned future resolves once
    /// the write is durable and `JailCreated` has been published.
    pub fn add(
        &mut self,
        name: JailName,
        location: Location,
    ) -> impl Future<Output = StoreResult<Jail>> + Send + use<> {
        let jail = match self.jails.get_mut(&name) {
            Some(existing) => {
                existing.location = location;
                existing.clone()
            }
            None => {
                let jail = Jail {
                    name: name.clone(),
                    location,
                    release_location: None,
                };
                self.jails.insert(name, jail.clone());
                jail
            }
        };

        debug!(jail = %jail.name, location = %jail.location, "Jail set");
        let pending = self.gateway.save_jail(&jail.to_record());
        let publisher = self.publisher.clone();

        async move {
            pending.await?;
            info!(jail = %jail.name, "Jail saved");
            publisher.jail_created(jail.view());
            Ok(jail)
        }
    }

    /// Delete a jail; resolves to whether it existed
    pub fn remove(
        &mut self,
        name: &JailName,
    ) -> impl Future<Output = StoreResult<bool>> + Send + use<> {
        let pending = self
            .jails
            .remove(name)
            .map(|_| self.gateway.delete_jail(name.clone()));
        let publisher = self.publisher.clone();
        let name = name.clone();

        async move {
            let Some(pending) = pending else {
                return Ok(false);
            };
            pending.await?;
            info!(jail = %name, "Jail deleted");
            publisher.jail_deleted(name);
            Ok(true)
        }
    }

    /// Write every jail
    pub fn save_all(&self) -> Pending<()> {
        let records: Vec<JailRecord> = self.jails.values().map(Jail::to_record).collect();
        self.gateway.save_jails(&records)
    }
}
