//! Weapons.
//!
//! The equip slot holds `Arc<dyn Weapon>`: the item itself is owned by
//! whatever spawned it, and reassigning a slot never destroys the previous
//! item. The trait is the full capability set an equipped item must offer.
//! Call sites hold the trait object, so there is no downcast-and-silently-
//! no-op path.
//!
//! Replication carries a [`WeaponSpec`] descriptor rather than the item;
//! each node materializes its own local proxy from the descriptor.

use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc, Mutex,
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::net::ClientId;

/// Capability set of an equipped item.
pub trait Weapon: Send + Sync {
    /// Whether the item can currently perform its trigger action.
    fn can_use(&self) -> bool;
    /// Performs the trigger action.
    fn trigger(&self);
    /// Performs the reload action.
    fn reload(&self);
    /// Records the controlling owner. Must happen before any item-specific
    /// follow-up once the ownership chain is valid.
    fn set_owner(&self, owner: ClientId);
    /// Wire descriptor for replicating this item to other nodes.
    fn spec(&self) -> WeaponSpec;
}

/// Concrete weapon classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WeaponKind {
    Rifle,
}

/// Wire descriptor of an equipped item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeaponSpec {
    pub kind: WeaponKind,
    pub magazine: u32,
}

/// Materializes a local weapon proxy from a replicated descriptor.
pub fn spawn(spec: WeaponSpec) -> Arc<dyn Weapon> {
    match spec.kind {
        WeaponKind::Rifle => Arc::new(Rifle::new(spec.magazine)),
    }
}

/// Stock rifle: a magazine of rounds, spent by the trigger, refilled by
/// reload.
pub struct Rifle {
    magazine: u32,
    ammo: AtomicU32,
    owner: Mutex<Option<ClientId>>,
}

impl Rifle {
    /// Creates a rifle with a full magazine.
    pub fn new(magazine: u32) -> Self {
        Self {
            magazine,
            ammo: AtomicU32::new(magazine),
            owner: Mutex::new(None),
        }
    }

    /// Remaining rounds.
    pub fn ammo(&self) -> u32 {
        self.ammo.load(Ordering::SeqCst)
    }

    /// Empties the magazine.
    pub fn drain(&self) {
        self.ammo.store(0, Ordering::SeqCst);
    }

    pub fn owner(&self) -> Option<ClientId> {
        *self.owner.lock().expect("rifle owner poisoned")
    }
}

impl Weapon for Rifle {
    fn can_use(&self) -> bool {
        self.ammo() > 0
    }

    fn trigger(&self) {
        let before = self.ammo.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
            n.checked_sub(1)
        });
        match before {
            Ok(n) => debug!(ammo = n - 1, "rifle fired"),
            Err(_) => debug!("rifle dry fired"),
        }
    }

    fn reload(&self) {
        self.ammo.store(self.magazine, Ordering::SeqCst);
        debug!(ammo = self.magazine, "rifle reloaded");
    }

    fn set_owner(&self, owner: ClientId) {
        *self.owner.lock().expect("rifle owner poisoned") = Some(owner);
        info!(?owner, ammo = self.ammo(), "rifle owner set");
    }

    fn spec(&self) -> WeaponSpec {
        WeaponSpec {
            kind: WeaponKind::Rifle,
            magazine: self.magazine,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rifle_spends_and_reloads() {
        let rifle = Rifle::new(2);
        assert!(rifle.can_use());
        rifle.trigger();
        rifle.trigger();
        assert_eq!(rifle.ammo(), 0);
        assert!(!rifle.can_use());

        // Dry fire does not underflow.
        rifle.trigger();
        assert_eq!(rifle.ammo(), 0);

        rifle.reload();
        assert_eq!(rifle.ammo(), 2);
        assert!(rifle.can_use());
    }

    #[test]
    fn spawn_matches_spec() {
        let spec = WeaponSpec {
            kind: WeaponKind::Rifle,
            magazine: 5,
        };
        let weapon = spawn(spec);
        assert_eq!(weapon.spec(), spec);
        assert!(weapon.can_use());
    }
}
