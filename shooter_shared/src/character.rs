//! The playable character.
//!
//! A `Character` exists on every node: the server owns the authoritative
//! instance, clients keep one replica per known actor. All mutation happens
//! on the owning node's single loop (tick, relay responses, timer
//! callbacks), so the handle's mutex is about sharing with deferred
//! callbacks, not about cross-thread contention.
//!
//! Late collaborators (the controller and the player session) are reached
//! through [`LateRef`] slots and bound with the fixed-interval retry policy.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tracing::{debug, info};

use crate::{
    math::{Rot3, Vec3, GETUP_MESH_OFFSET, GETUP_MESH_ROTATION},
    net::ClientId,
    session::PlayerState,
    timer::{retry_until, LateRef, TimerQueue},
    weapon::Weapon,
};

/// Mesh/physics glue seam. Rendering, animation and the actual physics
/// simulation live behind this on a real node.
pub trait RigBackend: Send {
    fn set_simulate_physics(&mut self, enabled: bool);
    fn attach_to_root(&mut self, offset: Vec3, rotation: Rot3);
}

/// No-op rig for headless nodes and tests.
#[derive(Default)]
pub struct NullRig;

impl RigBackend for NullRig {
    fn set_simulate_physics(&mut self, _enabled: bool) {}
    fn attach_to_root(&mut self, _offset: Vec3, _rotation: Rot3) {}
}

/// A playable character.
pub struct Character {
    id: ClientId,
    equipped: Option<Arc<dyn Weapon>>,
    control_pitch: f32,
    ragdoll: bool,
    rig: Box<dyn RigBackend>,
    controller: LateRef<ClientId>,
    session: LateRef<Arc<PlayerState>>,
}

impl Character {
    pub fn new(id: ClientId, rig: Box<dyn RigBackend>) -> Self {
        Self {
            id,
            equipped: None,
            control_pitch: 0.0,
            ragdoll: false,
            rig,
            controller: LateRef::empty(),
            session: LateRef::empty(),
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn equipped(&self) -> Option<&Arc<dyn Weapon>> {
        self.equipped.as_ref()
    }

    /// Assigns the equip slot and returns the newly equipped item.
    ///
    /// The slot shares ownership with the spawner; the previous item is not
    /// destroyed by reassignment.
    pub fn set_equipped(
        &mut self,
        weapon: Option<Arc<dyn Weapon>>,
    ) -> Option<Arc<dyn Weapon>> {
        self.equipped = weapon;
        self.equipped.clone()
    }

    /// Authoritative control pitch. Written by the server tick only; every
    /// other node treats it as read-only replicated state.
    pub fn control_pitch(&self) -> f32 {
        self.control_pitch
    }

    pub fn set_control_pitch(&mut self, pitch: f32) {
        self.control_pitch = pitch;
    }

    pub fn is_ragdoll(&self) -> bool {
        self.ragdoll
    }

    /// Collapses into physics-simulated ragdoll.
    pub fn do_ragdoll(&mut self) {
        self.ragdoll = true;
        self.rig.set_simulate_physics(true);
    }

    /// Stands back up: physics off, mesh re-attached at the fixed pose.
    pub fn do_getup(&mut self) {
        self.ragdoll = false;
        self.rig.set_simulate_physics(false);
        self.rig
            .attach_to_root(GETUP_MESH_OFFSET, GETUP_MESH_ROTATION);
    }

    /// Health-change notification entry point.
    pub fn on_update_hp(&mut self, current_hp: f32, max_hp: f32) {
        info!(id = ?self.id, current_hp, max_hp, "hp updated");
        if current_hp <= 0.0 {
            self.do_ragdoll();
        }
    }

    /// Late-bound controlling session (set at possession).
    pub fn controller(&self) -> &LateRef<ClientId> {
        &self.controller
    }

    /// Late-bound player session state.
    pub fn session(&self) -> &LateRef<Arc<PlayerState>> {
        &self.session
    }
}

/// Shared handle to a character, used by the owning node's maps and by
/// deferred callbacks.
#[derive(Clone)]
pub struct CharacterHandle(Arc<Mutex<Character>>);

impl CharacterHandle {
    pub fn new(character: Character) -> Self {
        Self(Arc::new(Mutex::new(character)))
    }

    pub fn lock(&self) -> MutexGuard<'_, Character> {
        self.0.lock().expect("character mutex poisoned")
    }

    fn weak(&self) -> Weak<Mutex<Character>> {
        Arc::downgrade(&self.0)
    }

    /// Damage entry point exposed to the outside.
    ///
    /// Forwards to the bound session's health tracker; reports nothing back
    /// to the caller (the return value is always 0).
    pub fn apply_damage(&self, amount: f32, instigator: Option<ClientId>) -> f32 {
        let (id, session) = {
            let chr = self.lock();
            (chr.id, chr.session.get())
        };
        info!(?id, amount, ?instigator, "take damage");
        if let Some(state) = session {
            state.add_damage(amount);
        }
        0.0
    }

    /// Deferred binding to the player session: retries on `interval` until
    /// the session exists, then subscribes the hp notification exactly once
    /// and seeds it with the current stats.
    pub fn begin_play(&self, timers: &mut TimerQueue, interval: Duration) {
        let weak = self.weak();
        let session = self.lock().session.clone();

        retry_until(timers, interval, move || {
            let Some(state) = session.get() else {
                debug!("session not available yet, rescheduling bind");
                return false;
            };
            // Stop retrying if the character is gone.
            let Some(chr) = weak.upgrade() else {
                return true;
            };

            let sub = weak.clone();
            state.subscribe(Box::new(move |hp, max_hp| {
                if let Some(chr) = sub.upgrade() {
                    chr.lock()
                        .expect("character mutex poisoned")
                        .on_update_hp(hp, max_hp);
                }
            }));

            chr.lock()
                .expect("character mutex poisoned")
                .on_update_hp(state.hp(), state.max_hp());
            true
        });
    }

    /// Deferred binding of the equipped item's controlling owner: retries on
    /// `interval` until the controller exists, then sets the owner exactly
    /// once. Runs on the authority only; remote replicas never acquire a
    /// controller.
    pub fn bind_weapon_owner(&self, timers: &mut TimerQueue, interval: Duration) {
        let weak = self.weak();
        let controller = self.lock().controller.clone();

        retry_until(timers, interval, move || {
            let Some(owner) = controller.get() else {
                debug!("controller not available yet, rescheduling owner bind");
                return false;
            };
            let Some(chr) = weak.upgrade() else {
                return true;
            };

            let chr = chr.lock().expect("character mutex poisoned");
            if let Some(weapon) = chr.equipped() {
                weapon.set_owner(owner);
                // Item-specific follow-ups (ammo readout) only after the
                // owner is in place.
                info!(?owner, spec = ?weapon.spec(), "weapon owner bound");
            }
            true
        });
    }
}
