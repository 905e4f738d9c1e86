//! Player session state.
//!
//! `PlayerState` owns the health tracker: current/max hp plus change
//! subscriptions. On the server it is the authoritative record a character's
//! damage entry point forwards into; on clients it is materialized from
//! replicated `HealthUpdate`s. Characters bind to it asynchronously, since
//! the session object is not guaranteed to exist when the character spawns.

use std::sync::Mutex;

use tracing::debug;

/// Health-change subscriber.
pub type HpListener = Box<dyn FnMut(f32, f32) + Send>;

#[derive(Debug, Clone, Copy)]
struct Stats {
    hp: f32,
    max_hp: f32,
}

/// Session-scoped player state with health change notifications.
pub struct PlayerState {
    stats: Mutex<Stats>,
    // Kept apart from `stats` so listeners run outside the stat lock.
    listeners: Mutex<Vec<HpListener>>,
}

impl PlayerState {
    pub fn new(max_hp: f32) -> Self {
        Self {
            stats: Mutex::new(Stats { hp: max_hp, max_hp }),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn hp(&self) -> f32 {
        self.stats.lock().expect("player stats poisoned").hp
    }

    pub fn max_hp(&self) -> f32 {
        self.stats.lock().expect("player stats poisoned").max_hp
    }

    /// Subscribes to health changes. The callback fires on every subsequent
    /// change with `(current, max)`.
    pub fn subscribe(&self, listener: HpListener) {
        self.listeners
            .lock()
            .expect("player listeners poisoned")
            .push(listener);
    }

    /// Applies damage (authority write). Hp clamps at zero.
    pub fn add_damage(&self, amount: f32) {
        let stats = {
            let mut stats = self.stats.lock().expect("player stats poisoned");
            stats.hp = (stats.hp - amount).max(0.0);
            *stats
        };
        debug!(hp = stats.hp, amount, "damage applied");
        self.notify(stats);
    }

    /// Overwrites the stats (replication write).
    pub fn set_stats(&self, hp: f32, max_hp: f32) {
        let stats = {
            let mut stats = self.stats.lock().expect("player stats poisoned");
            stats.hp = hp;
            stats.max_hp = max_hp;
            *stats
        };
        self.notify(stats);
    }

    fn notify(&self, stats: Stats) {
        let mut listeners = self.listeners.lock().expect("player listeners poisoned");
        for listener in listeners.iter_mut() {
            listener(stats.hp, stats.max_hp);
        }
    }
}
