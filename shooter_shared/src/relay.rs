//! Server-authoritative action relay.
//!
//! Every player action follows the same three-step shape:
//!
//! 1. Local intent: the input owner sends a `Request*` to the authority on
//!    the reliable, ordered stream.
//! 2. Request handling, authority only: [`handle_request`] validates the
//!    action's precondition against the actor's current state. A failed
//!    precondition drops the flow silently: the response is simply never
//!    sent, and the originator gets no feedback.
//! 3. Response handling, every participant (the authority included):
//!    [`apply_response`] executes the observable side effect.
//!
//! Splitting validation from execution keeps the decision single-sourced on
//! the authority while every node renders the consequence identically.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::character::Character;

/// Relay protocol messages, one request/response pair per action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayMsg {
    RequestTrigger,
    ResponseTrigger,
    RequestToggleRagdoll,
    ResponseToggleRagdoll,
    RequestReload,
    ResponseReload,
}

impl RelayMsg {
    /// Whether this message may be sent as a request to the authority.
    pub fn is_request(self) -> bool {
        matches!(
            self,
            RelayMsg::RequestTrigger | RelayMsg::RequestToggleRagdoll | RelayMsg::RequestReload
        )
    }
}

/// Validates a request against the actor's current state. Authority only.
///
/// Returns the response to broadcast, or `None` when the request is denied
/// or malformed.
pub fn handle_request(character: &Character, msg: RelayMsg) -> Option<RelayMsg> {
    match msg {
        RelayMsg::RequestTrigger => {
            // Precondition holds when the item says so, or when no item is
            // equipped at all.
            if let Some(weapon) = character.equipped() {
                if !weapon.can_use() {
                    debug!(id = ?character.id(), "trigger denied: item not usable");
                    return None;
                }
            }
            Some(RelayMsg::ResponseTrigger)
        }
        RelayMsg::RequestToggleRagdoll => Some(RelayMsg::ResponseToggleRagdoll),
        RelayMsg::RequestReload => Some(RelayMsg::ResponseReload),
        other => {
            warn!(?other, "response variant sent as request, dropping");
            None
        }
    }
}

/// Executes a broadcast response's side effect on this node's view of the
/// actor. Runs on every participant.
///
/// Capability calls land on the item equipped *now*, not the one equipped
/// when the request was issued. A missing item makes the effect a no-op.
pub fn apply_response(character: &mut Character, msg: RelayMsg) {
    match msg {
        RelayMsg::ResponseTrigger => {
            if let Some(weapon) = character.equipped() {
                weapon.trigger();
            }
        }
        RelayMsg::ResponseToggleRagdoll => {
            if character.is_ragdoll() {
                character.do_getup();
            } else {
                character.do_ragdoll();
            }
        }
        RelayMsg::ResponseReload => {
            if let Some(weapon) = character.equipped() {
                weapon.reload();
            }
        }
        other => {
            warn!(?other, "request variant broadcast as response, ignoring");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::character::NullRig;
    use crate::net::ClientId;
    use crate::weapon::{Weapon, WeaponKind, WeaponSpec};
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;

    /// Counts capability calls; usability is settable.
    #[derive(Default)]
    struct ProbeWeapon {
        usable: AtomicBool,
        triggers: AtomicU32,
        reloads: AtomicU32,
    }

    impl ProbeWeapon {
        fn usable(yes: bool) -> Arc<Self> {
            let probe = Self::default();
            probe.usable.store(yes, Ordering::SeqCst);
            Arc::new(probe)
        }
    }

    impl Weapon for ProbeWeapon {
        fn can_use(&self) -> bool {
            self.usable.load(Ordering::SeqCst)
        }
        fn trigger(&self) {
            self.triggers.fetch_add(1, Ordering::SeqCst);
        }
        fn reload(&self) {
            self.reloads.fetch_add(1, Ordering::SeqCst);
        }
        fn set_owner(&self, _owner: ClientId) {}
        fn spec(&self) -> WeaponSpec {
            WeaponSpec {
                kind: WeaponKind::Rifle,
                magazine: 0,
            }
        }
    }

    fn bare_character() -> Character {
        Character::new(ClientId::new_unique(), Box::new(NullRig))
    }

    #[test]
    fn trigger_allowed_when_item_usable() {
        let mut chr = bare_character();
        chr.set_equipped(Some(ProbeWeapon::usable(true)));
        assert_eq!(
            handle_request(&chr, RelayMsg::RequestTrigger),
            Some(RelayMsg::ResponseTrigger)
        );
    }

    #[test]
    fn trigger_allowed_when_no_item_equipped() {
        let chr = bare_character();
        assert_eq!(
            handle_request(&chr, RelayMsg::RequestTrigger),
            Some(RelayMsg::ResponseTrigger)
        );
    }

    #[test]
    fn trigger_denied_when_item_unusable() {
        let mut chr = bare_character();
        let probe = ProbeWeapon::usable(false);
        chr.set_equipped(Some(probe.clone()));

        assert_eq!(handle_request(&chr, RelayMsg::RequestTrigger), None);
        // Denial produced no side effect anywhere.
        assert_eq!(probe.triggers.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn ragdoll_and_reload_have_no_precondition() {
        let chr = bare_character();
        assert_eq!(
            handle_request(&chr, RelayMsg::RequestToggleRagdoll),
            Some(RelayMsg::ResponseToggleRagdoll)
        );
        assert_eq!(
            handle_request(&chr, RelayMsg::RequestReload),
            Some(RelayMsg::ResponseReload)
        );
    }

    #[test]
    fn response_as_request_is_dropped() {
        let chr = bare_character();
        assert_eq!(handle_request(&chr, RelayMsg::ResponseTrigger), None);
        assert_eq!(handle_request(&chr, RelayMsg::ResponseReload), None);
    }

    #[test]
    fn trigger_response_fires_exactly_once() {
        let mut chr = bare_character();
        let probe = ProbeWeapon::usable(true);
        chr.set_equipped(Some(probe.clone()));

        apply_response(&mut chr, RelayMsg::ResponseTrigger);
        assert_eq!(probe.triggers.load(Ordering::SeqCst), 1);
        assert_eq!(probe.reloads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn response_hits_item_equipped_at_response_time() {
        // The item changes between request validation and response
        // execution; the effect must land on the current item.
        let mut chr = bare_character();
        let at_request = ProbeWeapon::usable(true);
        chr.set_equipped(Some(at_request.clone()));

        let resp = handle_request(&chr, RelayMsg::RequestTrigger).unwrap();

        let at_response = ProbeWeapon::usable(true);
        chr.set_equipped(Some(at_response.clone()));
        apply_response(&mut chr, resp);

        assert_eq!(at_request.triggers.load(Ordering::SeqCst), 0);
        assert_eq!(at_response.triggers.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn trigger_response_without_item_is_noop() {
        let mut chr = bare_character();
        apply_response(&mut chr, RelayMsg::ResponseTrigger);
        apply_response(&mut chr, RelayMsg::ResponseReload);
        assert!(!chr.is_ragdoll());
    }

    #[test]
    fn toggle_twice_restores_flag() {
        let mut chr = bare_character();
        apply_response(&mut chr, RelayMsg::ResponseToggleRagdoll);
        assert!(chr.is_ragdoll());
        apply_response(&mut chr, RelayMsg::ResponseToggleRagdoll);
        assert!(!chr.is_ragdoll());
    }

    #[test]
    fn reload_response_reloads_current_item() {
        let mut chr = bare_character();
        let probe = ProbeWeapon::usable(false);
        chr.set_equipped(Some(probe.clone()));

        apply_response(&mut chr, RelayMsg::ResponseReload);
        assert_eq!(probe.reloads.load(Ordering::SeqCst), 1);
    }
}
