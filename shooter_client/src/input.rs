//! Input handling.
//!
//! In a real client this would integrate with windowing, raw mouse/keyboard
//! and action bindings. This scaffold consumes already-debounced action
//! edges and a look axis, and produces deterministic per-tick `AimCommand`
//! messages.

use shooter_shared::net::{AimCommand, ClientId};

/// Base look up/down rate, in deg/sec.
pub const BASE_LOOK_UP_RATE: f32 = 45.0;

/// User input state at a moment in time.
#[derive(Debug, Clone, Copy, Default)]
pub struct InputState {
    /// Look up/down axis, normalized to $[-1, 1]$.
    pub look_up_rate: f32,
    /// Trigger action edge (pressed this tick).
    pub trigger_pressed: bool,
    /// Ragdoll-toggle action edge.
    pub ragdoll_pressed: bool,
    /// Reload action edge.
    pub reload_pressed: bool,
}

/// Integrates the look axis into a commanded pitch, wrapped to $[0, 360)$.
pub fn integrate_pitch(pitch: f32, input: InputState, dt_sec: f32) -> f32 {
    (pitch + input.look_up_rate * BASE_LOOK_UP_RATE * dt_sec).rem_euclid(360.0)
}

/// Turns the commanded pitch into an `AimCommand` for a tick.
pub fn build_aim_command(client_id: ClientId, tick: u32, pitch: f32) -> AimCommand {
    AimCommand {
        client_id,
        tick,
        pitch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pitch_integrates_at_base_rate() {
        let input = InputState {
            look_up_rate: 1.0,
            ..Default::default()
        };
        // One full second at full deflection.
        let pitch = integrate_pitch(0.0, input, 1.0);
        assert_eq!(pitch, BASE_LOOK_UP_RATE);
    }

    #[test]
    fn pitch_wraps_at_360() {
        let input = InputState {
            look_up_rate: 1.0,
            ..Default::default()
        };
        let pitch = integrate_pitch(359.0, input, 1.0);
        assert!(pitch < 360.0);
    }
}
