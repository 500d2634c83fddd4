//! Debounced parachute deployment triggers.
//!
//! Two state machines watch the filtered navigation state. The drogue trigger
//! arms at apogee: it requires the estimate to show positive down velocity
//! *and* decreasing altitude, each continuously for a full debounce window,
//! before it fires. The main trigger fires low: once the vehicle is under the
//! main-deployment altitude and still descending for its (much shorter)
//! window, the main charge goes.
//!
//! Both triggers latch after firing; a charge cannot fire twice. Timekeeping
//! is caller-supplied monotonic milliseconds, so the machines are trivially
//! replayable from logs.

use crate::NavState;

/// Debounce window for both drogue conditions, milliseconds.
pub const DROGUE_DEBOUNCE_MS: u64 = 3000;
/// Altitude below which the main trigger arms (1000 ft), meters.
pub const MAIN_DEPLOY_ALTITUDE_M: f32 = 304.8;
/// Debounce window for the main trigger, milliseconds.
pub const MAIN_DEBOUNCE_MS: u64 = 250;

/// Drogue trigger: descent debounce at apogee.
///
/// Two independent timers must both run out: one tracking positive down
/// velocity, one tracking sample-to-sample altitude decrease. Either
/// condition lapsing resets its own timer only, so a noisy altitude channel
/// cannot be rescued by a clean velocity channel or vice versa.
#[derive(Debug, Default)]
pub struct DrogueTrigger {
    descending_since: Option<u64>,
    altitude_dropping_since: Option<u64>,
    previous_altitude: Option<f32>,
    fired: bool,
}

impl DrogueTrigger {
    pub fn new() -> DrogueTrigger {
        DrogueTrigger::default()
    }

    /// Whether the drogue charge has fired.
    pub fn deployed(&self) -> bool {
        self.fired
    }

    /// Advance the debounce machine one sample. Returns `true` exactly once,
    /// on the sample that fires the charge.
    pub fn check(&mut self, now_ms: u64, velocity_down: f32, altitude: f32) -> bool {
        if self.fired {
            return false;
        }

        if velocity_down > 0.0 {
            self.descending_since.get_or_insert(now_ms);
        } else {
            self.descending_since = None;
        }

        match self.previous_altitude {
            Some(previous) if altitude < previous => {
                self.altitude_dropping_since.get_or_insert(now_ms);
            }
            Some(_) => self.altitude_dropping_since = None,
            // First sample: no altitude history yet.
            None => {}
        }
        self.previous_altitude = Some(altitude);

        let descending = self
            .descending_since
            .is_some_and(|since| now_ms - since >= DROGUE_DEBOUNCE_MS);
        let dropping = self
            .altitude_dropping_since
            .is_some_and(|since| now_ms - since >= DROGUE_DEBOUNCE_MS);

        if descending && dropping {
            self.fired = true;
            log::info!("drogue deployment at {altitude:.1} m, vd {velocity_down:.1} m/s");
        }
        self.fired
    }
}

/// Main trigger: low-altitude descent debounce.
#[derive(Debug, Default)]
pub struct MainTrigger {
    below_since: Option<u64>,
    fired: bool,
}

impl MainTrigger {
    pub fn new() -> MainTrigger {
        MainTrigger::default()
    }

    /// Whether the main charge has fired.
    pub fn deployed(&self) -> bool {
        self.fired
    }

    /// Advance the debounce machine one sample. Returns `true` exactly once,
    /// on the sample that fires the charge.
    ///
    /// Climbing (negative down velocity) resets the timer outright; the
    /// vehicle going back up under the deployment floor means the descent
    /// estimate is not trustworthy yet. The fire itself additionally requires
    /// positive down velocity at the moment of evaluation.
    pub fn check(&mut self, now_ms: u64, velocity_down: f32, altitude: f32) -> bool {
        if self.fired {
            return false;
        }

        if velocity_down < 0.0 {
            self.below_since = None;
            return false;
        }

        if altitude <= MAIN_DEPLOY_ALTITUDE_M {
            self.below_since.get_or_insert(now_ms);
        } else {
            self.below_since = None;
        }

        let armed = self
            .below_since
            .is_some_and(|since| now_ms - since >= MAIN_DEBOUNCE_MS);
        if armed && velocity_down > 0.0 {
            self.fired = true;
            log::info!("main deployment at {altitude:.1} m, vd {velocity_down:.1} m/s");
        }
        self.fired
    }
}

/// Deployment commands produced by one recovery check.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeploymentCommand {
    /// Fire the drogue charge this cycle.
    pub fire_drogue: bool,
    /// Fire the main charge this cycle.
    pub fire_main: bool,
}

/// Both recovery triggers, checked against the filtered state each cycle.
#[derive(Debug, Default)]
pub struct RecoverySystem {
    drogue: DrogueTrigger,
    main: MainTrigger,
}

impl RecoverySystem {
    pub fn new() -> RecoverySystem {
        RecoverySystem::default()
    }

    /// Check both triggers against the current state estimate.
    pub fn check(&mut self, now_ms: u64, state: &NavState) -> DeploymentCommand {
        let velocity_down = state.velocity_down();
        let altitude = state.altitude();
        DeploymentCommand {
            fire_drogue: self.drogue.check(now_ms, velocity_down, altitude),
            fire_main: self.main.check(now_ms, velocity_down, altitude),
        }
    }

    pub fn drogue_deployed(&self) -> bool {
        self.drogue.deployed()
    }
    pub fn main_deployed(&self) -> bool {
        self.main.deployed()
    }
}

// === Unit tests ===
#[cfg(test)]
mod tests {
    use super::*;

    /// Walk a trigger through (time, vd, altitude) samples, returning the
    /// time of the firing sample if any.
    fn run_drogue(samples: &[(u64, f32, f32)]) -> Option<u64> {
        let mut trigger = DrogueTrigger::new();
        for &(t, vd, alt) in samples {
            if trigger.check(t, vd, alt) {
                return Some(t);
            }
        }
        None
    }

    fn descending_samples(count: u64, step_ms: u64) -> Vec<(u64, f32, f32)> {
        (0..count)
            .map(|i| (i * step_ms, 20.0, 3000.0 - i as f32 * 2.0))
            .collect()
    }

    #[test]
    fn drogue_fires_after_debounce() {
        // 100 ms cadence, steady descent: both windows close at 3000 ms past
        // the first sample that starts the timers.
        let samples = descending_samples(40, 100);
        let fired_at = run_drogue(&samples);
        // Altitude-decrease timer starts at the second sample (needs one
        // sample of history), so the fire lands at 100 + 3000 ms.
        assert_eq!(fired_at, Some(3100));
    }

    #[test]
    fn drogue_needs_both_conditions() {
        // Positive down velocity but altitude climbing: never fires.
        let climbing: Vec<(u64, f32, f32)> = (0..60)
            .map(|i| (i * 100, 5.0, 3000.0 + i as f32))
            .collect();
        assert_eq!(run_drogue(&climbing), None);

        // Altitude dropping but velocity estimate still negative: never fires.
        let upward_vel: Vec<(u64, f32, f32)> = (0..60)
            .map(|i| (i * 100, -5.0, 3000.0 - i as f32))
            .collect();
        assert_eq!(run_drogue(&upward_vel), None);
    }

    #[test]
    fn drogue_resets_on_condition_lapse() {
        let mut samples = descending_samples(25, 100);
        // A single climbing sample at 2.0 s resets the altitude timer.
        samples[20].2 = samples[19].2 + 5.0;
        assert_eq!(run_drogue(&samples), None);

        // With the run extended, the timer restarts after the glitch and the
        // fire comes a full window after it.
        let mut samples = descending_samples(60, 100);
        samples[20].2 = samples[19].2 + 5.0;
        // Rebuild decreasing altitudes after the glitch.
        for i in 21..60 {
            samples[i].2 = samples[20].2 - (i as f32 - 20.0) * 2.0;
        }
        let fired_at = run_drogue(&samples).expect("should fire after reset");
        assert!(fired_at >= 2100 + 3000, "fired at {fired_at}");
    }

    #[test]
    fn drogue_fires_once_and_latches() {
        let mut trigger = DrogueTrigger::new();
        let samples = descending_samples(60, 100);
        let mut fires = 0;
        for &(t, vd, alt) in &samples {
            if trigger.check(t, vd, alt) {
                fires += 1;
            }
        }
        assert_eq!(fires, 1);
        assert!(trigger.deployed());
    }

    #[test]
    fn main_fires_below_deploy_altitude() {
        let mut trigger = MainTrigger::new();
        // Descending through the floor at 100 ms cadence.
        let mut fired_at = None;
        for i in 0..20u64 {
            let alt = 320.0 - i as f32 * 5.0;
            if trigger.check(i * 100, 25.0, alt) && fired_at.is_none() {
                fired_at = Some(i * 100);
            }
        }
        // Crosses 304.8 m at i=4 (300.0 m); debounce closes 250 ms later.
        assert_eq!(fired_at, Some(700));
    }

    #[test]
    fn main_holds_above_deploy_altitude() {
        let mut trigger = MainTrigger::new();
        for i in 0..100u64 {
            assert!(!trigger.check(i * 100, 25.0, 400.0));
        }
        assert!(!trigger.deployed());
    }

    #[test]
    fn main_resets_when_climbing() {
        let mut trigger = MainTrigger::new();
        // Below the floor but vd flips negative right before the window
        // closes; the timer must restart.
        assert!(!trigger.check(0, 10.0, 250.0));
        assert!(!trigger.check(200, -1.0, 250.0));
        assert!(!trigger.check(300, 10.0, 250.0));
        assert!(!trigger.check(400, 10.0, 250.0));
        // Window restarted at 300 ms: closes at 550 ms.
        assert!(trigger.check(600, 10.0, 250.0));
    }

    #[test]
    fn main_requires_descent_at_evaluation() {
        let mut trigger = MainTrigger::new();
        assert!(!trigger.check(0, 10.0, 200.0));
        // Timer has run out, but vd is exactly zero at evaluation: no fire.
        assert!(!trigger.check(300, 0.0, 200.0));
        assert!(trigger.check(400, 1.0, 200.0));
    }

    #[test]
    fn recovery_system_sequences_drogue_then_main() {
        let mut recovery = RecoverySystem::new();
        let mut state = crate::NavState::default();
        let mut drogue_at = None;
        let mut main_at = None;

        // Ballistic descent from 3 km at 40 m/s, 50 ms cadence.
        let mut altitude = 3000.0_f32;
        for i in 0..4000u64 {
            let now = i * 50;
            altitude -= 2.0;
            if altitude < 0.0 {
                break;
            }
            state.position[2] = altitude;
            state.velocity[2] = 40.0;
            let command = recovery.check(now, &state);
            if command.fire_drogue {
                drogue_at = Some(now);
            }
            if command.fire_main {
                main_at = Some(now);
            }
        }

        let drogue_at = drogue_at.expect("drogue should fire");
        let main_at = main_at.expect("main should fire");
        assert!(drogue_at < main_at, "drogue {drogue_at} main {main_at}");
        assert!(recovery.drogue_deployed());
        assert!(recovery.main_deployed());
    }
}
