//! PID control signal computation for the go-to-position loop.
//!
//! Grounded on `original_source/TurnTableController.py`'s `gotoPosition`
//! method. Unlike a textbook PID, the integral term here is not an
//! accumulator carried across iterations — each cycle computes
//! `ki * error * dt` fresh from the instantaneous error, and only the
//! previous error is carried for the derivative term. This is
//! reproduced faithfully rather than "corrected" into a true integral,
//! since the go-to-position loop is tuned against this exact shape.

use turntable_common::math::clamp_sort_of_three;

/// Gains and bounds for one go-to-position run.
#[derive(Debug, Clone, Copy)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    /// Symmetric voltage bound the raw control signal is clamped into.
    pub max_voltage: f64,
    /// Minimum magnitude imposed on a nonzero control signal, so the
    /// motor never stalls on a command too small to move it.
    pub min_control: f64,
}

/// Carries the previous cycle's error for the derivative term.
#[derive(Debug, Clone, Copy, Default)]
pub struct PidState {
    previous_error: f64,
}

impl PidState {
    /// Reset to a fresh run (previous error zero), matching
    /// `gotoPosition`'s `previousError = 0` at the start of each job.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Compute one cycle's voltage control signal and advance `state`.
///
/// `dt` is the loop's update period in seconds; a non-positive `dt`
/// produces zero rather than dividing by it.
#[must_use]
pub fn pid_compute(state: &mut PidState, gains: &PidGains, error: f64, dt: f64) -> f64 {
    if dt <= 0.0 {
        return 0.0;
    }

    let error_delta = error - state.previous_error;
    state.previous_error = error;

    let raw = gains.kp * error + gains.ki * error * dt + gains.kd * error_delta / dt;
    let clamped = clamp_sort_of_three(-gains.max_voltage, raw, gains.max_voltage);
    f64::copysign(clamped.abs().max(gains.min_control), clamped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gains(kp: f64, ki: f64, kd: f64) -> PidGains {
        PidGains {
            kp,
            ki,
            kd,
            max_voltage: 7.0,
            min_control: 1.2,
        }
    }

    #[test]
    fn pure_proportional_respects_min_control_floor() {
        let mut state = PidState::default();
        let out = pid_compute(&mut state, &gains(0.5, 0.0, 0.0), 1.0, 0.05);
        // raw = 0.5, floored up to min_control = 1.2
        assert!((out - 1.2).abs() < 1e-9);
    }

    #[test]
    fn large_proportional_term_clamps_to_max_voltage() {
        let mut state = PidState::default();
        let out = pid_compute(&mut state, &gains(100.0, 0.0, 0.0), 1.0, 0.05);
        assert!((out - 7.0).abs() < 1e-9);
    }

    #[test]
    fn negative_error_produces_negative_signal() {
        let mut state = PidState::default();
        let out = pid_compute(&mut state, &gains(100.0, 0.0, 0.0), -1.0, 0.05);
        assert!((out - (-7.0)).abs() < 1e-9);
    }

    #[test]
    fn derivative_term_uses_previous_error() {
        let mut state = PidState::default();
        let g = gains(0.0, 0.0, 1.0);
        // first cycle: error jumps from implicit 0 to 2.0
        let first = pid_compute(&mut state, &g, 2.0, 0.1);
        // errorDelta = 2.0 - 0.0 = 2.0, raw = kd * delta / dt = 1.0 * 2.0 / 0.1 = 20.0, clamped to max_voltage=7
        assert!((first - 7.0).abs() < 1e-9);

        // second cycle: error unchanged -> delta = 0 -> raw = 0 -> floored to min_control with sign 0
        let second = pid_compute(&mut state, &g, 2.0, 0.1);
        assert!((second - 1.2).abs() < 1e-9);
    }

    #[test]
    fn zero_or_negative_dt_yields_zero() {
        let mut state = PidState::default();
        assert_eq!(pid_compute(&mut state, &gains(1.0, 1.0, 1.0), 5.0, 0.0), 0.0);
        assert_eq!(pid_compute(&mut state, &gains(1.0, 1.0, 1.0), 5.0, -0.1), 0.0);
    }

    #[test]
    fn reset_clears_previous_error() {
        let mut state = PidState::default();
        pid_compute(&mut state, &gains(0.0, 0.0, 1.0), 5.0, 0.1);
        state.reset();
        let out = pid_compute(&mut state, &gains(0.0, 0.0, 1.0), 5.0, 0.1);
        // delta should again be computed against 0, i.e. identical to a fresh run
        assert!((out - 7.0).abs() < 1e-9);
    }
}
