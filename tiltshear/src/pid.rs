use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl Default for PidGains {
    fn default() -> Self {
        Self {
            kp: 1.0,
            ki: 0.0,
            kd: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntegralLimits {
    pub min: f64,
    pub max: f64,
}

impl Default for IntegralLimits {
    fn default() -> Self {
        Self {
            min: -1e12,
            max: 1e12,
        }
    }
}

/// Discrete PID controller for one mirror axis.
#[derive(Debug, Clone, PartialEq)]
pub struct PidController {
    gains: PidGains,
    limits: IntegralLimits,
    integral: f64,
    previous_error: f64,
    output: f64,
}

impl Default for PidController {
    fn default() -> Self {
        Self::new(PidGains::default(), IntegralLimits::default())
    }
}

impl PidController {
    pub fn new(gains: PidGains, limits: IntegralLimits) -> Self {
        Self {
            gains,
            limits,
            integral: 0.0,
            previous_error: 0.0,
            output: 0.0,
        }
    }

    pub fn update(&mut self, setpoint: f64, measured: f64) -> f64 {
        let error = setpoint - measured;

        self.integral = (self.integral + error).clamp(self.limits.min, self.limits.max);

        self.output = self.gains.kp * error + self.gains.ki * self.integral
            - self.gains.kd * (self.previous_error - error);
        self.previous_error = error;

        self.output
    }

    pub fn set_gains(&mut self, gains: PidGains) {
        self.gains = gains;
    }

    pub fn gains(&self) -> PidGains {
        self.gains
    }

    pub fn integral(&self) -> f64 {
        self.integral
    }

    pub fn output(&self) -> f64 {
        self.output
    }

    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.previous_error = 0.0;
        self.output = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_gains_pass_error_through() {
        let mut pid = PidController::default();

        for measured in [0.25, 0.25, -3.5, 1e-6] {
            assert_eq!(pid.update(0.0, measured), -measured);
        }
        assert_eq!(pid.update(2.0, 0.5), 1.5);
        assert_eq!(pid.update(2.0, 0.5), 1.5);
    }

    #[test]
    fn integral_is_clamped() {
        let limits = IntegralLimits { min: -5.0, max: 5.0 };
        let mut pid = PidController::new(
            PidGains {
                kp: 0.0,
                ki: 1.0,
                kd: 0.0,
            },
            limits,
        );

        for _ in 0..100 {
            pid.update(10.0, 0.0);
            assert!(pid.integral() <= limits.max);
        }
        assert_eq!(pid.output(), 5.0);

        for _ in 0..100 {
            pid.update(-10.0, 0.0);
            assert!(pid.integral() >= limits.min);
        }
        assert_eq!(pid.integral(), -5.0);
    }

    #[test]
    fn derivative_uses_previous_error() {
        let mut pid = PidController::new(
            PidGains {
                kp: 0.0,
                ki: 0.0,
                kd: 2.0,
            },
            IntegralLimits::default(),
        );

        assert_eq!(pid.update(1.0, 0.0), 2.0);
        assert_eq!(pid.update(3.0, 0.0), 4.0);
    }

    #[test]
    fn reset_clears_state() {
        let mut pid = PidController::new(
            PidGains {
                kp: 1.0,
                ki: 1.0,
                kd: 0.0,
            },
            IntegralLimits::default(),
        );
        pid.update(4.0, 0.0);
        pid.reset();
        assert_eq!(pid.integral(), 0.0);
        assert_eq!(pid.update(1.0, 0.0), 2.0);
    }
}
