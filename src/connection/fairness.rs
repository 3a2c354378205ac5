//! Fairness between control and data frames in the writer.
//!
//! Control frames are drained first so keepalives and credit grants stay
//! responsive under payload pressure, but a bounded burst limit forces a
//! data frame through after enough consecutive control frames.

/// Number of consecutive control frames before the data queue is offered
/// a turn. Zero preserves strict control-first ordering.
#[derive(Clone, Copy, Debug)]
pub(crate) struct FairnessConfig {
    pub max_control_before_data: usize,
}

impl Default for FairnessConfig {
    fn default() -> Self {
        Self {
            max_control_before_data: 8,
        }
    }
}

#[derive(Debug)]
pub(crate) struct FairnessTracker {
    config: FairnessConfig,
    control_counter: usize,
}

impl FairnessTracker {
    pub fn new(config: FairnessConfig) -> Self {
        Self {
            config,
            control_counter: 0,
        }
    }

    pub fn after_control(&mut self) { self.control_counter += 1; }

    pub fn after_data(&mut self) { self.reset(); }

    pub fn should_yield(&self) -> bool {
        self.config.max_control_before_data > 0
            && self.control_counter >= self.config.max_control_before_data
    }

    pub fn reset(&mut self) { self.control_counter = 0; }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yields_after_the_configured_burst() {
        let mut fairness = FairnessTracker::new(FairnessConfig {
            max_control_before_data: 2,
        });
        fairness.after_control();
        assert!(!fairness.should_yield());
        fairness.after_control();
        assert!(fairness.should_yield());
        fairness.after_data();
        assert!(!fairness.should_yield());
    }

    #[test]
    fn zero_threshold_never_yields() {
        let mut fairness = FairnessTracker::new(FairnessConfig {
            max_control_before_data: 0,
        });
        for _ in 0..32 {
            fairness.after_control();
        }
        assert!(!fairness.should_yield());
    }
}
