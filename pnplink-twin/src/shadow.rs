/// Temperature the device starts from before any update arrives
pub const DEFAULT_TEMPERATURE: f64 = 22.0;

/// Device side copy of the tracked temperature and its statistics since boot
///
/// The initial value counts as a reading, so the running average starts
/// with a count of one and every applied update is averaged in on top of it.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceShadow {
    current: f64,
    maximum: f64,
    minimum: f64,
    sum: f64,
    average: f64,
    count: u64,
}

impl Default for DeviceShadow {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPERATURE)
    }
}

impl DeviceShadow {
    pub fn new(initial: f64) -> Self {
        Self {
            current: initial,
            maximum: initial,
            minimum: initial,
            sum: initial,
            average: initial,
            count: 1,
        }
    }

    /// Record a new target temperature
    ///
    /// Returns `true` if the value raised the maximum since boot.
    pub fn apply(&mut self, value: f64) -> bool {
        self.current = value;

        let raised = value > self.maximum;
        if raised {
            self.maximum = value;
        } else if value < self.minimum {
            self.minimum = value;
        }

        self.count += 1;
        self.sum += value;
        self.average = self.sum / self.count as f64;

        raised
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    pub fn maximum(&self) -> f64 {
        self.maximum
    }

    pub fn minimum(&self) -> f64 {
        self.minimum
    }

    pub fn average(&self) -> f64 {
        self.average
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}
