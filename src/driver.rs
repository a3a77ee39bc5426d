use crate::options::DriverOptions;
use crate::qn::QnUpdate;
use crate::samples::SampleUpdate;

/// Specifies how a simulation is driven.
///
/// The sample update, the QN update and the preliminary secant flag are fixed
/// at construction. Only the owned [`DriverOptions`] may change between runs.
#[derive(Debug, Clone, PartialEq)]
pub struct Driver {
    sample_update: SampleUpdate,
    qn_update: QnUpdate,
    pflag: bool,
    options: DriverOptions,
}

impl Default for Driver {
    fn default() -> Self {
        Self::new(SampleUpdate::C, QnUpdate::Sr1, false)
    }
}

impl Driver {
    /// Creates a driver with default options.
    ///
    /// # Arguments
    /// * `sample_update` - Supplemental sample direction strategy.
    /// * `qn_update` - Block QN update formula.
    /// * `pflag` - Apply a single-secant update along the last accepted step before each block update.
    pub fn new(sample_update: SampleUpdate, qn_update: QnUpdate, pflag: bool) -> Self {
        Self {
            sample_update,
            qn_update,
            pflag,
            options: DriverOptions::default(),
        }
    }

    /// Replaces the options wholesale.
    pub fn with_options(mut self, options: DriverOptions) -> Self {
        self.options = options;
        self
    }

    pub fn sample_update(&self) -> SampleUpdate {
        self.sample_update
    }

    pub fn qn_update(&self) -> QnUpdate {
        self.qn_update
    }

    /// The preliminary secant QN update flag.
    pub fn pflag(&self) -> bool {
        self.pflag
    }

    pub fn options(&self) -> &DriverOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut DriverOptions {
        &mut self.options
    }
}
