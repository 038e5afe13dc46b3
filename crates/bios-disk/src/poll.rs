//! Bounded busy-wait polling.
//!
//! Every wait on hardware state goes through a [`PollBudget`]. Exhausting the budget yields
//! [`DriverError::Timeout`] tagged with the condition that never became true, so a wedged device
//! can never hang the firmware.

use crate::error::{DriverError, WaitFor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    iterations: u32,
}

impl PollBudget {
    pub const fn new(iterations: u32) -> Self {
        Self { iterations }
    }

    pub const fn iterations(self) -> u32 {
        self.iterations
    }

    /// Run `step` until it yields a value, fails, or the budget runs out.
    ///
    /// `step` is always evaluated at least once, even with a zero budget.
    pub fn poll<T>(
        self,
        what: WaitFor,
        mut step: impl FnMut() -> Result<Option<T>, DriverError>,
    ) -> Result<T, DriverError> {
        for _ in 0..self.iterations.max(1) {
            if let Some(v) = step()? {
                return Ok(v);
            }
            std::hint::spin_loop();
        }
        Err(DriverError::Timeout(what))
    }

    /// Wait until `cond` holds.
    pub fn wait_until(
        self,
        what: WaitFor,
        mut cond: impl FnMut() -> bool,
    ) -> Result<(), DriverError> {
        self.poll(what, || Ok(cond().then_some(())))
    }
}
