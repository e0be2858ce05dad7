use crate::hardware::NEVER;
use crate::hardware::interrupt_control::{InterruptControl, Irq};

use super::{SerialRegisters, SioRegister};

/// What the serial controller lends a driver for the duration of one hook:
/// the shared register file and the SIO interrupt line.
pub struct SioContext<'a> {
    pub registers: &'a mut SerialRegisters,
    interrupts: &'a mut InterruptControl,
}

impl<'a> SioContext<'a> {
    pub(crate) const fn new(
        registers: &'a mut SerialRegisters,
        interrupts: &'a mut InterruptControl,
    ) -> Self {
        Self {
            registers,
            interrupts,
        }
    }

    /// Signals the end of a transfer to the CPU.
    pub fn raise_irq(&mut self) {
        self.interrupts.raise(Irq::Serial);
    }
}

/// A link-cable protocol engine, installed into the serial controller for
/// one mode.
///
/// Every hook has a default that does nothing, so a driver only implements
/// what its protocol needs.
///
/// Lifecycle: `init` once when installed, `load`/`unload` each time the
/// controller enters/leaves the driver's mode, `deinit` once when the driver
/// is replaced or the machine goes away.
pub trait SioDriver: Send {
    /// Called on installation. An error aborts the installation.
    ///
    /// # Errors
    /// The reason the driver cannot be used.
    fn init(&mut self, _context: &mut SioContext<'_>) -> Result<(), String> {
        Ok(())
    }

    fn deinit(&mut self) {}

    fn load(&mut self, _context: &mut SioContext<'_>) {}

    fn unload(&mut self, _context: &mut SioContext<'_>) {}

    /// A register write that reached the driver. RCNT and SIOCNT are already
    /// stored in `context.registers` when this runs.
    fn write_register(
        &mut self,
        _context: &mut SioContext<'_>,
        _register: SioRegister,
        _value: u16,
    ) {
    }

    /// Catches up `cycles` elapsed cycles and returns the distance to the
    /// driver's next event.
    fn process_events(&mut self, _context: &mut SioContext<'_>, _cycles: i32) -> i32 {
        NEVER
    }
}
