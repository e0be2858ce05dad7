use crate::bus::Bus;
use crate::hardware::serial::{SerialError, SioDriver, SioMode};

/// The processor driving the machine. Instruction decoding lives outside
/// this crate; the machine only needs a way to run a batch and to deliver an
/// interrupt.
pub trait Cpu {
    /// Runs until `bus.cycles()` reaches `bus.next_event()`, adding the
    /// cycles it spends with [`Bus::add_cycles`]. May stop early to take a
    /// pending interrupt at the next step.
    fn execute(&mut self, bus: &mut Bus);

    /// Enters the interrupt sequence. Called before a batch whenever an
    /// enabled interrupt is pending and IME is set.
    fn raise_irq(&mut self);
}

/// A console: the I/O bus with its peripherals and the step loop around an
/// external [`Cpu`]. Dropping it releases the installed serial drivers.
///
/// ```
/// use emu::bus::Bus;
/// use emu::gba::{Cpu, Gba};
///
/// struct Idle;
///
/// impl Cpu for Idle {
///     fn execute(&mut self, bus: &mut Bus) {
///         bus.add_cycles(bus.next_event() - bus.cycles());
///     }
///
///     fn raise_irq(&mut self) {}
/// }
///
/// let mut gba = Gba::new();
/// // Timer 0 overflows every 256 cycles and raises its interrupt.
/// gba.bus_mut().write_half_word(0x0400_0100, 0xFF00);
/// gba.bus_mut().write_half_word(0x0400_0102, 0x00C0);
///
/// gba.run_for(&mut Idle, 256);
///
/// assert_eq!(gba.bus().interrupt_control().interrupt_request(), 1 << 3);
/// ```
#[derive(Default)]
pub struct Gba {
    bus: Bus,
}

impl Gba {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn bus(&self) -> &Bus {
        &self.bus
    }

    pub const fn bus_mut(&mut self) -> &mut Bus {
        &mut self.bus
    }

    /// Cycles run since power-on.
    #[must_use]
    pub const fn cycles(&self) -> u64 {
        self.bus.elapsed()
    }

    /// # Errors
    /// See [`Bus::install_driver`].
    pub fn install_driver(
        &mut self,
        driver: Box<dyn SioDriver>,
        mode: SioMode,
    ) -> Result<(), SerialError> {
        self.bus.install_driver(driver, mode)
    }

    /// One batch: interrupt check, CPU (or the halted wait), then the events
    /// that came due. Returns the cycles that passed.
    pub fn step(&mut self, cpu: &mut impl Cpu) -> i32 {
        if self.bus.interrupt_control().test() {
            cpu.raise_irq();
        }

        if self.bus.interrupt_control().is_halted() {
            self.bus.skip_to_next_event();
        } else {
            cpu.execute(&mut self.bus);
        }

        self.bus.process_events()
    }

    /// Steps until at least `cycles` cycles have passed.
    pub fn run_for(&mut self, cpu: &mut impl Cpu, cycles: u64) {
        let target = self.cycles() + cycles;
        while self.cycles() < target {
            self.step(cpu);
        }
    }
}
