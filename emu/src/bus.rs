//! I/O register map and the cycle bookkeeping of the current batch.
//!
//! The CPU runs in batches. While it executes it adds the cycles it spends
//! with [`Bus::add_cycles`] and keeps going until [`Bus::cycles`] reaches
//! [`Bus::next_event`]. Then [`Bus::process_events`] hands the elapsed cycles
//! to the peripherals (timers first, then serial) and asks them how long the
//! next batch may be.
use crate::bitwise::Bits;
use crate::hardware::HardwareComponent;
use crate::hardware::interrupt_control::InterruptControl;
use crate::hardware::serial::{Serial, SerialError, SioDriver, SioMode, SioRegister};
use crate::hardware::timers::Timers;

/// Longest batch the CPU may run, even with nothing scheduled.
pub const MAX_BATCH: i32 = 0x1_0000;

#[derive(Default)]
pub struct Bus {
    interrupt_control: InterruptControl,
    timers: Timers,
    serial: Serial,
    /// Cycles spent since the last event dispatch.
    cycles: i32,
    /// Cycles from the last event dispatch to the next one.
    next_event: i32,
    /// Cycles dispatched since power-on.
    elapsed: u64,
}

impl Bus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn cycles(&self) -> i32 {
        self.cycles
    }

    #[must_use]
    pub const fn next_event(&self) -> i32 {
        self.next_event
    }

    #[must_use]
    pub const fn elapsed(&self) -> u64 {
        self.elapsed
    }

    pub const fn add_cycles(&mut self, cycles: i32) {
        self.cycles += cycles;
    }

    /// Used while halted: nothing happens before the next event anyway.
    pub const fn skip_to_next_event(&mut self) {
        if self.cycles < self.next_event {
            self.cycles = self.next_event;
        }
    }

    #[must_use]
    pub const fn interrupt_control(&self) -> &InterruptControl {
        &self.interrupt_control
    }

    pub const fn interrupt_control_mut(&mut self) -> &mut InterruptControl {
        &mut self.interrupt_control
    }

    #[must_use]
    pub const fn timers(&self) -> &Timers {
        &self.timers
    }

    #[must_use]
    pub const fn serial(&self) -> &Serial {
        &self.serial
    }

    /// Dispatches the cycles spent so far to the peripherals and recomputes
    /// the distance to the next event. Returns the dispatched cycles.
    pub fn process_events(&mut self) -> i32 {
        let cycles = self.cycles;
        self.cycles = 0;
        self.elapsed += u64::try_from(cycles).unwrap_or_default();

        let timers = self
            .timers
            .process_events(cycles, &mut self.interrupt_control);
        let serial = self
            .serial
            .process_events(cycles, &mut self.interrupt_control);

        self.next_event = timers.min(serial).min(MAX_BATCH);
        cycles
    }

    /// Installs `driver` for `mode`, see [`Serial::install_driver`].
    ///
    /// # Errors
    /// When the mode has no driver slot or the driver fails to initialize.
    pub fn install_driver(
        &mut self,
        driver: Box<dyn SioDriver>,
        mode: SioMode,
    ) -> Result<(), SerialError> {
        self.process_events();
        let result = self
            .serial
            .install_driver(driver, mode, &mut self.interrupt_control);
        self.process_events();
        result
    }

    fn read_timers(&self, address: usize) -> u16 {
        let channel = (address - 0x0400_0100) / 4;
        if address & 2 == 0 {
            self.timers.read_counter(channel, self.cycles)
        } else {
            self.timers.read_control(channel)
        }
    }

    fn write_timers(&mut self, address: usize, value: u16) {
        let channel = (address - 0x0400_0100) / 4;
        if address & 2 == 0 {
            self.timers.write_reload(channel, value);
        } else {
            let next = self.timers.write_control(channel, value, self.cycles);
            if next < self.next_event {
                self.next_event = next;
            }
        }
    }

    fn read_serial(&mut self, address: usize) -> u16 {
        match address {
            0x0400_0150 => return self.serial.read_joy_recv().get_bits(0..=15) as u16,
            0x0400_0152 => return self.serial.read_joy_recv().get_bits(16..=31) as u16,
            _ => {}
        }

        let registers = self.serial.registers();
        match address {
            0x0400_0120..=0x0400_0126 => registers.multi_data[(address - 0x0400_0120) / 2],
            0x0400_0128 => registers.siocnt,
            0x0400_012A => registers.mlt_send,
            0x0400_0134 => registers.rcnt,
            0x0400_0140 => registers.joycnt,
            0x0400_0154 => registers.joy_trans.get_bits(0..=15) as u16,
            0x0400_0156 => registers.joy_trans.get_bits(16..=31) as u16,
            0x0400_0158 => registers.joystat,
            _ => Self::read_unused(address),
        }
    }

    fn write_serial(&mut self, address: usize, value: u16) {
        let register = match address {
            0x0400_0128 => SioRegister::Siocnt,
            0x0400_012A => SioRegister::MltSend,
            0x0400_0134 => SioRegister::Rcnt,
            0x0400_0140 => SioRegister::JoyCnt,
            0x0400_0150 => SioRegister::JoyRecvLo,
            0x0400_0152 => SioRegister::JoyRecvHi,
            0x0400_0154 => SioRegister::JoyTransLo,
            0x0400_0156 => SioRegister::JoyTransHi,
            0x0400_0158 => SioRegister::JoyStat,
            _ => {
                Self::write_unused(address, value);
                return;
            }
        };

        // A driver schedules relative to the moment of the write, so the
        // peripherals are brought up to it first.
        self.process_events();
        self.serial
            .write_register(register, value, &mut self.interrupt_control);
        self.process_events();
    }

    fn read_interrupt_control(&self, address: usize) -> u16 {
        match address {
            0x0400_0200 => self.interrupt_control.interrupt_enable(),
            0x0400_0202 => self.interrupt_control.interrupt_request(),
            0x0400_0208 => self.interrupt_control.interrupt_master_enable(),
            _ => Self::read_unused(address),
        }
    }

    fn write_interrupt_control(&mut self, address: usize, value: u16) {
        match address {
            0x0400_0200 => self.interrupt_control.write_interrupt_enable(value),
            0x0400_0202 => self.interrupt_control.acknowledge(value),
            0x0400_0208 => self.interrupt_control.write_master_enable(value),
            // POSTFLG in the low byte, HALTCNT in the high one.
            0x0400_0300 => {
                if value.get_bit(15) {
                    tracing::debug!("stop mode requested, not emulated");
                } else {
                    self.interrupt_control.halt();
                }
            }
            _ => Self::write_unused(address, value),
        }
    }

    fn read_unused(address: usize) -> u16 {
        tracing::debug!("read on unused memory {address:#010X}");
        0
    }

    fn write_unused(address: usize, value: u16) {
        tracing::debug!("write on unused memory {address:#010X} ({value:#06X})");
    }

    #[must_use]
    pub fn read_half_word(&mut self, address: usize) -> u16 {
        if address & 1 != 0 {
            tracing::warn!("read_half_word has address not half-word aligned: {address:#010X}");
        }
        let address = address & !1;

        match address {
            0x0400_0100..=0x0400_010E => self.read_timers(address),
            0x0400_0120..=0x0400_012A | 0x0400_0134 | 0x0400_0140..=0x0400_0158 => {
                self.read_serial(address)
            }
            0x0400_0200..=0x0400_0300 => self.read_interrupt_control(address),
            _ => Self::read_unused(address),
        }
    }

    pub fn write_half_word(&mut self, address: usize, value: u16) {
        if address & 1 != 0 {
            tracing::warn!("write_half_word has address not half-word aligned: {address:#010X}");
        }
        let address = address & !1;

        match address {
            0x0400_0100..=0x0400_010E => self.write_timers(address, value),
            0x0400_0120..=0x0400_012A | 0x0400_0134 | 0x0400_0140..=0x0400_0158 => {
                self.write_serial(address, value);
            }
            0x0400_0200..=0x0400_0300 => self.write_interrupt_control(address, value),
            _ => Self::write_unused(address, value),
        }
    }

    #[must_use]
    pub fn read_word(&mut self, address: usize) -> u32 {
        let low = u32::from(self.read_half_word(address));
        let high = u32::from(self.read_half_word(address + 2));
        (high << 16) | low
    }

    /// Low half first, the way the hardware splits a 32-bit store to 16-bit
    /// registers.
    pub fn write_word(&mut self, address: usize, value: u32) {
        self.write_half_word(address, value.get_bits(0..=15) as u16);
        self.write_half_word(address + 2, value.get_bits(16..=31) as u16);
    }
}
