//! Interrupt controller (IE / IF / IME).
//!
//! Every peripheral raises its line through [`InterruptControl::raise`]; the
//! CPU polls [`InterruptControl::test`] once per step to decide whether to
//! enter the IRQ exception. A raised line stays pending in IF until the CPU
//! acknowledges it, so enabling a line after it fired still delivers it.
//!
//! ```text
//!  15 14 13 12 11 10  9  8  7  6  5  4  3  2  1  0
//! ┌──┬──┬──┬──┬──┬──┬──┬──┬──┬──┬──┬──┬──┬──┬──┬──┐
//! │ -│ -│GP│KP│D3│D2│D1│D0│SI│T3│T2│T1│T0│VC│HB│VB│
//! └──┴──┴──┴──┴──┴──┴──┴──┴──┴──┴──┴──┴──┴──┴──┴──┘
//! ```
use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;

/// Interrupt lines, the discriminant is the bit index in IE and IF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Irq {
    VBlank = 0,
    HBlank = 1,
    VCounter = 2,
    Timer0 = 3,
    Timer1 = 4,
    Timer2 = 5,
    Timer3 = 6,
    Serial = 7,
    Dma0 = 8,
    Dma1 = 9,
    Dma2 = 10,
    Dma3 = 11,
    Keypad = 12,
    GamePak = 13,
}

impl Irq {
    /// Overflow line of the given timer channel.
    ///
    /// # Panics
    /// If `channel` is not in `0..4`.
    #[must_use]
    pub fn timer(channel: usize) -> Self {
        match channel {
            0 => Self::Timer0,
            1 => Self::Timer1,
            2 => Self::Timer2,
            3 => Self::Timer3,
            _ => panic!("timer channel {channel} does not exist"),
        }
    }

    #[must_use]
    pub const fn mask(self) -> u16 {
        1 << self as u16
    }
}

/// # Example
///
/// ```
/// use emu::hardware::interrupt_control::{InterruptControl, Irq};
///
/// let mut irq = InterruptControl::default();
/// irq.raise(Irq::Timer0);
/// assert!(!irq.test());
///
/// irq.write_interrupt_enable(Irq::Timer0.mask());
/// irq.write_master_enable(1);
/// assert!(irq.test());
/// ```
#[derive(Default, Clone, Serialize, Deserialize)]
pub struct InterruptControl {
    /// IE: lines individually allowed to reach the CPU.
    interrupt_enable: u16,
    /// IF: raised and not yet acknowledged lines.
    interrupt_request: u16,
    /// IME: global gate, only bit 0 is meaningful.
    interrupt_master_enable: bool,
    /// Set by HALTCNT, cleared as soon as an enabled line is raised.
    halted: bool,
}

impl InterruptControl {
    pub const fn write_interrupt_enable(&mut self, value: u16) {
        self.interrupt_enable = value;
    }

    pub fn write_master_enable(&mut self, value: u16) {
        self.interrupt_master_enable = value.get_bit(0);
    }

    /// IF write: every bit written as 1 acknowledges that line.
    pub const fn acknowledge(&mut self, value: u16) {
        self.interrupt_request &= !value;
    }

    /// Marks `irq` pending. Pending state survives the line being disabled.
    pub fn raise(&mut self, irq: Irq) {
        self.interrupt_request |= irq.mask();

        // Halt ends on any enabled request, even with IME off.
        if self.interrupt_enable & irq.mask() != 0 {
            self.halted = false;
        }
    }

    /// Whether the CPU must take the IRQ exception.
    #[must_use]
    pub const fn test(&self) -> bool {
        self.interrupt_master_enable && self.interrupt_enable & self.interrupt_request != 0
    }

    /// HALTCNT write. Returns at once when an enabled line is already
    /// pending, there would be nothing left to wake the CPU.
    pub const fn halt(&mut self) {
        self.halted = self.interrupt_enable & self.interrupt_request == 0;
    }

    #[must_use]
    pub const fn is_halted(&self) -> bool {
        self.halted
    }

    #[must_use]
    pub const fn interrupt_enable(&self) -> u16 {
        self.interrupt_enable
    }

    #[must_use]
    pub const fn interrupt_request(&self) -> u16 {
        self.interrupt_request
    }

    #[must_use]
    pub fn interrupt_master_enable(&self) -> u16 {
        u16::from(self.interrupt_master_enable)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_requires_enable_pending_and_master() {
        for ime in [false, true] {
            for ie in [false, true] {
                for pending in [false, true] {
                    let mut irq = InterruptControl::default();
                    irq.write_master_enable(u16::from(ime));
                    if ie {
                        irq.write_interrupt_enable(Irq::Serial.mask());
                    }
                    if pending {
                        irq.raise(Irq::Serial);
                    }

                    assert_eq!(irq.test(), ime && ie && pending);
                }
            }
        }
    }

    #[test]
    fn pending_line_delivered_once_enabled() {
        let mut irq = InterruptControl::default();
        irq.write_master_enable(1);
        irq.raise(Irq::Timer2);
        assert!(!irq.test());

        irq.write_interrupt_enable(Irq::Timer1.mask());
        assert!(!irq.test());

        irq.write_interrupt_enable(Irq::Timer1.mask() | Irq::Timer2.mask());
        assert!(irq.test());
    }

    #[test]
    fn acknowledge_clears_only_written_bits() {
        let mut irq = InterruptControl::default();
        irq.raise(Irq::VBlank);
        irq.raise(Irq::Serial);
        irq.raise(Irq::Keypad);

        irq.acknowledge(Irq::Serial.mask());

        assert_eq!(
            irq.interrupt_request(),
            Irq::VBlank.mask() | Irq::Keypad.mask()
        );
    }

    #[test]
    fn master_enable_only_uses_bit_zero() {
        let mut irq = InterruptControl::default();
        irq.write_master_enable(0xFFFE);
        assert_eq!(irq.interrupt_master_enable(), 0);

        irq.write_master_enable(0x0001);
        assert_eq!(irq.interrupt_master_enable(), 1);
    }

    #[test]
    fn enabled_line_wakes_from_halt() {
        let mut irq = InterruptControl::default();
        irq.write_interrupt_enable(Irq::Timer0.mask());
        irq.halt();

        irq.raise(Irq::Timer3);
        assert!(irq.is_halted());

        irq.raise(Irq::Timer0);
        assert!(!irq.is_halted());
    }

    #[test]
    fn halt_with_pending_line_falls_through() {
        let mut irq = InterruptControl::default();
        irq.write_interrupt_enable(Irq::Serial.mask());
        irq.raise(Irq::Serial);

        irq.halt();

        assert!(!irq.is_halted());
    }

    #[test]
    fn timer_lines_are_consecutive() {
        assert_eq!(Irq::timer(0), Irq::Timer0);
        assert_eq!(Irq::timer(3).mask(), 1 << 6);
    }
}
