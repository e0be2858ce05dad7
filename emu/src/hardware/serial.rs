//! Serial controller (SIO).
//!
//! The link port speaks several protocols. Which one is live depends on two
//! bitfields spread over two registers:
//!
//! ```text
//!  RCNT bits 15-14   SIOCNT bits 13-12   mode
//!  0x                00                  Normal 8-bit
//!  0x                01                  Normal 32-bit
//!  0x                10                  Multiplayer
//!  0x                11                  UART
//!  10                xx                  General purpose
//!  11                xx                  Joybus
//! ```
//!
//! The controller itself knows no protocol. It resolves the mode on every
//! write to RCNT or SIOCNT and hands register writes and elapsed cycles to the
//! [`SioDriver`] installed for that mode, if any. Modes without a driver
//! behave like a cable with nobody on the other end: writes land nowhere and
//! nothing is ever scheduled.
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;
use crate::hardware::interrupt_control::InterruptControl;
use crate::hardware::{HardwareComponent, NEVER};

pub mod driver;
pub mod joybus;
pub mod multiplayer;

pub use self::driver::{SioContext, SioDriver};

/// Power-on value of RCNT, selects general purpose mode.
pub const RCNT_INITIAL: u16 = 0x8000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SioMode {
    Normal8 = 0,
    Normal32 = 1,
    Multiplayer = 2,
    Uart = 3,
    Gpio = 8,
    Joybus = 12,
}

impl SioMode {
    /// Mode selected by RCNT bits 14-15 and SIOCNT bits 12-13.
    /// The high RCNT bit picks between the SIOCNT-encoded modes and the
    /// RCNT-encoded ones.
    #[must_use]
    pub fn resolve(rcnt: u16, siocnt: u16) -> Self {
        let mode = (rcnt.get_bits(14..=15) << 2) | siocnt.get_bits(12..=13);
        let mode = if mode < 8 { mode & 0x3 } else { mode & 0xC };

        match mode {
            0 => Self::Normal8,
            1 => Self::Normal32,
            2 => Self::Multiplayer,
            3 => Self::Uart,
            8 => Self::Gpio,
            12 => Self::Joybus,
            _ => unreachable!(),
        }
    }
}

impl Display for SioMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Normal8 => "normal 8-bit",
            Self::Normal32 => "normal 32-bit",
            Self::Multiplayer => "multiplayer",
            Self::Uart => "UART",
            Self::Gpio => "general purpose",
            Self::Joybus => "joybus",
        };
        f.write_str(name)
    }
}

/// Serial registers a driver can be handed a write for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SioRegister {
    /// 0x04000128
    Siocnt,
    /// 0x0400012A
    MltSend,
    /// 0x04000134
    Rcnt,
    /// 0x04000140
    JoyCnt,
    /// 0x04000150
    JoyRecvLo,
    /// 0x04000152
    JoyRecvHi,
    /// 0x04000154
    JoyTransLo,
    /// 0x04000156
    JoyTransHi,
    /// 0x04000158
    JoyStat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialRegisters {
    /// SIOMULTI0 - SIOMULTI3, one word per unit after a multiplayer exchange.
    pub multi_data: [u16; 4],
    pub siocnt: u16,
    /// SIOMLT_SEND, this unit's outgoing word.
    pub mlt_send: u16,
    pub rcnt: u16,
    pub joycnt: u16,
    pub joy_recv: u32,
    pub joy_trans: u32,
    pub joystat: u16,
}

impl Default for SerialRegisters {
    fn default() -> Self {
        Self {
            multi_data: [0xFFFF; 4],
            siocnt: 0,
            mlt_send: 0,
            rcnt: RCNT_INITIAL,
            joycnt: 0,
            joy_recv: 0,
            joy_trans: 0,
            joystat: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerialError {
    /// Only multiplayer and joybus take a driver.
    UnsupportedMode(SioMode),
    /// The driver's `init` hook refused.
    DriverInit(String),
}

impl Display for SerialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedMode(mode) => write!(f, "no serial driver slot for {mode} mode"),
            Self::DriverInit(reason) => write!(f, "could not initialize serial driver: {reason}"),
        }
    }
}

impl std::error::Error for SerialError {}

/// Registry slot a driver lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriverSlot {
    Multiplayer,
    Joybus,
}

impl DriverSlot {
    const fn for_mode(mode: SioMode) -> Option<Self> {
        match mode {
            SioMode::Multiplayer => Some(Self::Multiplayer),
            SioMode::Joybus => Some(Self::Joybus),
            _ => None,
        }
    }
}

pub struct Serial {
    registers: SerialRegisters,
    mode: SioMode,
    /// Slot of the driver currently receiving writes and cycles.
    active: Option<DriverSlot>,
    multiplayer: Option<Box<dyn SioDriver>>,
    joybus: Option<Box<dyn SioDriver>>,
}

impl Default for Serial {
    fn default() -> Self {
        Self::new()
    }
}

impl Serial {
    #[must_use]
    pub fn new() -> Self {
        let registers = SerialRegisters::default();
        let mode = SioMode::resolve(registers.rcnt, registers.siocnt);

        Self {
            registers,
            mode,
            active: None,
            multiplayer: None,
            joybus: None,
        }
    }

    /// Back to power-on register values. Installed drivers stay installed,
    /// the active one is unloaded if the reset leaves its mode.
    pub fn initialize(&mut self, interrupts: &mut InterruptControl) {
        self.registers.rcnt = RCNT_INITIAL;
        self.registers.siocnt = 0;
        self.switch_mode(interrupts);
    }

    #[must_use]
    pub const fn registers(&self) -> &SerialRegisters {
        &self.registers
    }

    /// JOY_RECV read. The console has taken the host's word, so the
    /// receive flag in JOYSTAT drops.
    pub fn read_joy_recv(&mut self) -> u32 {
        self.registers.joystat.set_bit(1, false);
        self.registers.joy_recv
    }

    #[must_use]
    pub const fn mode(&self) -> SioMode {
        self.mode
    }

    #[must_use]
    pub const fn has_active_driver(&self) -> bool {
        self.active.is_some()
    }

    /// Puts `driver` in the slot for `mode`, tearing down whatever was there.
    /// If `mode` is the current mode the new driver is loaded right away.
    ///
    /// # Errors
    /// [`SerialError::UnsupportedMode`] when `mode` has no driver slot (nothing
    /// changes), [`SerialError::DriverInit`] when the new driver refuses to
    /// initialize (the slot is left empty).
    pub fn install_driver(
        &mut self,
        mut driver: Box<dyn SioDriver>,
        mode: SioMode,
        interrupts: &mut InterruptControl,
    ) -> Result<(), SerialError> {
        let Some(slot) = DriverSlot::for_mode(mode) else {
            tracing::error!("no SIO driver slot for {mode} mode, driver rejected");
            return Err(SerialError::UnsupportedMode(mode));
        };

        self.remove_slot(slot, interrupts);

        let mut context = SioContext::new(&mut self.registers, interrupts);
        if let Err(reason) = driver.init(&mut context) {
            driver.deinit();
            tracing::error!("SIO driver for {mode} mode failed to initialize: {reason}");
            return Err(SerialError::DriverInit(reason));
        }

        tracing::info!("installed SIO driver for {mode} mode");
        *self.slot_mut(slot) = Some(driver);

        if DriverSlot::for_mode(self.mode) == Some(slot) {
            self.active = Some(slot);
            self.with_driver(slot, interrupts, |driver, context| driver.load(context));
        }

        Ok(())
    }

    /// Empties the slot for `mode`. Does nothing for modes without a slot.
    pub fn remove_driver(&mut self, mode: SioMode, interrupts: &mut InterruptControl) {
        if let Some(slot) = DriverSlot::for_mode(mode) {
            self.remove_slot(slot, interrupts);
        }
    }

    /// RCNT write.
    pub fn write_mode_control(&mut self, value: u16, interrupts: &mut InterruptControl) {
        self.registers.rcnt = value;
        self.switch_mode(interrupts);
        self.forward(SioRegister::Rcnt, value, interrupts);
    }

    /// SIOCNT write.
    pub fn write_transfer_control(&mut self, value: u16, interrupts: &mut InterruptControl) {
        self.registers.siocnt = value;
        self.switch_mode(interrupts);
        self.forward(SioRegister::Siocnt, value, interrupts);
    }

    /// SIOMLT_SEND write. Never changes the mode.
    pub fn write_transfer_data(&mut self, value: u16, interrupts: &mut InterruptControl) {
        self.forward(SioRegister::MltSend, value, interrupts);
    }

    pub fn write_register(
        &mut self,
        register: SioRegister,
        value: u16,
        interrupts: &mut InterruptControl,
    ) {
        match register {
            SioRegister::Rcnt => self.write_mode_control(value, interrupts),
            SioRegister::Siocnt => self.write_transfer_control(value, interrupts),
            _ => self.forward(register, value, interrupts),
        }
    }

    /// Deinitializes both drivers, active or not.
    pub fn teardown(&mut self) {
        self.active = None;
        for mut driver in [self.multiplayer.take(), self.joybus.take()]
            .into_iter()
            .flatten()
        {
            driver.deinit();
        }
    }

    fn switch_mode(&mut self, interrupts: &mut InterruptControl) {
        let old_mode = self.mode;
        self.mode = SioMode::resolve(self.registers.rcnt, self.registers.siocnt);
        if old_mode == self.mode {
            return;
        }

        tracing::debug!("SIO mode {old_mode} -> {}", self.mode);

        if let Some(slot) = self.active.take() {
            self.with_driver(slot, interrupts, |driver, context| driver.unload(context));
        }

        self.active = DriverSlot::for_mode(self.mode).filter(|&slot| self.slot(slot).is_some());

        if let Some(slot) = self.active {
            self.with_driver(slot, interrupts, |driver, context| driver.load(context));
        }
    }

    fn forward(&mut self, register: SioRegister, value: u16, interrupts: &mut InterruptControl) {
        if let Some(slot) = self.active {
            self.with_driver(slot, interrupts, |driver, context| {
                driver.write_register(context, register, value);
            });
        }
    }

    fn remove_slot(&mut self, slot: DriverSlot, interrupts: &mut InterruptControl) {
        if self.slot(slot).is_none() {
            return;
        }

        if self.active == Some(slot) {
            self.with_driver(slot, interrupts, |driver, context| driver.unload(context));
            self.active = None;
        }

        if let Some(mut driver) = self.slot_mut(slot).take() {
            driver.deinit();
        }
    }

    fn slot(&self, slot: DriverSlot) -> Option<&dyn SioDriver> {
        match slot {
            DriverSlot::Multiplayer => self.multiplayer.as_deref(),
            DriverSlot::Joybus => self.joybus.as_deref(),
        }
    }

    fn slot_mut(&mut self, slot: DriverSlot) -> &mut Option<Box<dyn SioDriver>> {
        match slot {
            DriverSlot::Multiplayer => &mut self.multiplayer,
            DriverSlot::Joybus => &mut self.joybus,
        }
    }

    fn with_driver<R>(
        &mut self,
        slot: DriverSlot,
        interrupts: &mut InterruptControl,
        hook: impl FnOnce(&mut dyn SioDriver, &mut SioContext<'_>) -> R,
    ) -> Option<R> {
        let driver = match slot {
            DriverSlot::Multiplayer => self.multiplayer.as_deref_mut(),
            DriverSlot::Joybus => self.joybus.as_deref_mut(),
        }?;
        let mut context = SioContext::new(&mut self.registers, interrupts);

        Some(hook(driver, &mut context))
    }
}

impl HardwareComponent for Serial {
    fn process_events(&mut self, cycles: i32, interrupts: &mut InterruptControl) -> i32 {
        self.active
            .and_then(|slot| {
                self.with_driver(slot, interrupts, |driver, context| {
                    driver.process_events(context, cycles)
                })
            })
            .unwrap_or(NEVER)
    }
}

impl Drop for Serial {
    fn drop(&mut self) {
        self.teardown();
    }
}
