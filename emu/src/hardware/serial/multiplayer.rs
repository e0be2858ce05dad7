//! Multiplayer link: up to four units wired in a star, this unit being the
//! parent that clocks every exchange.
//!
//! An exchange is a sequence of turns, one per connected unit in id order.
//! During its turn a unit drives its 16-bit word on the wire and every unit
//! latches it into `SIOMULTI[id]`. Slots of absent units keep `0xFFFF`.
//!
//! ```text
//!  SIOCNT (multiplayer)
//!   14   13-12   7   6    5-4   3    2    1-0
//! ┌────┬──────┬───┬───┬─────┬────┬────┬──────┐
//! │IRQ │  10  │ S │ E │ ID  │ SD │ SI │ Baud │
//! └────┴──────┴───┴───┴─────┴────┴────┴──────┘
//! ```
use std::collections::VecDeque;

use crate::bitwise::Bits;
use crate::hardware::NEVER;

use super::{SerialRegisters, SioContext, SioDriver, SioRegister};

const SI_BIT: u8 = 2;
const SD_BIT: u8 = 3;
const ERROR_BIT: u8 = 6;
const START_BIT: u8 = 7;
const IRQ_ENABLE_BIT: u8 = 14;

pub const MAX_UNITS: usize = 4;

/// Length of a whole exchange in cycles, by baud selector and unit count.
const CYCLES_PER_TRANSFER: [[i32; MAX_UNITS]; 4] = [
    [31976, 63427, 94884, 125_829],
    [8378, 16241, 24104, 31457],
    [5750, 10998, 16241, 20972],
    [3140, 5755, 8376, 10486],
];

/// Cycles of turn `turn`. The last turn absorbs the rounding.
fn turn_length(baud: usize, units: usize, turn: usize) -> i32 {
    let total = CYCLES_PER_TRANSFER[baud][units - 1];
    let count = i32::try_from(units).unwrap_or(1);
    let base = total / count;

    if turn + 1 == units {
        total - base * (count - 1)
    } else {
        base
    }
}

/// A child unit on the other end of the cable.
pub trait LinkPeer: Send {
    /// The word this unit drives during its turn. `parent_word` is what the
    /// parent sent in the same exchange.
    fn exchange(&mut self, parent_word: u16) -> u16;
}

/// Answers every exchange with the parent's own word.
pub struct EchoPeer;

impl LinkPeer for EchoPeer {
    fn exchange(&mut self, parent_word: u16) -> u16 {
        parent_word
    }
}

/// Plays back a fixed list of words, then leaves the line idle high.
pub struct ScriptedPeer {
    replies: VecDeque<u16>,
}

impl ScriptedPeer {
    pub fn new(replies: impl IntoIterator<Item = u16>) -> Self {
        Self {
            replies: replies.into_iter().collect(),
        }
    }
}

impl LinkPeer for ScriptedPeer {
    fn exchange(&mut self, _parent_word: u16) -> u16 {
        self.replies.pop_front().unwrap_or(0xFFFF)
    }
}

struct Exchange {
    /// SIOMLT_SEND latched when the exchange started.
    outgoing: u16,
    baud: usize,
    turn: usize,
    /// Cycles until the current turn ends.
    remaining: i32,
}

#[derive(Default)]
pub struct MultiplayerDriver {
    peers: Vec<Box<dyn LinkPeer>>,
    exchange: Option<Exchange>,
    error: bool,
}

impl MultiplayerDriver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_peer(mut self, peer: impl LinkPeer + 'static) -> Self {
        self.peers.push(Box::new(peer));
        self
    }

    const fn units(&self) -> usize {
        self.peers.len() + 1
    }

    /// Read-only SIOCNT bits as seen by the parent.
    fn refresh_status(&self, registers: &mut SerialRegisters) {
        let siocnt = &mut registers.siocnt;
        siocnt.set_bit(SI_BIT, false);
        siocnt.set_bit(SD_BIT, !self.peers.is_empty());
        siocnt.set_bit(4, false);
        siocnt.set_bit(5, false);
        siocnt.set_bit(ERROR_BIT, self.error);
        siocnt.set_bit(START_BIT, self.exchange.is_some());
    }

    fn start(&mut self, context: &mut SioContext<'_>) {
        context.registers.multi_data = [0xFFFF; MAX_UNITS];

        if self.peers.is_empty() {
            tracing::debug!("multiplayer exchange started with nobody attached");
            self.error = true;
            self.finish(context);
            return;
        }

        let baud = usize::from(context.registers.siocnt.get_bits(0..=1));
        self.error = false;
        self.exchange = Some(Exchange {
            outgoing: context.registers.mlt_send,
            baud,
            turn: 0,
            remaining: turn_length(baud, self.units(), 0),
        });
        self.refresh_status(context.registers);
    }

    fn finish(&mut self, context: &mut SioContext<'_>) {
        self.exchange = None;
        self.refresh_status(context.registers);

        tracing::trace!(
            "multiplayer exchange done: {:04X?}",
            context.registers.multi_data
        );

        if context.registers.siocnt.get_bit(IRQ_ENABLE_BIT) {
            context.raise_irq();
        }
    }
}

impl SioDriver for MultiplayerDriver {
    fn init(&mut self, _context: &mut SioContext<'_>) -> Result<(), String> {
        if self.units() > MAX_UNITS {
            return Err(format!(
                "a multiplayer link has at most {MAX_UNITS} units, got {}",
                self.units()
            ));
        }
        Ok(())
    }

    fn load(&mut self, context: &mut SioContext<'_>) {
        self.refresh_status(context.registers);
    }

    fn unload(&mut self, context: &mut SioContext<'_>) {
        if self.exchange.take().is_some() {
            tracing::debug!("multiplayer exchange cancelled by mode switch");
        }
        context.registers.siocnt.set_bit(START_BIT, false);
    }

    fn write_register(&mut self, context: &mut SioContext<'_>, register: SioRegister, value: u16) {
        match register {
            SioRegister::MltSend => context.registers.mlt_send = value,
            SioRegister::Siocnt => {
                let idle = self.exchange.is_none();
                self.refresh_status(context.registers);
                if idle && value.get_bit(START_BIT) {
                    self.start(context);
                }
            }
            _ => {}
        }
    }

    fn process_events(&mut self, context: &mut SioContext<'_>, cycles: i32) -> i32 {
        let units = self.units();
        let Some(exchange) = self.exchange.as_mut() else {
            return NEVER;
        };

        exchange.remaining -= cycles;
        while exchange.remaining <= 0 {
            let word = match exchange.turn {
                0 => exchange.outgoing,
                turn => self.peers[turn - 1].exchange(exchange.outgoing),
            };
            context.registers.multi_data[exchange.turn] = word;
            exchange.turn += 1;

            if exchange.turn == units {
                self.finish(context);
                return NEVER;
            }
            exchange.remaining += turn_length(exchange.baud, units, exchange.turn);
        }

        exchange.remaining
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::hardware::HardwareComponent;
    use crate::hardware::interrupt_control::{InterruptControl, Irq};
    use crate::hardware::serial::{Serial, SioMode};

    const MULTIPLAYER: u16 = 0x2000;
    const IRQ_ENABLE: u16 = 1 << 14;
    const START: u16 = 1 << 7;
    const BAUD_115200: u16 = 3;

    fn linked(driver: MultiplayerDriver) -> (Serial, InterruptControl) {
        let mut serial = Serial::new();
        let mut irq = InterruptControl::default();
        serial
            .install_driver(Box::new(driver), SioMode::Multiplayer, &mut irq)
            .unwrap();
        serial.write_mode_control(0, &mut irq);
        serial.write_transfer_control(MULTIPLAYER | IRQ_ENABLE | BAUD_115200, &mut irq);
        (serial, irq)
    }

    #[test]
    fn turn_lengths_add_up_to_exchange() {
        for baud in 0..4 {
            for units in 2..=MAX_UNITS {
                let sum: i32 = (0..units).map(|turn| turn_length(baud, units, turn)).sum();
                assert_eq!(sum, CYCLES_PER_TRANSFER[baud][units - 1]);
            }
        }
    }

    #[test]
    fn parent_status_bits_on_load() {
        let (serial, _) = linked(MultiplayerDriver::new().with_peer(EchoPeer));

        let siocnt = serial.registers().siocnt;
        assert!(!siocnt.get_bit(SI_BIT));
        assert!(siocnt.get_bit(SD_BIT));
        assert!(!siocnt.get_bit(START_BIT));
    }

    #[test]
    fn exchange_runs_one_turn_per_unit() {
        let driver = MultiplayerDriver::new()
            .with_peer(ScriptedPeer::new([0x1111]))
            .with_peer(EchoPeer);
        let (mut serial, mut irq) = linked(driver);

        serial.write_transfer_data(0xABCD, &mut irq);
        serial.write_transfer_control(MULTIPLAYER | IRQ_ENABLE | BAUD_115200 | START, &mut irq);
        assert!(serial.registers().siocnt.get_bit(START_BIT));

        // 8376 cycles for three units at 115200 baud.
        assert_eq!(serial.process_events(0, &mut irq), 2792);
        assert_eq!(serial.process_events(2792, &mut irq), 2792);
        assert_eq!(serial.registers().multi_data, [0xABCD, 0xFFFF, 0xFFFF, 0xFFFF]);

        assert_eq!(serial.process_events(2792, &mut irq), 2792);
        assert_eq!(irq.interrupt_request(), 0);

        assert_eq!(serial.process_events(2792, &mut irq), NEVER);
        assert_eq!(serial.registers().multi_data, [0xABCD, 0x1111, 0xABCD, 0xFFFF]);
        assert!(!serial.registers().siocnt.get_bit(START_BIT));
        assert_eq!(irq.interrupt_request(), Irq::Serial.mask());
    }

    #[test]
    fn late_dispatch_finishes_whole_exchange() {
        let (mut serial, mut irq) = linked(MultiplayerDriver::new().with_peer(EchoPeer));
        serial.write_transfer_data(0x0042, &mut irq);
        serial.write_transfer_control(MULTIPLAYER | IRQ_ENABLE | BAUD_115200 | START, &mut irq);

        assert_eq!(serial.process_events(6000, &mut irq), NEVER);
        assert_eq!(serial.registers().multi_data[..2], [0x0042, 0x0042]);
        assert_eq!(irq.interrupt_request(), Irq::Serial.mask());
    }

    #[test]
    fn no_irq_without_enable_bit() {
        let (mut serial, mut irq) = linked(MultiplayerDriver::new().with_peer(EchoPeer));
        serial.write_transfer_control(MULTIPLAYER | START, &mut irq);

        serial.process_events(CYCLES_PER_TRANSFER[0][1], &mut irq);

        assert_eq!(irq.interrupt_request(), 0);
        assert!(!serial.registers().siocnt.get_bit(START_BIT));
    }

    #[test]
    fn start_while_busy_is_ignored() {
        let (mut serial, mut irq) = linked(MultiplayerDriver::new().with_peer(EchoPeer));
        serial.write_transfer_control(MULTIPLAYER | BAUD_115200 | START, &mut irq);
        serial.process_events(1000, &mut irq);

        serial.write_transfer_control(MULTIPLAYER | BAUD_115200, &mut irq);

        assert!(serial.registers().siocnt.get_bit(START_BIT));
        assert_eq!(serial.process_events(0, &mut irq), 5755 / 2 - 1000);
    }

    #[test]
    fn lonely_parent_reports_error() {
        let (mut serial, mut irq) = linked(MultiplayerDriver::new());
        serial.write_transfer_control(MULTIPLAYER | IRQ_ENABLE | START, &mut irq);

        let siocnt = serial.registers().siocnt;
        assert!(siocnt.get_bit(ERROR_BIT));
        assert!(!siocnt.get_bit(START_BIT));
        assert!(!siocnt.get_bit(SD_BIT));
        assert_eq!(irq.interrupt_request(), Irq::Serial.mask());
        assert_eq!(serial.process_events(100, &mut irq), NEVER);
    }

    #[test]
    fn leaving_mode_cancels_exchange() {
        let (mut serial, mut irq) = linked(MultiplayerDriver::new().with_peer(EchoPeer));
        serial.write_transfer_control(MULTIPLAYER | IRQ_ENABLE | START, &mut irq);

        serial.write_mode_control(0x8000, &mut irq);
        serial.write_mode_control(0, &mut irq);

        assert!(!serial.registers().siocnt.get_bit(START_BIT));
        assert_eq!(serial.process_events(100_000, &mut irq), NEVER);
        assert_eq!(irq.interrupt_request(), 0);
    }

    #[test]
    fn more_than_three_peers_refused() {
        let mut driver = MultiplayerDriver::new();
        for _ in 0..MAX_UNITS {
            driver = driver.with_peer(EchoPeer);
        }
        let mut serial = Serial::new();
        let mut irq = InterruptControl::default();

        let result = serial.install_driver(Box::new(driver), SioMode::Multiplayer, &mut irq);

        assert!(result.is_err());
    }
}
