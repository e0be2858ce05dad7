//! Hand-written programs that stand in for game code on the link bench.
//!
//! Each one is a small state machine driven through the I/O registers only,
//! the way a game would: configure SIO, sleep in HALTCNT and do the work in
//! the serial interrupt.
use emu::bus::Bus;
use emu::gba::Cpu;

/// Cost charged for every register access a program makes.
const INSTRUCTION_CYCLES: i32 = 4;

const SIOMULTI0: usize = 0x0400_0120;
const SIOCNT: usize = 0x0400_0128;
const SIOMLT_SEND: usize = 0x0400_012A;
const RCNT: usize = 0x0400_0134;
const JOYCNT: usize = 0x0400_0140;
const JOY_RECV: usize = 0x0400_0150;
const JOY_TRANS: usize = 0x0400_0154;
const IE: usize = 0x0400_0200;
const IF: usize = 0x0400_0202;
const IME: usize = 0x0400_0208;
const HALTCNT: usize = 0x0400_0300;

const SERIAL_IRQ: u16 = 1 << 7;

const SIOCNT_MULTIPLAYER: u16 = 0x2000;
const SIOCNT_IRQ_ENABLE: u16 = 1 << 14;
const SIOCNT_START: u16 = 1 << 7;
const SIOCNT_ERROR: u16 = 1 << 6;

const RCNT_JOYBUS: u16 = 0xC000;
const JOYCNT_FLAGS: u16 = 0x7;
const JOYCNT_RECEIVED: u16 = 1 << 1;
const JOYCNT_SENT: u16 = 1 << 2;
const JOYCNT_IRQ_ENABLE: u16 = 1 << 6;

fn enable_serial_irq(bus: &mut Bus) {
    bus.write_half_word(IE, SERIAL_IRQ);
    bus.write_half_word(IME, 1);
}

/// Halts, or reports that an interrupt is already waiting to be taken.
fn sleep(bus: &mut Bus) -> bool {
    bus.write_half_word(HALTCNT, 0);
    bus.interrupt_control().test()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParentStep {
    Setup,
    Send,
    Sleep,
    Collect,
    Done,
}

/// Parent of a multiplayer session: sends a counter, sleeps until the
/// exchange interrupt and records what every unit answered.
pub struct MultiplayerParent {
    baud: u16,
    wanted: usize,
    step: ParentStep,
    exchanges: Vec<[u16; 4]>,
    errors: usize,
}

impl MultiplayerParent {
    pub fn new(baud: u16, transfers: usize) -> Self {
        Self {
            baud: baud & 0b11,
            wanted: transfers,
            step: ParentStep::Setup,
            exchanges: Vec::with_capacity(transfers),
            errors: 0,
        }
    }

    pub fn is_done(&self) -> bool {
        self.step == ParentStep::Done
    }

    pub fn exchanges(&self) -> &[[u16; 4]] {
        &self.exchanges
    }

    pub const fn errors(&self) -> usize {
        self.errors
    }

    fn control(&self) -> u16 {
        SIOCNT_MULTIPLAYER | SIOCNT_IRQ_ENABLE | self.baud
    }
}

impl Cpu for MultiplayerParent {
    fn execute(&mut self, bus: &mut Bus) {
        while bus.cycles() < bus.next_event() && !bus.interrupt_control().is_halted() {
            bus.add_cycles(INSTRUCTION_CYCLES);

            match self.step {
                ParentStep::Setup => {
                    bus.write_half_word(RCNT, 0);
                    bus.write_half_word(SIOCNT, self.control());
                    enable_serial_irq(bus);
                    self.step = if self.wanted == 0 {
                        ParentStep::Done
                    } else {
                        ParentStep::Send
                    };
                }
                ParentStep::Send => {
                    let counter = u16::try_from(self.exchanges.len()).unwrap_or(u16::MAX);
                    bus.write_half_word(SIOMLT_SEND, 0xA000 | (counter & 0x0FFF));
                    bus.write_half_word(SIOCNT, self.control() | SIOCNT_START);
                    self.step = ParentStep::Sleep;
                }
                ParentStep::Sleep | ParentStep::Done => {
                    if sleep(bus) {
                        return;
                    }
                }
                ParentStep::Collect => {
                    let words: [u16; 4] =
                        std::array::from_fn(|unit| bus.read_half_word(SIOMULTI0 + 2 * unit));
                    if bus.read_half_word(SIOCNT) & SIOCNT_ERROR != 0 {
                        self.errors += 1;
                    }
                    tracing::debug!("exchange {}: {words:04X?}", self.exchanges.len());
                    self.exchanges.push(words);
                    bus.write_half_word(IF, SERIAL_IRQ);

                    self.step = if self.exchanges.len() >= self.wanted {
                        ParentStep::Done
                    } else {
                        ParentStep::Send
                    };
                }
            }
        }
    }

    fn raise_irq(&mut self) {
        if self.step == ParentStep::Sleep {
            self.step = ParentStep::Collect;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResponderStep {
    Setup,
    Sleep,
    Service,
}

/// Joybus accessory responder: every word the host writes is handed back
/// incremented by one on the next host read.
pub struct JoybusResponder {
    step: ResponderStep,
    received: Vec<u32>,
    sent: usize,
}

impl JoybusResponder {
    pub const fn new() -> Self {
        Self {
            step: ResponderStep::Setup,
            received: Vec::new(),
            sent: 0,
        }
    }

    pub fn received(&self) -> &[u32] {
        &self.received
    }

    pub const fn sent(&self) -> usize {
        self.sent
    }
}

impl Cpu for JoybusResponder {
    fn execute(&mut self, bus: &mut Bus) {
        while bus.cycles() < bus.next_event() && !bus.interrupt_control().is_halted() {
            bus.add_cycles(INSTRUCTION_CYCLES);

            match self.step {
                ResponderStep::Setup => {
                    bus.write_half_word(RCNT, RCNT_JOYBUS);
                    bus.write_half_word(JOYCNT, JOYCNT_IRQ_ENABLE);
                    enable_serial_irq(bus);
                    self.step = ResponderStep::Sleep;
                }
                ResponderStep::Sleep => {
                    if sleep(bus) {
                        return;
                    }
                }
                ResponderStep::Service => {
                    let flags = bus.read_half_word(JOYCNT) & JOYCNT_FLAGS;

                    if flags & JOYCNT_RECEIVED != 0 {
                        let word = bus.read_word(JOY_RECV);
                        self.received.push(word);
                        bus.write_word(JOY_TRANS, word.wrapping_add(1));
                    }
                    if flags & JOYCNT_SENT != 0 {
                        self.sent += 1;
                    }

                    bus.write_half_word(JOYCNT, flags | JOYCNT_IRQ_ENABLE);
                    bus.write_half_word(IF, SERIAL_IRQ);
                    self.step = ResponderStep::Sleep;
                }
            }
        }
    }

    fn raise_irq(&mut self) {
        if self.step == ResponderStep::Sleep {
            self.step = ResponderStep::Service;
        }
    }
}
