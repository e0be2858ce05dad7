//! JOY Bus link: a point-to-point command/response protocol where an
//! accessory host drives the line and the console answers.
//!
//! The host lives on the other side of a pair of channels ([`JoybusHost`]),
//! so it can run on another thread. Every byte on the wire costs
//! [`CYCLES_PER_BYTE`]; a frame is first received in full, then executed,
//! then its response is shifted out byte by byte.
//!
//! ```text
//!  JOYCNT                     JOYSTAT
//!    6     2    1    0          5-4     3      1
//! ┌─────┬────┬────┬─────┐    ┌──────┬──────┬──────┐
//! │ IRQ │Send│Recv│Reset│    │Flags │ Send │ Recv │
//! └─────┴────┴────┴─────┘    └──────┴──────┴──────┘
//! ```
use std::mem;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

use crate::bitwise::Bits;
use crate::hardware::NEVER;

use super::{SioContext, SioDriver, SioRegister};

pub const CMD_RESET: u8 = 0xFF;
pub const CMD_POLL: u8 = 0x00;
pub const CMD_READ: u8 = 0x14;
pub const CMD_WRITE: u8 = 0x15;

/// One byte at 250 kbit/s.
pub const CYCLES_PER_BYTE: i32 = 537;

/// How often an idle console looks for a new command from the host.
pub const IDLE_POLL: i32 = CYCLES_PER_BYTE * 8;

const DEVICE_ID: [u8; 2] = [0x00, 0x04];

const JOYCNT_RESET: u8 = 0;
const JOYCNT_RECEIVED: u8 = 1;
const JOYCNT_SENT: u8 = 2;
const JOYCNT_IRQ_ENABLE: u8 = 6;
const JOYSTAT_RECEIVE_PENDING: u8 = 1;
const JOYSTAT_SEND_PENDING: u8 = 3;
const JOYSTAT_FLAGS: u16 = 0x30;

/// The accessory's end of the cable.
pub struct JoybusHost {
    commands: Sender<Vec<u8>>,
    responses: Receiver<Vec<u8>>,
}

impl JoybusHost {
    /// Queues a command frame. Returns `false` once the console is gone.
    pub fn send(&self, frame: impl Into<Vec<u8>>) -> bool {
        self.commands.send(frame.into()).is_ok()
    }

    pub fn reset(&self) -> bool {
        self.send([CMD_RESET])
    }

    pub fn poll(&self) -> bool {
        self.send([CMD_POLL])
    }

    pub fn read(&self) -> bool {
        self.send([CMD_READ])
    }

    pub fn write(&self, word: u32) -> bool {
        let [b0, b1, b2, b3] = word.to_le_bytes();
        self.send([CMD_WRITE, b0, b1, b2, b3])
    }

    /// The oldest response the console finished sending, if any.
    #[must_use]
    pub fn try_response(&self) -> Option<Vec<u8>> {
        self.responses.try_recv().ok()
    }
}

#[derive(Default)]
enum Phase {
    #[default]
    Idle,
    Receiving {
        frame: Vec<u8>,
        received: usize,
    },
    Responding {
        command: u8,
        response: Vec<u8>,
        sent: usize,
    },
}

pub struct JoybusDriver {
    commands: Receiver<Vec<u8>>,
    responses: Sender<Vec<u8>>,
    phase: Phase,
    /// Cycles until the next byte boundary or idle poll.
    remaining: i32,
    connected: bool,
}

impl JoybusDriver {
    /// A driver and the host handle talking to it.
    #[must_use]
    pub fn connect() -> (Self, JoybusHost) {
        let (command_tx, command_rx) = mpsc::channel();
        let (response_tx, response_rx) = mpsc::channel();

        let driver = Self {
            commands: command_rx,
            responses: response_tx,
            phase: Phase::Idle,
            remaining: IDLE_POLL,
            connected: true,
        };
        let host = JoybusHost {
            commands: command_tx,
            responses: response_rx,
        };
        (driver, host)
    }

    /// Handles one byte boundary and returns the cycles to the next one, or
    /// `None` when the host has hung up and nothing is left to do.
    fn step(&mut self, context: &mut SioContext<'_>) -> Option<i32> {
        match mem::take(&mut self.phase) {
            Phase::Idle => match self.commands.try_recv() {
                Ok(frame) if !frame.is_empty() => {
                    self.phase = Phase::Receiving { frame, received: 0 };
                    Some(CYCLES_PER_BYTE)
                }
                Ok(_) | Err(TryRecvError::Empty) => Some(IDLE_POLL),
                Err(TryRecvError::Disconnected) => {
                    tracing::debug!("joybus host disconnected");
                    self.connected = false;
                    None
                }
            },
            Phase::Receiving { frame, received } => {
                let received = received + 1;
                if received < frame.len() {
                    self.phase = Phase::Receiving { frame, received };
                    return Some(CYCLES_PER_BYTE);
                }

                let response = Self::execute(context, &frame);
                if response.is_empty() {
                    return Some(IDLE_POLL);
                }
                self.phase = Phase::Responding {
                    command: frame[0],
                    response,
                    sent: 0,
                };
                Some(CYCLES_PER_BYTE)
            }
            Phase::Responding {
                command,
                response,
                sent,
            } => {
                let sent = sent + 1;
                if sent < response.len() {
                    self.phase = Phase::Responding {
                        command,
                        response,
                        sent,
                    };
                    return Some(CYCLES_PER_BYTE);
                }

                if self.responses.send(response).is_err() {
                    self.connected = false;
                }
                if command == CMD_READ {
                    let registers = &mut *context.registers;
                    registers.joycnt.set_bit(JOYCNT_SENT, true);
                    registers.joystat.set_bit(JOYSTAT_SEND_PENDING, false);
                    Self::signal(context);
                }
                Some(IDLE_POLL)
            }
        }
    }

    /// Applies a fully received frame and builds the response to shift out.
    fn execute(context: &mut SioContext<'_>, frame: &[u8]) -> Vec<u8> {
        let registers = &mut *context.registers;

        match *frame {
            [CMD_RESET, ..] => {
                registers.joycnt.set_bit(JOYCNT_RESET, true);
                let status = registers.joystat.get_byte(0);
                Self::signal(context);
                vec![DEVICE_ID[0], DEVICE_ID[1], status]
            }
            [CMD_POLL, ..] => vec![DEVICE_ID[0], DEVICE_ID[1], registers.joystat.get_byte(0)],
            [CMD_WRITE, b0, b1, b2, b3, ..] => {
                registers.joy_recv = u32::from_le_bytes([b0, b1, b2, b3]);
                registers.joycnt.set_bit(JOYCNT_RECEIVED, true);
                registers.joystat.set_bit(JOYSTAT_RECEIVE_PENDING, true);
                let status = registers.joystat.get_byte(0);
                Self::signal(context);
                vec![status]
            }
            [CMD_READ, ..] => {
                let mut response = registers.joy_trans.to_le_bytes().to_vec();
                response.push(registers.joystat.get_byte(0));
                response
            }
            [command, ..] => {
                tracing::debug!("joybus command {command:#04X} ({} bytes) dropped", frame.len());
                Vec::new()
            }
            [] => Vec::new(),
        }
    }

    fn signal(context: &mut SioContext<'_>) {
        if context.registers.joycnt.get_bit(JOYCNT_IRQ_ENABLE) {
            context.raise_irq();
        }
    }
}

impl SioDriver for JoybusDriver {
    fn load(&mut self, _context: &mut SioContext<'_>) {
        self.phase = Phase::Idle;
        self.remaining = if self.connected { IDLE_POLL } else { NEVER };
    }

    fn unload(&mut self, _context: &mut SioContext<'_>) {
        if !matches!(mem::take(&mut self.phase), Phase::Idle) {
            tracing::debug!("joybus frame cancelled by mode switch");
        }
    }

    fn write_register(&mut self, context: &mut SioContext<'_>, register: SioRegister, value: u16) {
        let registers = &mut *context.registers;

        match register {
            SioRegister::JoyCnt => {
                registers.joycnt = (registers.joycnt & 0x7 & !value) | (value & 0x40);
            }
            SioRegister::JoyStat => {
                registers.joystat = (registers.joystat & !JOYSTAT_FLAGS) | (value & JOYSTAT_FLAGS);
            }
            SioRegister::JoyRecvLo => {
                registers.joy_recv = (registers.joy_recv & 0xFFFF_0000) | u32::from(value);
            }
            SioRegister::JoyRecvHi => {
                registers.joy_recv = (registers.joy_recv & 0xFFFF) | (u32::from(value) << 16);
            }
            SioRegister::JoyTransLo => {
                registers.joy_trans = (registers.joy_trans & 0xFFFF_0000) | u32::from(value);
                registers.joystat.set_bit(JOYSTAT_SEND_PENDING, true);
            }
            SioRegister::JoyTransHi => {
                registers.joy_trans = (registers.joy_trans & 0xFFFF) | (u32::from(value) << 16);
                registers.joystat.set_bit(JOYSTAT_SEND_PENDING, true);
            }
            _ => {}
        }
    }

    fn process_events(&mut self, context: &mut SioContext<'_>, cycles: i32) -> i32 {
        if !self.connected && matches!(self.phase, Phase::Idle) {
            return NEVER;
        }

        self.remaining -= cycles;
        while self.remaining <= 0 {
            let Some(next) = self.step(context) else {
                self.remaining = NEVER;
                return NEVER;
            };
            self.remaining += next;
        }

        self.remaining
    }
}
