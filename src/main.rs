mod link_programs;

use std::error::Error;
use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use emu::gba::Gba;
use emu::hardware::serial::SioMode;
use emu::hardware::serial::joybus::{JoybusDriver, JoybusHost};
use emu::hardware::serial::multiplayer::{EchoPeer, MultiplayerDriver, ScriptedPeer};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::link_programs::{JoybusResponder, MultiplayerParent};

/// One second of emulated time.
const CYCLES_PER_SECOND: u64 = 16_777_216;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Scenario {
    /// This console is the parent of a multiplayer cable.
    Multiplayer,
    /// An accessory talks to this console over the JOY Bus.
    Joybus,
}

/// Headless link-cable bench: runs a small program against the serial
/// controller and reports every transfer it saw.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    #[arg(long, value_enum, default_value_t = Scenario::Multiplayer)]
    scenario: Scenario,

    /// Cycle budget, 16777216 cycles per emulated second.
    #[arg(long, default_value_t = CYCLES_PER_SECOND)]
    cycles: u64,

    /// Children attached to the multiplayer cable. More than 3 is refused by
    /// the driver.
    #[arg(long, default_value_t = 1)]
    players: usize,

    /// Multiplayer baud selector: 0=9600, 1=38400, 2=57600, 3=115200.
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u16).range(0..4))]
    baud: u16,

    /// Stop after this many completed transfers.
    #[arg(long, default_value_t = 16)]
    transfers: usize,

    /// Write the log here instead of stderr.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Debug level logging unless RUST_LOG says otherwise.
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>, Box<dyn Error>> {
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    let Some(path) = &args.log_file else {
        subscriber.with_writer(std::io::stderr).init();
        return Ok(None);
    };

    let file_name = path
        .file_name()
        .ok_or_else(|| format!("{} is not a file path", path.display()))?;
    let directory = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(directory, file_name));
    subscriber.with_writer(writer).with_ansi(false).init();

    Ok(Some(guard))
}

fn run_multiplayer(args: &Args) -> Result<(), Box<dyn Error>> {
    let mut driver = MultiplayerDriver::new();
    for player in 1..=args.players {
        driver = if player == 1 {
            driver.with_peer(EchoPeer)
        } else {
            let id = u16::try_from(player).unwrap_or(u16::MAX) << 12;
            let replies = (0..args.transfers).map(|n| id | (u16::try_from(n).unwrap_or(0) & 0x0FFF));
            driver.with_peer(ScriptedPeer::new(replies))
        };
    }

    let mut gba = Gba::new();
    gba.install_driver(Box::new(driver), SioMode::Multiplayer)?;
    let mut cpu = MultiplayerParent::new(args.baud, args.transfers);

    while !cpu.is_done() && gba.cycles() < args.cycles {
        gba.step(&mut cpu);
    }

    println!(
        "multiplayer: {} of {} exchanges in {} cycles, {} with the error flag",
        cpu.exchanges().len(),
        args.transfers,
        gba.cycles(),
        cpu.errors()
    );
    if let Some(last) = cpu.exchanges().last() {
        println!("last exchange: {last:04X?}");
    }

    Ok(())
}

/// Keeps one write/read pair in flight and checks that every read returns
/// the written word plus one.
struct Accessory {
    host: JoybusHost,
    next_word: u32,
    expected: Option<u32>,
    completed: usize,
    mismatches: usize,
}

impl Accessory {
    fn send_pair(&mut self) {
        self.host.write(self.next_word);
        self.host.read();
        self.expected = Some(self.next_word.wrapping_add(1));
        self.next_word = self.next_word.wrapping_mul(31).wrapping_add(7);
    }

    fn handle(&mut self, response: &[u8]) {
        match *response {
            [0x00, 0x04, status] => {
                tracing::info!("accessory attached, status {status:#04X}");
                self.send_pair();
            }
            [b0, b1, b2, b3, _] => {
                let word = u32::from_le_bytes([b0, b1, b2, b3]);
                if self.expected != Some(word) {
                    tracing::warn!("read back {word:#010X}, expected {:08X?}", self.expected);
                    self.mismatches += 1;
                }
                self.completed += 1;
                self.send_pair();
            }
            [status] => tracing::debug!("write acknowledged, status {status:#04X}"),
            _ => tracing::warn!("unexpected joybus response {response:02X?}"),
        }
    }
}

fn run_joybus(args: &Args) -> Result<(), Box<dyn Error>> {
    let (driver, host) = JoybusDriver::connect();
    let mut gba = Gba::new();
    gba.install_driver(Box::new(driver), SioMode::Joybus)?;
    let mut cpu = JoybusResponder::new();

    let mut accessory = Accessory {
        host,
        next_word: 0x1234_5678,
        expected: None,
        completed: 0,
        mismatches: 0,
    };
    accessory.host.reset();

    while accessory.completed < args.transfers && gba.cycles() < args.cycles {
        gba.step(&mut cpu);
        while let Some(response) = accessory.host.try_response() {
            accessory.handle(&response);
        }
    }

    println!(
        "joybus: {} of {} round trips in {} cycles, {} mismatched, console saw {} words and sent {}",
        accessory.completed,
        args.transfers,
        gba.cycles(),
        accessory.mismatches,
        cpu.received().len(),
        cpu.sent()
    );

    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let _guard = init_logging(&args)?;

    tracing::info!("satsuma link bench: {:?}", args.scenario);

    match args.scenario {
        Scenario::Multiplayer => run_multiplayer(&args),
        Scenario::Joybus => run_joybus(&args),
    }
}
