pub mod interrupt_control;
pub mod serial;
pub mod timers;

use self::interrupt_control::InterruptControl;

/// Distance returned by a peripheral that has nothing scheduled.
pub const NEVER: i32 = i32::MAX;

/// Scheduling contract between the CPU loop and the peripherals.
///
/// After running a batch, the CPU hands every peripheral the number of cycles
/// that elapsed. The peripheral catches up, raises whatever lines came due and
/// answers with the number of cycles until it next needs attention.
pub trait HardwareComponent {
    fn process_events(&mut self, cycles: i32, interrupts: &mut InterruptControl) -> i32;
}
