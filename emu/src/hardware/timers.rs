//! Timer bank (TM0CNT - TM3CNT).
//!
//! Each channel is a 16-bit up-counter. A free-running channel does not tick
//! cycle by cycle: it predicts the cycle of its next overflow and is only
//! touched again when the scheduler reaches it. The live count is derived
//! from the distance to the last overflow when somebody reads it.
//!
//! A channel with the count-up bit set has no schedule of its own: it ticks
//! once every time the channel right below it overflows.
//!
//! ```text
//!  TMxCNT_H
//!   7   6   5  3   2    1  0
//! ┌───┬───┬─────┬────┬──────┐
//! │ E │ I │  -  │ CU │ Pre  │
//! └───┴───┴─────┴────┴──────┘
//! ```
use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;
use crate::hardware::interrupt_control::{InterruptControl, Irq};
use crate::hardware::{HardwareComponent, NEVER};

pub const TIMER_COUNT: usize = 4;

/// Prescaler selector to shift amount: F/1, F/64, F/256, F/1024.
const PRESCALER_SHIFTS: [u8; 4] = [0, 6, 8, 10];

/// Decoded TMxCNT_H.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerControl {
    /// Selector in `0..4`, see [`PRESCALER_SHIFTS`].
    pub prescaler: u8,
    pub count_up: bool,
    pub irq_enable: bool,
    pub enable: bool,
}

impl From<u16> for TimerControl {
    fn from(value: u16) -> Self {
        Self {
            prescaler: value.get_bits(0..=1).get_byte(0),
            count_up: value.get_bit(2),
            irq_enable: value.get_bit(6),
            enable: value.get_bit(7),
        }
    }
}

impl From<TimerControl> for u16 {
    fn from(control: TimerControl) -> Self {
        let mut value = Self::from(control.prescaler & 0b11);
        value.set_bit(2, control.count_up);
        value.set_bit(6, control.irq_enable);
        value.set_bit(7, control.enable);
        value
    }
}

/// Cycles between two overflows of a channel reloading from `reload`.
const fn overflow_interval(reload: u16, prescale_bits: u8) -> i32 {
    (0x10000 - reload as i32) << prescale_bits
}

/// Event times are relative to the start of the current batch, like the
/// `now` arguments of the register write paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerChannel {
    /// Value loaded on enable and on every overflow.
    reload: u16,
    /// Reload that was in effect at the last overflow (or enable).
    old_reload: u16,
    /// Count of a stopped or cascading channel.
    counter: u16,
    last_event: i32,
    next_event: i32,
    overflow_interval: i32,
    prescale_bits: u8,
    prescaler: u8,
    count_up: bool,
    do_irq: bool,
    enable: bool,
}

impl Default for TimerChannel {
    fn default() -> Self {
        Self {
            reload: 0,
            old_reload: 0,
            counter: 0,
            last_event: 0,
            next_event: NEVER,
            overflow_interval: overflow_interval(0, 0),
            prescale_bits: 0,
            prescaler: 0,
            count_up: false,
            do_irq: false,
            enable: false,
        }
    }
}

impl TimerChannel {
    const fn is_free_running(&self) -> bool {
        self.enable && !self.count_up
    }

    fn live_counter(&self, now: i32) -> u16 {
        if !self.is_free_running() {
            return self.counter;
        }

        // Overflow due but not dispatched yet: the count already restarted
        // from the reload.
        if now >= self.next_event {
            let period = 0x10000 - i32::from(self.reload);
            let ticks = ((now - self.next_event) >> self.prescale_bits) % period;
            return self.reload.wrapping_add(ticks as u16);
        }

        let ticks = (now - self.last_event) >> self.prescale_bits;
        self.old_reload.wrapping_add((ticks & 0xFFFF) as u16)
    }

    #[must_use]
    pub const fn reload(&self) -> u16 {
        self.reload
    }

    #[must_use]
    pub const fn next_event(&self) -> i32 {
        self.next_event
    }

    #[must_use]
    pub const fn overflow_interval(&self) -> i32 {
        self.overflow_interval
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enable
    }

    #[must_use]
    pub const fn is_cascading(&self) -> bool {
        self.count_up
    }

    #[must_use]
    pub fn control(&self) -> TimerControl {
        TimerControl {
            prescaler: self.prescaler,
            count_up: self.count_up,
            irq_enable: self.do_irq,
            enable: self.enable,
        }
    }
}

#[derive(Default, Clone, Serialize, Deserialize)]
pub struct Timers {
    channels: [TimerChannel; TIMER_COUNT],
}

impl Timers {
    #[must_use]
    pub fn channel(&self, channel: usize) -> &TimerChannel {
        &self.channels[channel]
    }

    /// TMxCNT_L write. Only the pending reload changes, an overflow already
    /// scheduled keeps its time.
    pub fn write_reload(&mut self, channel: usize, value: u16) {
        let timer = &mut self.channels[channel];
        timer.reload = value;
        timer.overflow_interval = overflow_interval(value, timer.prescale_bits);
    }

    pub fn write_reload_low(&mut self, channel: usize, value: u8) {
        let mut reload = self.channels[channel].reload;
        reload.set_byte(0, value);
        self.write_reload(channel, reload);
    }

    pub fn write_reload_high(&mut self, channel: usize, value: u8) {
        let mut reload = self.channels[channel].reload;
        reload.set_byte(1, value);
        self.write_reload(channel, reload);
    }

    /// TMxCNT_H write at cycle `now` of the current batch.
    /// Returns the channel's next overflow so the caller can pull its own
    /// schedule in.
    pub fn write_control(&mut self, channel: usize, value: u16, now: i32) -> i32 {
        let control = TimerControl::from(value);
        let timer = &mut self.channels[channel];

        // Freeze the count under the old settings before touching them.
        timer.counter = timer.live_counter(now);

        let was_enabled = timer.enable;
        let was_count_up = timer.count_up;
        let old_prescale = timer.prescale_bits;

        timer.prescaler = control.prescaler & 0b11;
        timer.prescale_bits = PRESCALER_SHIFTS[usize::from(timer.prescaler)];
        // Timer 0 has nobody below it to count up from.
        timer.count_up = control.count_up && channel > 0;
        timer.do_irq = control.irq_enable;
        timer.enable = control.enable;
        timer.overflow_interval = overflow_interval(timer.reload, timer.prescale_bits);

        if !timer.enable {
            timer.next_event = NEVER;
        } else if !was_enabled {
            timer.counter = timer.reload;
            timer.old_reload = timer.reload;
            timer.last_event = now;
            timer.next_event = if timer.count_up {
                NEVER
            } else {
                now + timer.overflow_interval
            };
        } else if timer.count_up {
            timer.next_event = NEVER;
        } else if was_count_up || old_prescale != timer.prescale_bits {
            // The count carries over, only its rate changes.
            timer.old_reload = timer.counter;
            timer.last_event = now;
            timer.next_event = now + overflow_interval(timer.counter, timer.prescale_bits);
        }

        tracing::trace!(
            "timer {channel} control {value:#06X} (enabled: {}, cascade: {})",
            timer.enable,
            timer.count_up
        );

        timer.next_event
    }

    /// Live TMxCNT_L value at cycle `now` of the current batch.
    #[must_use]
    pub fn read_counter(&self, channel: usize, now: i32) -> u16 {
        self.channels[channel].live_counter(now)
    }

    #[must_use]
    pub fn read_control(&self, channel: usize) -> u16 {
        self.channels[channel].control().into()
    }

    fn overflow(&mut self, channel: usize, interrupts: &mut InterruptControl) {
        let timer = &mut self.channels[channel];
        timer.old_reload = timer.reload;
        timer.counter = timer.reload;

        if timer.do_irq {
            interrupts.raise(Irq::timer(channel));
        }

        tracing::trace!("timer {channel} overflow, reload {:#06X}", timer.reload);

        if let Some(upper) = self.channels.get_mut(channel + 1)
            && upper.enable
            && upper.count_up
        {
            upper.counter = upper.counter.wrapping_add(1);
            if upper.counter == 0 {
                self.overflow(channel + 1, interrupts);
            }
        }
    }
}

impl HardwareComponent for Timers {
    fn process_events(&mut self, cycles: i32, interrupts: &mut InterruptControl) -> i32 {
        let mut next_event = NEVER;

        for channel in 0..TIMER_COUNT {
            let timer = &mut self.channels[channel];
            if !timer.is_free_running() {
                debug_assert!(
                    timer.next_event == NEVER,
                    "timer {channel} is not free-running but has an overflow scheduled"
                );
                continue;
            }

            timer.next_event -= cycles;
            timer.last_event -= cycles;

            while self.channels[channel].next_event <= 0 {
                let timer = &mut self.channels[channel];
                timer.last_event = timer.next_event;
                timer.next_event += timer.overflow_interval;
                self.overflow(channel, interrupts);
            }

            next_event = next_event.min(self.channels[channel].next_event);
        }

        next_event
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const ENABLE: u16 = 1 << 7;
    const IRQ: u16 = 1 << 6;
    const COUNT_UP: u16 = 1 << 2;

    #[test]
    fn control_register_decode_encode() {
        let control = TimerControl::from(0b1100_0110);
        assert_eq!(
            control,
            TimerControl {
                prescaler: 2,
                count_up: true,
                irq_enable: true,
                enable: true,
            }
        );
        assert_eq!(u16::from(control), 0b1100_0110);

        // Unused bits are dropped.
        assert_eq!(u16::from(TimerControl::from(0xFF38)), 0x00);
    }

    #[test]
    fn prescaler_table_is_not_linear() {
        let mut timers = Timers::default();
        for (selector, shift) in [(0, 0), (1, 6), (2, 8), (3, 10)] {
            timers.write_control(0, ENABLE | selector, 0);
            assert_eq!(timers.channel(0).overflow_interval(), 0x10000 << shift);
            timers.write_control(0, 0, 0);
        }
    }

    #[test]
    fn fastest_timer_overflows_every_cycle() {
        let mut timers = Timers::default();
        let mut irq = InterruptControl::default();
        timers.write_reload(0, 0xFFFF);

        let next = timers.write_control(0, ENABLE | IRQ, 0);
        assert_eq!(next, 1);
        assert_eq!(timers.channel(0).overflow_interval(), 1);

        let next = timers.process_events(1, &mut irq);
        assert_eq!(next, 1);
        assert_eq!(timers.read_counter(0, 0), 0xFFFF);
        assert_eq!(irq.interrupt_request(), Irq::Timer0.mask());
    }

    #[test]
    fn overflow_without_irq_flag_raises_nothing() {
        let mut timers = Timers::default();
        let mut irq = InterruptControl::default();
        timers.write_reload(1, 0xFFF0);
        timers.write_control(1, ENABLE, 0);

        timers.process_events(16, &mut irq);
        assert_eq!(irq.interrupt_request(), 0);
        assert_eq!(timers.read_counter(1, 0), 0xFFF0);
    }

    #[test]
    fn live_counter_follows_prescaler() {
        let mut timers = Timers::default();
        timers.write_reload(2, 0x1000);
        timers.write_control(2, ENABLE | 1, 10);

        assert_eq!(timers.read_counter(2, 10), 0x1000);
        assert_eq!(timers.read_counter(2, 10 + 63), 0x1000);
        assert_eq!(timers.read_counter(2, 10 + 64), 0x1001);
        assert_eq!(timers.read_counter(2, 10 + 64 * 5), 0x1005);
    }

    #[test]
    fn enable_mid_batch_predicts_from_current_cycle() {
        let mut timers = Timers::default();
        let mut irq = InterruptControl::default();
        timers.write_reload(0, 0xFF00);

        let next = timers.write_control(0, ENABLE, 40);
        assert_eq!(next, 40 + 0x100);

        let next = timers.process_events(100, &mut irq);
        assert_eq!(next, 40 + 0x100 - 100);
    }

    #[test]
    fn reload_write_does_not_move_scheduled_overflow() {
        let mut timers = Timers::default();
        let mut irq = InterruptControl::default();
        timers.write_reload(0, 0xFF00);
        timers.write_control(0, ENABLE | IRQ, 0);

        timers.process_events(0x80, &mut irq);
        timers.write_reload_low(0, 0xF0);
        timers.write_reload_high(0, 0xFF);

        // Count still runs from the reload in effect when it started.
        assert_eq!(timers.read_counter(0, 0), 0xFF80);
        assert_eq!(timers.channel(0).next_event(), 0x80);

        let next = timers.process_events(0x80, &mut irq);
        assert_eq!(irq.interrupt_request(), Irq::Timer0.mask());
        assert_eq!(timers.read_counter(0, 0), 0xFFF0);
        assert_eq!(next, 0x10);
    }

    #[test]
    fn cascade_counts_overflows_of_channel_below() {
        let mut timers = Timers::default();
        let mut irq = InterruptControl::default();
        timers.write_reload(0, 0xFFFF);
        timers.write_control(0, ENABLE, 0);
        let next = timers.write_control(1, ENABLE | COUNT_UP | 3, 0);
        assert_eq!(next, NEVER);

        for _ in 0..5 {
            timers.process_events(1, &mut irq);
        }

        assert_eq!(timers.read_counter(1, 0), 5);
        assert_eq!(timers.channel(1).next_event(), NEVER);
    }

    #[test]
    fn catch_up_delivers_every_overflow_of_a_batch() {
        let mut timers = Timers::default();
        let mut irq = InterruptControl::default();
        timers.write_reload(0, 0xFFFE);
        timers.write_control(0, ENABLE, 0);
        timers.write_control(1, ENABLE | COUNT_UP, 0);

        let next = timers.process_events(10, &mut irq);

        assert_eq!(timers.read_counter(1, 0), 5);
        assert_eq!(next, 2);
    }

    #[test]
    fn cascade_chain_propagates_overflow() {
        let mut timers = Timers::default();
        let mut irq = InterruptControl::default();
        timers.write_reload(0, 0xFFFF);
        timers.write_control(0, ENABLE, 0);
        timers.write_reload(1, 0xFFFE);
        timers.write_control(1, ENABLE | COUNT_UP | IRQ, 0);
        timers.write_control(2, ENABLE | COUNT_UP | IRQ, 0);

        timers.process_events(1, &mut irq);
        assert_eq!(irq.interrupt_request(), 0);

        timers.process_events(1, &mut irq);
        assert_eq!(irq.interrupt_request(), Irq::Timer1.mask());
        assert_eq!(timers.read_counter(1, 0), 0xFFFE);
        assert_eq!(timers.read_counter(2, 0), 1);
    }

    #[test]
    fn timer_zero_ignores_count_up() {
        let mut timers = Timers::default();
        timers.write_reload(0, 0xFFF0);

        let next = timers.write_control(0, ENABLE | COUNT_UP, 0);

        assert!(!timers.channel(0).is_cascading());
        assert_eq!(next, 0x10);
        assert_eq!(timers.read_control(0), ENABLE);
    }

    #[test]
    fn disable_latches_live_count() {
        let mut timers = Timers::default();
        let mut irq = InterruptControl::default();
        timers.write_reload(3, 0x8000);
        timers.write_control(3, ENABLE, 0);
        timers.process_events(0x20, &mut irq);

        timers.write_control(3, 0, 0x10);

        assert_eq!(timers.read_counter(3, 0x500), 0x8030);
        assert_eq!(timers.process_events(0x1000, &mut irq), NEVER);
    }

    #[test]
    fn prescaler_change_keeps_count_and_changes_rate() {
        let mut timers = Timers::default();
        let mut irq = InterruptControl::default();
        timers.write_reload(0, 0xFF00);
        timers.write_control(0, ENABLE | IRQ, 0);

        let next = timers.write_control(0, ENABLE | IRQ | 1, 0x80);

        // 0x80 ticks left, now at F/64.
        assert_eq!(timers.read_counter(0, 0x80), 0xFF80);
        assert_eq!(timers.read_counter(0, 0x80 + 64), 0xFF81);
        assert_eq!(next, 0x2080);

        timers.process_events(0x207F, &mut irq);
        assert_eq!(irq.interrupt_request(), 0);
        let next = timers.process_events(1, &mut irq);
        assert_eq!(irq.interrupt_request(), Irq::Timer0.mask());
        // Later periods use the full reload at the new rate.
        assert_eq!(next, 0x100 << 6);
    }

    #[test]
    fn read_past_undispatched_overflow_restarts_from_reload() {
        let mut timers = Timers::default();
        timers.write_reload(0, 0xFFF0);
        timers.write_control(0, ENABLE, 0);

        assert_eq!(timers.read_counter(0, 0x0F), 0xFFFF);
        assert_eq!(timers.read_counter(0, 0x10), 0xFFF0);
        assert_eq!(timers.read_counter(0, 0x12), 0xFFF2);
        // Two whole periods late.
        assert_eq!(timers.read_counter(0, 0x10 + 0x20 + 3), 0xFFF3);
    }

    #[test]
    fn snapshot_restores_running_count() {
        let mut timers = Timers::default();
        let mut irq = InterruptControl::default();
        timers.write_reload(2, 0x1000);
        timers.write_control(2, ENABLE | IRQ | 1, 0);
        timers.process_events(64 * 0x30, &mut irq);

        let state = bincode::serialize(&timers).unwrap();
        let mut restored: Timers = bincode::deserialize(&state).unwrap();

        assert_eq!(restored.read_counter(2, 0), 0x1030);
        assert_eq!(restored.read_control(2), timers.read_control(2));
        assert_eq!(
            restored.process_events(0, &mut irq),
            timers.process_events(0, &mut irq)
        );
    }
}
