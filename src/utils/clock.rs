use std::thread;
use std::time::{Duration, Instant};

use crate::hal::Clock;

/// [`Clock`] over `std::time`. Time counts from construction.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        SystemClock {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_us(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }

    fn delay_us(&mut self, us: u64) {
        thread::sleep(Duration::from_micros(us));
    }
}

#[test]
fn delay_moves_the_clock_forward() {
    let mut clock = SystemClock::new();
    let start = clock.now_us();
    clock.delay_ms(2);
    assert!(clock.elapsed_us(start) >= 2_000);
}
