use std::collections::VecDeque;
use std::time::Instant;

pub const DEFAULT_FPS_WINDOW: usize = 30;

/// Rolling frame-rate estimate over the last `window` ticks.
#[derive(Debug)]
pub struct FpsCounter {
    window: usize,
    ticks: VecDeque<Instant>,
}

impl FpsCounter {
    pub fn new(window: usize) -> Self {
        let window = window.max(2);
        Self {
            window,
            ticks: VecDeque::with_capacity(window + 1),
        }
    }

    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    pub fn tick_at(&mut self, at: Instant) {
        self.ticks.push_back(at);
        while self.ticks.len() > self.window {
            self.ticks.pop_front();
        }
    }

    /// Frames per second across the window; 0 until two ticks are recorded.
    pub fn fps(&self) -> f64 {
        let (Some(first), Some(last)) = (self.ticks.front(), self.ticks.back()) else {
            return 0.0;
        };
        let span = last.duration_since(*first).as_secs_f64();
        if self.ticks.len() < 2 || span <= 0.0 {
            return 0.0;
        }
        (self.ticks.len() - 1) as f64 / span
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new(DEFAULT_FPS_WINDOW)
    }
}
