//! A tiny deterministic game used by tests and the standalone demo.
//!
//! The "game" is a walk along a line: right moves the player forward,
//! left moves it back, and lasting progress is the furthest point ever
//! reached. The full engine state is twelve bytes, of which the first
//! eight are the observable memory, so codec, cache, and planner
//! behavior can be exercised end to end without a real emulator.

use crate::engine::{Buttons, Engine};

pub const MEMORY_LEN: usize = 8;

/// Observable memory layout, by offset:
/// 0: player x, 1: player y, 2: furthest x reached, 3: coins,
/// 4: stamina, 5..8: unused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToyEngine {
    mem: [u8; MEMORY_LEN],
    frame: u32,
}

impl ToyEngine {
    pub fn new() -> Self {
        let mut mem = [0u8; MEMORY_LEN];
        mem[4] = 100;
        Self { mem, frame: 0 }
    }
}

impl Default for ToyEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for ToyEngine {
    fn step(&mut self, input: u8) {
        let buttons = Buttons::from_bits_truncate(input);
        self.frame = self.frame.wrapping_add(1);

        if buttons.contains(Buttons::RIGHT) {
            self.mem[0] = self.mem[0].saturating_add(1);
        }
        if buttons.contains(Buttons::LEFT) {
            self.mem[0] = self.mem[0].saturating_sub(1);
        }
        if buttons.contains(Buttons::UP) {
            self.mem[1] = self.mem[1].saturating_add(1);
        }
        if buttons.contains(Buttons::DOWN) {
            self.mem[1] = self.mem[1].saturating_sub(1);
        }

        if self.mem[0] > self.mem[2] {
            self.mem[2] = self.mem[0];
            // A coin every eighth step of fresh ground.
            if self.mem[2] % 8 == 0 {
                self.mem[3] = self.mem[3].saturating_add(1);
            }
        }

        // Jumping is tiring; standing still recovers.
        if buttons.contains(Buttons::A) {
            self.mem[4] = self.mem[4].saturating_sub(2);
        } else if buttons.is_empty() {
            self.mem[4] = self.mem[4].saturating_add(1).min(100);
        }
    }

    fn save(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(MEMORY_LEN + 4);
        out.extend_from_slice(&self.mem);
        out.extend_from_slice(&self.frame.to_le_bytes());
        out
    }

    fn load(&mut self, state: &[u8]) {
        assert_eq!(
            state.len(),
            MEMORY_LEN + 4,
            "toy state must be {} bytes, got {}",
            MEMORY_LEN + 4,
            state.len()
        );
        self.mem.copy_from_slice(&state[..MEMORY_LEN]);
        self.frame = u32::from_le_bytes([
            state[MEMORY_LEN],
            state[MEMORY_LEN + 1],
            state[MEMORY_LEN + 2],
            state[MEMORY_LEN + 3],
        ]);
    }

    fn read_memory(&self) -> Vec<u8> {
        self.mem.to_vec()
    }
}
