use bitflags::bitflags;

bitflags! {
    /// One frame's controller input. Bits match the conventional
    /// replay-file order, MSB to LSB: right, left, down, up, start,
    /// select, B, A.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
    pub struct Buttons: u8 {
        const A = 0x01;
        const B = 0x02;
        const SELECT = 0x04;
        const START = 0x08;
        const UP = 0x10;
        const DOWN = 0x20;
        const LEFT = 0x40;
        const RIGHT = 0x80;
    }
}

impl Buttons {
    /// Swap each paired-opposite button: left/right, up/down,
    /// start/select, A/B.
    pub fn opposite(self) -> Buttons {
        let mut out = Buttons::empty();
        if self.contains(Buttons::RIGHT) {
            out |= Buttons::LEFT;
        }
        if self.contains(Buttons::LEFT) {
            out |= Buttons::RIGHT;
        }
        if self.contains(Buttons::DOWN) {
            out |= Buttons::UP;
        }
        if self.contains(Buttons::UP) {
            out |= Buttons::DOWN;
        }
        if self.contains(Buttons::START) {
            out |= Buttons::SELECT;
        }
        if self.contains(Buttons::SELECT) {
            out |= Buttons::START;
        }
        if self.contains(Buttons::B) {
            out |= Buttons::A;
        }
        if self.contains(Buttons::A) {
            out |= Buttons::B;
        }
        out
    }
}

/// Mask that strips the start and select buttons from proposals, so
/// the planner cannot pause the game or trigger menu cheats.
pub const NO_MENU_MASK: u8 = !(Buttons::START.bits() | Buttons::SELECT.bits());

/// Black-box deterministic game engine.
///
/// The planner only ever drives a game through this boundary: apply one
/// input for one step, snapshot/restore the full emulation state, and
/// read the observable memory. Implementations must be deterministic:
/// identical state plus identical input always produces an identical
/// resulting state and memory.
pub trait Engine {
    /// Advance the game by one step with the given controller input.
    fn step(&mut self, input: u8);

    /// Snapshot the full raw state, sufficient to resume from.
    fn save(&self) -> Vec<u8>;

    /// Restore a raw state previously produced by [`Engine::save`].
    fn load(&mut self, state: &[u8]);

    /// Read the observable game memory at this instant.
    fn read_memory(&self) -> Vec<u8>;
}
