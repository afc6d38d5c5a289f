use crate::bytecode::MAX_REGISTERS;

use super::Value;

pub const MAX_FRAMES: usize = 2048;
const CAPACITY: usize = MAX_FRAMES * MAX_REGISTERS;

static NIL: Value = Value::Nil;

/// The register file shared by every active call. Each frame addresses a
/// window starting at its base.
pub struct Registers {
    storage: Vec<Value>,
}

impl Registers {
    pub fn new() -> Self {
        Registers {
            storage: Vec::with_capacity(MAX_REGISTERS),
        }
    }

    /// Makes `base..base + size` addressable and resets it to nil. Returns
    /// false when the window does not fit in the register file.
    pub fn open_window(&mut self, base: usize, size: usize) -> bool {
        let end = base + size;
        if end > CAPACITY {
            return false;
        }
        if self.storage.len() < end {
            self.storage.resize(end, Value::Nil);
        }
        self.storage[base..end].fill(Value::Nil);
        true
    }

    /// Drops every register from `base` upwards.
    pub fn close_window(&mut self, base: usize) {
        self.storage.truncate(base);
    }

    pub fn get(&self, index: usize) -> &Value {
        self.storage.get(index).unwrap_or(&NIL)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Value> {
        self.storage.get_mut(index)
    }

    pub fn set(&mut self, index: usize, value: Value) {
        if index >= self.storage.len() && index < CAPACITY {
            self.storage.resize(index + 1, Value::Nil);
        }
        if let Some(slot) = self.storage.get_mut(index) {
            *slot = value;
        }
    }

    pub fn window(&self, base: usize, len: usize) -> &[Value] {
        let start = base.min(self.storage.len());
        let end = (base + len).min(self.storage.len());
        &self.storage[start..end]
    }

    pub fn clear(&mut self) {
        self.storage.clear();
    }

    #[cfg(feature = "trace")]
    pub fn display_window(&self, base: usize, len: usize) -> String {
        let mut text = String::from("          ");
        for value in self.window(base, len) {
            text.push_str(&format!("[ {} ]", value));
        }
        text
    }
}
