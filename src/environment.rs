use rustc_hash::FxHashMap;

use crate::runtime::Value;

/// Dynamically scoped variable storage. Reads walk the frame stack from the
/// innermost frame outward, then fall back to the read-only globals table.
/// Writes always land in the innermost frame.
pub struct Environment {
    globals: FxHashMap<String, Value>,
    frames: Vec<FxHashMap<String, Value>>,
}

impl Environment {
    pub fn new(globals: FxHashMap<String, Value>) -> Self {
        Environment {
            globals,
            frames: vec![FxHashMap::default()],
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        for frame in self.frames.iter().rev() {
            if let Some(value) = frame.get(name) {
                return Some(value);
            }
        }
        self.globals.get(name)
    }

    pub fn set(&mut self, name: String, value: Value) {
        if let Some(frame) = self.frames.last_mut() {
            frame.insert(name, value);
        }
    }

    pub fn push_frame(&mut self) {
        self.frames.push(FxHashMap::default());
    }

    /// The base frame is never popped.
    pub fn pop_frame(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}
