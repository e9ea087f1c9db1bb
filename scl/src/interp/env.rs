//! Lexical environments.
//!
//! Frames live in an arena indexed by integer handles; each frame keeps
//! its parent handle. Function frames parent to the global frame, which
//! is what makes the language lexically rather than dynamically scoped.
//! Frames are pushed and popped in strict LIFO order.
use std::collections::HashMap;

use smol_str::SmolStr;

use crate::ast::Ty;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameId(usize);

/// Storage bound to a name.
///
/// Scalars and arrays live in the simulated memory; `register`
/// variables live in the hardware register file.
#[derive(Debug, Clone)]
pub enum Slot {
    Scalar { addr: u32, ty: Ty, volatile: bool },
    Array { base: u32, len: u32, ty: Ty },
    HardReg { reg: u8, ty: Ty },
}

#[derive(Debug)]
struct Frame {
    vars: HashMap<SmolStr, Slot>,
    parent: Option<FrameId>,
}

#[derive(Debug)]
pub struct Frames {
    frames: Vec<Frame>,
}

impl Frames {
    /// Creates the arena with the global frame already in place.
    pub fn new() -> Self {
        Self {
            frames: vec![Frame {
                vars: HashMap::new(),
                parent: None,
            }],
        }
    }

    #[inline]
    pub fn global(&self) -> FrameId {
        FrameId(0)
    }

    pub fn push(&mut self, parent: FrameId) -> FrameId {
        let id = FrameId(self.frames.len());
        self.frames.push(Frame {
            vars: HashMap::new(),
            parent: Some(parent),
        });
        id
    }

    /// Destroy the given frame. Teardown must mirror creation order.
    pub fn pop(&mut self, id: FrameId) {
        debug_assert_eq!(id.0, self.frames.len() - 1, "frames must pop in LIFO order");
        self.frames.truncate(id.0);
    }

    /// Bind a name in the given frame, shadowing any outer binding.
    pub fn declare(&mut self, frame: FrameId, name: SmolStr, slot: Slot) {
        self.frames[frame.0].vars.insert(name, slot);
    }

    /// Walk the parent chain for the nearest binding.
    pub fn lookup(&self, frame: FrameId, name: &str) -> Option<&Slot> {
        let mut current = Some(frame);
        while let Some(id) = current {
            let frame = &self.frames[id.0];
            if let Some(slot) = frame.vars.get(name) {
                return Some(slot);
            }
            current = frame.parent;
        }
        None
    }
}

impl Default for Frames {
    fn default() -> Self {
        Self::new()
    }
}
