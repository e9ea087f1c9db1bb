//! Simulated byte-addressable memory.
//!
//! One flat byte vector holds everything the program can take the
//! address of: globals and arrays in a data region bumping upward, and
//! locals in a stack region bumping downward from the top. Pointers are
//! absolute byte indices; words are little-endian.

/// Size of one storage cell in bytes.
pub const WORD: u32 = 4;

#[derive(Debug)]
pub struct Memory {
    bytes: Vec<u8>,
    data_top: u32,
    stack_ptr: u32,
}

impl Memory {
    pub fn new(size: u32) -> Self {
        Self {
            bytes: vec![0; size as usize],
            // Address zero stays unmapped so a null pointer traps.
            data_top: WORD,
            stack_ptr: size,
        }
    }

    /// Reserve `words` cells in the data region; returns the base address.
    pub fn alloc_data(&mut self, words: u32) -> Option<u32> {
        let base = self.data_top;
        let top = base.checked_add(words.checked_mul(WORD)?)?;
        if top > self.stack_ptr {
            return None;
        }
        self.data_top = top;
        Some(base)
    }

    /// Reserve `words` cells on the simulated stack; returns the base
    /// (lowest) address of the run.
    pub fn alloc_stack(&mut self, words: u32) -> Option<u32> {
        let bytes = words.checked_mul(WORD)?;
        let base = self.stack_ptr.checked_sub(bytes)?;
        if base < self.data_top {
            return None;
        }
        self.stack_ptr = base;
        Some(base)
    }

    /// Current stack pointer, for save/restore around scopes.
    #[inline]
    pub fn stack_mark(&self) -> u32 {
        self.stack_ptr
    }

    /// Free everything allocated since the given mark.
    #[inline]
    pub fn stack_release(&mut self, mark: u32) {
        debug_assert!(mark >= self.stack_ptr);
        self.stack_ptr = mark;
    }

    /// Load a little-endian word. `None` on an unmapped address.
    pub fn load(&self, addr: u32) -> Option<u32> {
        self.check(addr)?;
        let i = addr as usize;
        let bytes = [
            self.bytes[i],
            self.bytes[i + 1],
            self.bytes[i + 2],
            self.bytes[i + 3],
        ];
        Some(u32::from_le_bytes(bytes))
    }

    /// Store a little-endian word. `None` on an unmapped address.
    pub fn store(&mut self, addr: u32, value: u32) -> Option<()> {
        self.check(addr)?;
        let i = addr as usize;
        self.bytes[i..i + 4].copy_from_slice(&value.to_le_bytes());
        Some(())
    }

    fn check(&self, addr: u32) -> Option<()> {
        let end = addr.checked_add(WORD)?;
        if addr >= WORD && end as usize <= self.bytes.len() {
            Some(())
        } else {
            None
        }
    }
}
