/// Monotonic serial number source for one owner.
///
/// Serials start at 1; 0 is the "no message" sentinel and is never handed out.
#[derive(Debug, Clone)]
pub struct SerialAllocator {
    next: u64,
}

impl SerialAllocator {
    /// Create an allocator whose first serial is 1.
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Hand out the next serial.
    pub fn allocate(&mut self) -> u64 {
        let serial = self.next;
        self.next += 1;
        serial
    }

    /// Highest serial allocated so far, or 0 if none.
    pub fn last(&self) -> u64 {
        self.next - 1
    }
}

impl Default for SerialAllocator {
    fn default() -> Self {
        Self::new()
    }
}
