// Fixed-capacity circular buffer with explicit read/write cursors.
//
// The backing store holds `capacity + 1` slots; the extra slot distinguishes a
// full buffer from an empty one. Reading is destructive only in the sense that
// it advances the read cursor: values stay in place, so `rewind()` can expose
// the whole window again. Stages use this to keep overlapping sliding windows
// over samples and tensor frames.

pub struct RingBuffer<T> {
    data: Vec<T>,
    size: usize,
    read_pos: usize,
    write_pos: usize,
}

impl<T: Clone> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity + 1),
            size: capacity + 1,
            read_pos: 0,
            write_pos: 0,
        }
    }

    /// Maximum number of elements that can be stored.
    pub fn capacity(&self) -> usize {
        self.size - 1
    }

    /// True if no elements can be read.
    pub fn is_empty(&self) -> bool {
        self.read_pos == self.write_pos
    }

    /// True if no elements can be written.
    pub fn is_full(&self) -> bool {
        self.pos(self.write_pos + 1) == self.read_pos
    }

    /// Number of unread elements.
    pub fn len(&self) -> usize {
        (self.write_pos + self.size - self.read_pos) % self.size
    }

    /// Moves the read cursor to the oldest slot of the full window, making
    /// every stored element readable again.
    pub fn rewind(&mut self) -> &mut Self {
        self.read_pos = self.pos(self.write_pos + 1);
        self
    }

    /// Advances the read cursor by `elems`.
    pub fn seek(&mut self, elems: usize) -> &mut Self {
        self.read_pos = self.pos(self.read_pos + elems);
        self
    }

    /// Marks the buffer empty without touching stored values.
    pub fn reset(&mut self) -> &mut Self {
        self.read_pos = self.write_pos;
        self
    }

    /// Writes `value` into every remaining slot until the buffer is full.
    pub fn fill(&mut self, value: T) -> &mut Self {
        while !self.is_full() {
            self.write(value.clone());
        }
        self
    }

    /// Reads the next value.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is empty. Callers check `is_empty` first.
    pub fn read(&mut self) -> T {
        if self.is_empty() {
            panic!("ring buffer empty");
        }
        let value = self.data[self.read_pos].clone();
        self.read_pos = self.pos(self.read_pos + 1);
        value
    }

    /// Writes `value` at the write cursor.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is full. Callers check `is_full` first.
    pub fn write(&mut self, value: T) {
        if self.is_full() {
            panic!("ring buffer full");
        }
        if self.write_pos == self.data.len() {
            self.data.push(value);
        } else {
            self.data[self.write_pos] = value;
        }
        self.write_pos = self.pos(self.write_pos + 1);
    }

    /// Rewinds and drains the window into a vector, oldest first. Leaves the
    /// buffer read-exhausted; the stored values survive for the next rewind.
    /// Slots never written (a window not yet filled once) are skipped.
    pub fn to_vec(&mut self) -> Vec<T> {
        self.rewind();
        let mut out = Vec::with_capacity(self.capacity());
        while !self.is_empty() {
            if let Some(value) = self.data.get(self.read_pos) {
                out.push(value.clone());
            }
            self.read_pos = self.pos(self.read_pos + 1);
        }
        out
    }

    /// Same ordering as `to_vec`, without moving the read cursor.
    pub fn snapshot(&self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.capacity());
        let mut pos = self.pos(self.write_pos + 1);
        while pos != self.write_pos {
            if let Some(value) = self.data.get(pos) {
                out.push(value.clone());
            }
            pos = self.pos(pos + 1);
        }
        out
    }

    fn pos(&self, x: usize) -> usize {
        x % self.size
    }
}
