//! Append-only buffer of recorded fragments

/// Fragments in arrival order
#[derive(Debug, Default, Clone)]
pub struct FragmentBuffer {
    fragments: Vec<Vec<u8>>,
    total_bytes: usize,
}

impl FragmentBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment; empty payloads are refused
    pub fn push(&mut self, data: Vec<u8>) -> bool {
        if data.is_empty() {
            return false;
        }
        self.total_bytes += data.len();
        self.fragments.push(data);
        true
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Sizes of the buffered fragments, in order
    pub fn sizes(&self) -> Vec<usize> {
        self.fragments.iter().map(Vec::len).collect()
    }

    /// Concatenate every fragment in insertion order
    pub fn concat(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.total_bytes);
        for fragment in &self.fragments {
            out.extend_from_slice(fragment);
        }
        out
    }

    pub fn clear(&mut self) {
        self.fragments.clear();
        self.total_bytes = 0;
    }
}
