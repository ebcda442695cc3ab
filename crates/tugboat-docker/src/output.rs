//! Chunk-safe output scanning.
//!
//! Container output arrives as arbitrary byte chunks: a log line, or a
//! sentinel token, can be split anywhere. [`OutputScanner`] does two things
//! at once over that stream: it assembles complete lines for logging
//! (buffering the un-terminated tail until the next chunk), and it scans
//! the raw bytes for marker tokens, carrying enough of the previous chunk
//! that a marker split across boundaries is still caught.

/// Incremental scanner over a chunked byte stream.
pub struct OutputScanner {
    markers: Vec<Vec<u8>>,
    hits: Vec<bool>,
    /// Trailing bytes of the scanned stream, long enough to complete any
    /// marker that started in a previous chunk.
    carry: Vec<u8>,
    /// Bytes of the current, not yet terminated line.
    line: Vec<u8>,
}

impl OutputScanner {
    pub fn new(markers: &[&str]) -> Self {
        Self {
            markers: markers.iter().map(|m| m.as_bytes().to_vec()).collect(),
            hits: vec![false; markers.len()],
            carry: Vec::new(),
            line: Vec::new(),
        }
    }

    /// Feed one chunk, returning the lines it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        // Marker scan runs over the carry plus the new bytes; hits latch.
        let mut scan = Vec::with_capacity(self.carry.len() + chunk.len());
        scan.extend_from_slice(&self.carry);
        scan.extend_from_slice(chunk);
        for (marker, hit) in self.markers.iter().zip(self.hits.iter_mut()) {
            if !*hit && contains(&scan, marker) {
                *hit = true;
            }
        }
        let keep = self
            .markers
            .iter()
            .map(|m| m.len().saturating_sub(1))
            .max()
            .unwrap_or(0)
            .min(scan.len());
        self.carry = scan[scan.len() - keep..].to_vec();

        // Line assembly: drain every complete line, keep the partial tail.
        self.line.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.line.iter().position(|&b| b == b'\n') {
            let mut raw: Vec<u8> = self.line.drain(..=pos).collect();
            raw.pop();
            if raw.last() == Some(&b'\r') {
                raw.pop();
            }
            lines.push(String::from_utf8_lossy(&raw).into_owned());
        }
        lines
    }

    /// Flush the remaining partial line at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        if self.line.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.line);
        Some(String::from_utf8_lossy(&raw).into_owned())
    }

    /// Whether the given marker has been seen anywhere in the stream.
    pub fn matched(&self, marker: &str) -> bool {
        self.markers
            .iter()
            .position(|m| m == marker.as_bytes())
            .is_some_and(|i| self.hits[i])
    }

    /// Whether any marker has been seen.
    pub fn matched_any(&self) -> bool {
        self.hits.iter().any(|&h| h)
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty()
        && needle.len() <= haystack.len()
        && haystack.windows(needle.len()).any(|w| w == needle)
}
