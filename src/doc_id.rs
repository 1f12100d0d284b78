/// A stable document identifier derived from the manual's path relative to
/// the manuals directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentId {
    /// The numeric ID used as the key in redb tables.
    pub numeric: u64,
    /// The short hex string for human display (e.g. "a1b2c3").
    pub short: String,
}

impl DocumentId {
    /// Generate a stable document ID from a relative path.
    ///
    /// The top 16 bits are always zero so that [`chunk_id`] can encode the
    /// chunk index there without colliding with another document.
    pub fn new(relative_path: &str) -> Self {
        let numeric = Self::hash_path(relative_path);
        let short = Self::short_hex(numeric, 6);
        Self { numeric, short }
    }

    /// Rebuild an ID from its numeric form (e.g. read back from the index).
    pub fn from_numeric(numeric: u64) -> Self {
        Self {
            numeric,
            short: Self::short_hex(numeric, 6),
        }
    }

    fn hash_path(relative_path: &str) -> u64 {
        let hash = blake3::hash(relative_path.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&hash.as_bytes()[..8]);
        u64::from_le_bytes(bytes) & DOCUMENT_MASK
    }

    fn short_hex(value: u64, len: usize) -> String {
        // Skip the four always-zero leading hex digits.
        let full = format!("{value:016x}");
        full[4..4 + len].to_string()
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.short)
    }
}

const CHUNK_SHIFT: u32 = 48;
const DOCUMENT_MASK: u64 = (1 << CHUNK_SHIFT) - 1;

/// Maximum number of chunks a single document can hold.
pub const MAX_CHUNKS_PER_DOCUMENT: usize = 1 << 16;

/// Generate a chunk ID by combining the document ID with the chunk index.
///
/// Format: `document_id | (chunk_index << 48)`.
///
/// # Examples
///
/// ```
/// use manualrag::doc_id::{chunk_id, parse_chunk_id, DocumentId};
///
/// let doc = DocumentId::new("claims/Claims Manual.pdf");
/// assert_eq!(chunk_id(doc.numeric, 0), doc.numeric);
///
/// let id = chunk_id(doc.numeric, 3);
/// assert_eq!(parse_chunk_id(id), (doc.numeric, 3));
/// ```
pub fn chunk_id(document_id: u64, chunk_index: usize) -> u64 {
    (document_id & DOCUMENT_MASK) | ((chunk_index as u64) << CHUNK_SHIFT)
}

/// Split a chunk ID into its document ID and chunk index.
pub fn parse_chunk_id(chunk_id: u64) -> (u64, usize) {
    (chunk_id & DOCUMENT_MASK, (chunk_id >> CHUNK_SHIFT) as usize)
}
