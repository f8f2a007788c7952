use crate::error::{Result, StateError};

pub const MAGIC: [u8; 8] = *b"SVRDB\x00\x01\x00";
pub const VERSION_MAJOR: u16 = 1;
pub const VERSION_MINOR: u16 = 0;

/// Serialized size of the quick state block in bytes
pub const QSB_SIZE: usize = 112;

const RESERVED_LEN: usize = 60;
const CHECKSUM_OFFSET: usize = QSB_SIZE - 4;

/// Server run state recorded in the quick state block
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerRunState {
    #[default]
    Down = 0,
    Active = 1,
    Idle = 2,
    Terminating = 3,
    TerminatingDelayed = 4,
}

impl ServerRunState {
    /// Parse run state from its stored value
    pub fn from_u32(value: u32) -> Result<Self> {
        match value {
            0 => Ok(Self::Down),
            1 => Ok(Self::Active),
            2 => Ok(Self::Idle),
            3 => Ok(Self::Terminating),
            4 => Ok(Self::TerminatingDelayed),
            other => Err(StateError::UnknownServerState(other)),
        }
    }
}

/// Server quick state block
///
/// Fixed-size header at the start of the server database. It carries the
/// fields the server touches at high frequency, so it can be rewritten in
/// place without rewriting the attributes that follow it.
///
/// # Layout (little-endian)
///
/// ```text
/// 0   magic            [u8; 8]
/// 8   version_major    u16
/// 10  version_minor    u16
/// 12  block_size       u32   (always 112)
/// 16  state            u32
/// 20  num_jobs         u32
/// 24  num_queues       u32
/// 28  (padding)        u32
/// 32  next_job_id      u64
/// 40  save_time        i64
/// 48  reserved         [u8; 60]
/// 108 crc32            u32   (over bytes 0..108)
/// ```
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuickStateBlock {
    /// Magic number: "SVRDB\x00\x01\x00"
    pub magic: [u8; 8],

    /// Format version (major)
    pub version_major: u16,

    /// Format version (minor)
    pub version_minor: u16,

    /// Size of the block as written
    pub block_size: u32,

    /// Server run state
    pub state: ServerRunState,

    /// Number of jobs known to the server
    pub num_jobs: u32,

    /// Number of queues known to the server
    pub num_queues: u32,

    /// Next job sequence number to hand out
    pub next_job_id: u64,

    /// Time of the last full save (Unix seconds)
    pub save_time: i64,

    /// Reserved space for future extensions
    pub reserved: [u8; RESERVED_LEN],
}

impl QuickStateBlock {
    /// Create a new block with default values
    pub fn new() -> Self {
        QuickStateBlock {
            magic: MAGIC,
            version_major: VERSION_MAJOR,
            version_minor: VERSION_MINOR,
            block_size: QSB_SIZE as u32,
            state: ServerRunState::Down,
            num_jobs: 0,
            num_queues: 0,
            next_job_id: 0,
            save_time: 0,
            reserved: [0; RESERVED_LEN],
        }
    }

    /// Validate magic, version and recorded size
    pub fn validate(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(StateError::InvalidMagic);
        }

        // Exact match: a different layout must never be reinterpreted
        if self.version_major != VERSION_MAJOR || self.version_minor != VERSION_MINOR {
            return Err(StateError::UnsupportedVersion {
                major: self.version_major,
                minor: self.version_minor,
            });
        }

        if self.block_size != QSB_SIZE as u32 {
            return Err(StateError::HeaderSizeMismatch {
                found: self.block_size,
                expected: QSB_SIZE as u32,
            });
        }

        Ok(())
    }

    /// Stamp the save time with the current wall clock
    pub fn stamp_save_time(&mut self) {
        self.save_time = chrono::Utc::now().timestamp();
    }

    /// Serialize to exactly `QSB_SIZE` bytes, checksum included
    pub fn to_bytes(&self) -> [u8; QSB_SIZE] {
        let mut bytes = [0u8; QSB_SIZE];

        bytes[0..8].copy_from_slice(&self.magic);
        bytes[8..10].copy_from_slice(&self.version_major.to_le_bytes());
        bytes[10..12].copy_from_slice(&self.version_minor.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.block_size.to_le_bytes());
        bytes[16..20].copy_from_slice(&(self.state as u32).to_le_bytes());
        bytes[20..24].copy_from_slice(&self.num_jobs.to_le_bytes());
        bytes[24..28].copy_from_slice(&self.num_queues.to_le_bytes());
        // 28..32 padding
        bytes[32..40].copy_from_slice(&self.next_job_id.to_le_bytes());
        bytes[40..48].copy_from_slice(&self.save_time.to_le_bytes());
        bytes[48..CHECKSUM_OFFSET].copy_from_slice(&self.reserved);

        let crc = crc32fast::hash(&bytes[..CHECKSUM_OFFSET]);
        bytes[CHECKSUM_OFFSET..].copy_from_slice(&crc.to_le_bytes());

        bytes
    }

    /// Deserialize from bytes, validating layout and checksum
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < QSB_SIZE {
            return Err(StateError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "Insufficient bytes for quick state block",
            )));
        }

        let u32_at = |off: usize| {
            u32::from_le_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]])
        };
        let u64_at = |off: usize| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[off..off + 8]);
            u64::from_le_bytes(raw)
        };

        let mut block = QuickStateBlock::new();
        block.magic.copy_from_slice(&bytes[0..8]);
        block.version_major = u16::from_le_bytes([bytes[8], bytes[9]]);
        block.version_minor = u16::from_le_bytes([bytes[10], bytes[11]]);
        block.block_size = u32_at(12);

        // Layout checks come first so a foreign file reports why it is foreign
        block.validate()?;

        if crc32fast::hash(&bytes[..CHECKSUM_OFFSET]) != u32_at(CHECKSUM_OFFSET) {
            return Err(StateError::ChecksumMismatch);
        }

        block.state = ServerRunState::from_u32(u32_at(16))?;
        block.num_jobs = u32_at(20);
        block.num_queues = u32_at(24);
        block.next_job_id = u64_at(32);
        block.save_time = u64_at(40) as i64;
        block
            .reserved
            .copy_from_slice(&bytes[48..CHECKSUM_OFFSET]);

        Ok(block)
    }
}

impl Default for QuickStateBlock {
    fn default() -> Self {
        Self::new()
    }
}
