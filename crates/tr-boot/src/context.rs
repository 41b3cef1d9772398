//! Execution context handed over by the loader

use bytemuck::{Pod, Zeroable};
use tr_core::BootError;
use tracing::{debug, warn};

/// "rtb_ctx" in little-endian
pub const CONTEXT_MAGIC: u64 = 0x0078_7463_5f62_7472;

/// Context layout revision understood by this runtime
pub const CONTEXT_VERSION: u32 = 1;

/// Size of [`RawContext`], which the loader must report
pub const CONTEXT_SIZE: u32 = std::mem::size_of::<RawContext>() as u32;

/// In-memory layout of the context as written by the loader
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct RawContext {
    pub magic: u64,
    pub version: u32,
    pub size: u32,
    pub argc: u64,
    pub argv: u64,
    pub mem_base: u64,
    pub mem_size: u64,
    pub log_buffer: u64,
    pub log_length: u64,
    pub std_socket: i32,
    pub has_bsd: u32,
    pub return_flags: u64,
}

impl RawContext {
    /// Read a context from loader memory
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        bytes
            .get(..std::mem::size_of::<Self>())
            .map(bytemuck::pod_read_unaligned)
    }
}

/// Context shared between the loader and the runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    pub magic: u64,
    pub version: u32,
    pub size: u32,
    pub argv: Vec<String>,
    pub mem_base: u64,
    pub mem_size: u64,
    pub std_socket: i32,
    pub has_bsd: bool,
    /// Written back for the loader
    pub return_flags: u64,
    /// Bytes in the log buffer when `main` returned
    pub log_length: usize,
}

impl ExecutionContext {
    /// A well-formed context with the given arguments
    pub fn new(argv: Vec<String>) -> Self {
        Self {
            magic: CONTEXT_MAGIC,
            version: CONTEXT_VERSION,
            size: CONTEXT_SIZE,
            argv,
            ..Self::empty()
        }
    }

    /// The all-zero context used when running without a loader
    pub fn empty() -> Self {
        Self {
            magic: 0,
            version: 0,
            size: 0,
            argv: Vec::new(),
            mem_base: 0,
            mem_size: 0,
            std_socket: 0,
            has_bsd: false,
            return_flags: 0,
            log_length: 0,
        }
    }

    /// Build from the loader's raw layout; `argv` has already been
    /// read out of loader memory
    pub fn from_raw(raw: &RawContext, argv: Vec<String>) -> Self {
        Self {
            magic: raw.magic,
            version: raw.version,
            size: raw.size,
            argv,
            mem_base: raw.mem_base,
            mem_size: raw.mem_size,
            std_socket: raw.std_socket,
            has_bsd: raw.has_bsd != 0,
            return_flags: raw.return_flags,
            log_length: raw.log_length as usize,
        }
    }

    /// Check magic, version and size, in that order
    ///
    /// Once the magic matches, the loader-visible fields are reset even if
    /// a later check fails, so the loader can still read the log.
    pub fn validate(&mut self) -> Result<(), BootError> {
        debug!(
            "Context magic 0x{:x}, version {}, size 0x{:x}",
            self.magic, self.version, self.size
        );

        if self.magic != CONTEXT_MAGIC {
            warn!("Invalid context magic");
            return Err(BootError::InvalidMagic(self.magic));
        }

        self.return_flags = 0;
        self.log_length = 0;

        if self.version != CONTEXT_VERSION {
            warn!("Mismatched context version");
            return Err(BootError::VersionMismatch {
                found: self.version,
                expected: CONTEXT_VERSION,
            });
        }

        if self.size != CONTEXT_SIZE {
            warn!("Mismatched context size");
            return Err(BootError::SizeMismatch {
                found: self.size,
                expected: CONTEXT_SIZE,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> ExecutionContext {
        ExecutionContext::new(vec!["app".to_string()])
    }

    #[test]
    fn test_magic_spells_name() {
        assert_eq!(&CONTEXT_MAGIC.to_le_bytes()[..7], b"rtb_ctx");
        assert_eq!(CONTEXT_SIZE, 0x50);
    }

    #[test]
    fn test_valid_context() {
        let mut ctx = context();
        ctx.return_flags = 7;
        assert_eq!(ctx.validate(), Ok(()));
        assert_eq!(ctx.return_flags, 0);
    }

    #[test]
    fn test_bad_magic_leaves_fields_alone() {
        let mut ctx = context();
        ctx.magic = 0xdead;
        ctx.return_flags = 7;

        let err = ctx.validate().unwrap_err();
        assert_eq!(err, BootError::InvalidMagic(0xdead));
        assert_eq!(err.exit_code(), -2);
        assert_eq!(ctx.return_flags, 7);
    }

    #[test]
    fn test_version_checked_after_fields_reset() {
        let mut ctx = context();
        ctx.version = 2;
        ctx.size = 0;
        ctx.return_flags = 7;

        let err = ctx.validate().unwrap_err();
        assert_eq!(err, BootError::VersionMismatch { found: 2, expected: 1 });
        assert_eq!(err.exit_code(), -2);
        assert_eq!(ctx.return_flags, 0);
    }

    #[test]
    fn test_size_mismatch() {
        let mut ctx = context();
        ctx.size = CONTEXT_SIZE + 8;
        assert_eq!(ctx.validate().unwrap_err().exit_code(), -3);
    }

    #[test]
    fn test_parse_raw() {
        let raw = RawContext {
            magic: CONTEXT_MAGIC,
            version: CONTEXT_VERSION,
            size: CONTEXT_SIZE,
            argc: 1,
            std_socket: 5,
            has_bsd: 1,
            ..RawContext::default()
        };
        let bytes = bytemuck::bytes_of(&raw).to_vec();

        let parsed = RawContext::parse(&bytes).unwrap();
        let mut ctx = ExecutionContext::from_raw(&parsed, vec!["app".to_string()]);
        assert!(ctx.has_bsd);
        assert_eq!(ctx.std_socket, 5);
        assert_eq!(ctx.validate(), Ok(()));

        assert!(RawContext::parse(&bytes[..0x20]).is_none());
    }
}
