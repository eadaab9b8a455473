//! # Live CPUID Session
//!
//! Composes the stub selection and the executable buffer into a
//! queryable handle on the host CPU. Construction selects the ABI
//! variant, fills a buffer with its stub and binds the function
//! pointer once; every query after that is a plain native call.
//!
//! Dropping the session releases the buffer. Because release consumes
//! the session, a query after teardown is rejected by the compiler
//! rather than failing at run time.

use std::error;
use std::fmt;

use crate::cpu_information::{CpuInformation, CpuidResult};
use crate::exec_mem::{AllocationError, ExecutableBuffer};
use crate::opcodes::{AbiVariant, PlatformUnsupportedError};

/// The contract every stub implements. On each supported host,
/// `extern "C"` resolves to the convention the selected stub was
/// assembled for (System V, Win64 or cdecl).
type CpuidFn = unsafe extern "C" fn(*mut CpuidResult, u32);

/// Session construction failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// No stub exists for the host platform. Raised before any memory
    /// is allocated.
    Unsupported(PlatformUnsupportedError),
    /// The executable buffer could not be set up.
    Allocation(AllocationError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SessionError::Unsupported(e) => e.fmt(f),
            SessionError::Allocation(e) => e.fmt(f),
        }
    }
}

impl error::Error for SessionError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            SessionError::Unsupported(e) => Some(e),
            SessionError::Allocation(e) => Some(e),
        }
    }
}

impl From<PlatformUnsupportedError> for SessionError {
    fn from(e: PlatformUnsupportedError) -> Self {
        SessionError::Unsupported(e)
    }
}

impl From<AllocationError> for SessionError {
    fn from(e: AllocationError) -> Self {
        SessionError::Allocation(e)
    }
}

/// A handle for issuing `cpuid` queries on the host CPU.
///
/// Each query writes its result into a fresh stack value, so results
/// from one query are never overwritten by another. The session itself
/// holds no mutable state; wrap it in a lock (or build one per thread)
/// if you need concurrent access.
pub struct CpuidSession {
    variant: AbiVariant,
    code: ExecutableBuffer,
    func: CpuidFn,
}

impl CpuidSession {
    /// Build a session for the host CPU.
    ///
    /// Variant selection happens before the buffer is allocated, so an
    /// unsupported platform never touches executable memory.
    pub fn new() -> Result<CpuidSession, SessionError> {
        let variant = AbiVariant::host()?;
        let code = ExecutableBuffer::with_code(variant.opcodes())?;
        let func: CpuidFn = unsafe { code.as_fn() };

        Ok(CpuidSession {
            variant,
            code,
            func,
        })
    }

    /// The ABI variant the session's stub was assembled for.
    pub fn variant(&self) -> AbiVariant {
        self.variant
    }

    /// Execute `cpuid` for the given leaf.
    ///
    /// Blocking and synchronous; returns as soon as the instruction
    /// retires.
    pub fn query(&self, leaf: u32) -> CpuidResult {
        let mut regs = CpuidResult::default();
        unsafe {
            (self.func)(&mut regs, leaf);
        }
        regs
    }
}

impl CpuInformation for CpuidSession {
    fn cpuid(&self, leaf: u32) -> Option<CpuidResult> {
        Some(self.query(leaf))
    }
}

impl fmt::Debug for CpuidSession {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CpuidSession")
            .field("variant", &self.variant)
            .field("code", &self.code.as_ptr())
            .finish()
    }
}

#[cfg(test)]
#[cfg(any(target_arch = "x86_64", target_arch = "x86"))]
mod tests {
    use super::*;

    #[test]
    fn session_reports_the_host_variant() {
        let session = CpuidSession::new().expect("host to be supported");
        assert_eq!(session.variant(), AbiVariant::host().unwrap());
    }

    #[test]
    fn base_leaves_are_idempotent() {
        let session = CpuidSession::new().expect("host to be supported");

        let standard = session.query(0);
        let extended = session.query(0x8000_0000);

        assert_eq!(session.query(0), standard);
        assert_eq!(session.query(0x8000_0000), extended);
    }

    #[test]
    fn all_standard_leaves_can_be_queried() {
        let session = CpuidSession::new().expect("host to be supported");

        let highest = session.query(0).eax;
        // Any x86 CPU made this century supports at least leaf 1.
        assert!(highest >= 1);

        for leaf in 0..=highest {
            session.query(leaf);
        }
    }

    #[test]
    fn vendor_string_is_printable_ascii() {
        let session = CpuidSession::new().expect("host to be supported");

        let vendor = session.vendor_bytes().expect("leaf 0 to be readable");
        assert_eq!(vendor.len(), 12);
        assert!(vendor.iter().all(|b| b.is_ascii() && !b.is_ascii_control()));
    }

    #[test]
    fn queries_survive_an_earlier_session_teardown() {
        let first = CpuidSession::new().expect("host to be supported");
        let vendor = first.vendor_name();
        drop(first);

        let second = CpuidSession::new().expect("host to be supported");
        assert_eq!(second.vendor_name(), vendor);
    }
}
