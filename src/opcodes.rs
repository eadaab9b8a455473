//! # CPUID Stub Machine Code
//!
//! Hand-assembled `cpuid` stubs, one per calling convention we can run
//! under. Every stub implements the same contract: the first argument
//! is a pointer to a 16-byte output buffer, the second argument is the
//! leaf. The stub zeroes `ecx` before the instruction so the subleaf is
//! always 0, then stores eax/ebx/ecx/edx at byte offsets 0/4/8/12 of
//! the output buffer.
//!
//! `cpuid` clobbers `ebx`, which is callee-saved under all three ABIs,
//! so every stub saves and restores it. The cdecl variant additionally
//! uses `edi` as scratch and saves that too.

use std::mem;

/// Input registers: %rdi = output pointer, %esi = leaf.
static POSIX_64_OPC: [u8; 21] = [
    0x53, // push   %rbx
    0x48, 0x89, 0xf0, // mov    %rsi,%rax
    0x31, 0xc9, // xor    %ecx,%ecx
    0x0f, 0xa2, // cpuid
    0x89, 0x07, // mov    %eax,(%rdi)
    0x89, 0x5f, 0x04, // mov    %ebx,0x4(%rdi)
    0x89, 0x4f, 0x08, // mov    %ecx,0x8(%rdi)
    0x89, 0x57, 0x0c, // mov    %edx,0xc(%rdi)
    0x5b, // pop    %rbx
    0xc3, // retq
];

/// Input registers: %rcx = output pointer, %edx = leaf. The output
/// pointer is parked in the volatile %r9 across the instruction.
static WINDOWS_64_OPC: [u8; 27] = [
    0x53, // push   %rbx
    0x89, 0xd0, // mov    %edx,%eax
    0x49, 0x89, 0xc9, // mov    %rcx,%r9
    0x31, 0xc9, // xor    %ecx,%ecx
    0x0f, 0xa2, // cpuid
    0x41, 0x89, 0x01, // mov    %eax,(%r9)
    0x41, 0x89, 0x59, 0x04, // mov    %ebx,0x4(%r9)
    0x41, 0x89, 0x49, 0x08, // mov    %ecx,0x8(%r9)
    0x41, 0x89, 0x51, 0x0c, // mov    %edx,0xc(%r9)
    0x5b, // pop    %rbx
    0xc3, // retq
];

/// Stack arguments: 0x4(%esp) = output pointer, 0x8(%esp) = leaf
/// (offsets before the two saves below shift them by 8).
static CDECL_32_OPC: [u8; 28] = [
    0x53, // push   %ebx
    0x57, // push   %edi
    0x8b, 0x7c, 0x24, 0x0c, // mov    0xc(%esp),%edi
    0x8b, 0x44, 0x24, 0x10, // mov    0x10(%esp),%eax
    0x31, 0xc9, // xor    %ecx,%ecx
    0x0f, 0xa2, // cpuid
    0x89, 0x07, // mov    %eax,(%edi)
    0x89, 0x5f, 0x04, // mov    %ebx,0x4(%edi)
    0x89, 0x4f, 0x08, // mov    %ecx,0x8(%edi)
    0x89, 0x57, 0x0c, // mov    %edx,0xc(%edi)
    0x5f, // pop    %edi
    0x5b, // pop    %ebx
    0xc3, // ret
];

/// The host is not a supported OS-family/architecture/pointer-width
/// combination. Constructed before any memory is touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformUnsupportedError {
    pub os: &'static str,
    pub arch: &'static str,
    pub pointer_width: usize,
}

impl std::fmt::Display for PlatformUnsupportedError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "No cpuid stub for this platform (os {}, arch {}, {}-byte pointers)",
            self.os, self.arch, self.pointer_width
        )
    }
}

impl std::error::Error for PlatformUnsupportedError {}

/// The calling-convention variants a stub exists for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbiVariant {
    Posix64,
    Windows64,
    Cdecl32,
}

impl AbiVariant {
    /// Select the variant matching the host OS family and pointer
    /// width, or fail if no stub fits.
    pub fn host() -> Result<AbiVariant, PlatformUnsupportedError> {
        let unsupported = || PlatformUnsupportedError {
            os: std::env::consts::OS,
            arch: std::env::consts::ARCH,
            pointer_width: mem::size_of::<usize>(),
        };

        if !cfg!(any(target_arch = "x86", target_arch = "x86_64")) {
            return Err(unsupported());
        }

        match (cfg!(windows), cfg!(unix), mem::size_of::<usize>()) {
            (true, _, 8) => Ok(AbiVariant::Windows64),
            (true, _, 4) => Ok(AbiVariant::Cdecl32),
            (false, true, 8) => Ok(AbiVariant::Posix64),
            (false, true, 4) => Ok(AbiVariant::Cdecl32),
            _ => Err(unsupported()),
        }
    }

    /// The machine code implementing the stub contract for this
    /// variant.
    pub fn opcodes(self) -> &'static [u8] {
        match self {
            AbiVariant::Posix64 => &POSIX_64_OPC,
            AbiVariant::Windows64 => &WINDOWS_64_OPC,
            AbiVariant::Cdecl32 => &CDECL_32_OPC,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CPUID: [u8; 2] = [0x0f, 0xa2];

    fn contains_cpuid(code: &[u8]) -> bool {
        code.windows(CPUID.len()).any(|w| w == CPUID)
    }

    #[test]
    fn all_variants_contain_cpuid_and_return() {
        for variant in [AbiVariant::Posix64, AbiVariant::Windows64, AbiVariant::Cdecl32].iter() {
            let code = variant.opcodes();
            assert!(contains_cpuid(code), "{:?} is missing cpuid", variant);
            assert_eq!(*code.last().unwrap(), 0xc3, "{:?} does not end in ret", variant);
        }
    }

    #[test]
    fn all_variants_preserve_rbx() {
        for variant in [AbiVariant::Posix64, AbiVariant::Windows64, AbiVariant::Cdecl32].iter() {
            let code = variant.opcodes();
            assert_eq!(code[0], 0x53, "{:?} does not start with push rbx", variant);
            assert_eq!(code[code.len() - 2], 0x5b, "{:?} does not restore rbx", variant);
        }
    }

    #[test]
    fn all_variants_zero_the_subleaf() {
        for variant in [AbiVariant::Posix64, AbiVariant::Windows64, AbiVariant::Cdecl32].iter() {
            let code = variant.opcodes();
            let cpuid_at = code
                .windows(CPUID.len())
                .position(|w| w == CPUID)
                .expect("cpuid present");
            assert_eq!(
                &code[cpuid_at - 2..cpuid_at],
                &[0x31, 0xc9],
                "{:?} does not xor ecx before cpuid",
                variant
            );
        }
    }

    #[test]
    #[cfg(all(unix, target_arch = "x86_64"))]
    fn host_selects_posix_64() {
        assert_eq!(AbiVariant::host(), Ok(AbiVariant::Posix64));
    }

    #[test]
    #[cfg(all(windows, target_arch = "x86_64"))]
    fn host_selects_windows_64() {
        assert_eq!(AbiVariant::host(), Ok(AbiVariant::Windows64));
    }

    #[test]
    #[cfg(target_arch = "x86")]
    fn host_selects_cdecl_32() {
        assert_eq!(AbiVariant::host(), Ok(AbiVariant::Cdecl32));
    }

    #[test]
    fn unsupported_error_is_descriptive() {
        let err = PlatformUnsupportedError {
            os: "linux",
            arch: "aarch64",
            pointer_width: 8,
        };
        let msg = err.to_string();
        assert!(msg.contains("aarch64"));
        assert!(msg.contains("8-byte"));
    }
}
