use std::{
    collections::HashMap,
    fmt, fs,
    path::{Path, PathBuf},
};

use elf::{
    abi::{EM_AARCH64, EM_X86_64, SHF_ALLOC, SHF_EXECINSTR, STT_FUNC},
    endian::AnyEndian,
    ElfBytes,
};
use log::debug;

use super::{detect_toolchain, GoVersion, InspectError};
use crate::core::scan::{scan_return_sites, FunctionSite};

/// CPU architectures we know how to scan.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Architecture {
    X86_64,
    Arm64,
}

impl Architecture {
    fn from_machine(machine: u16) -> Result<Architecture, InspectError> {
        match machine {
            EM_X86_64 => Ok(Architecture::X86_64),
            EM_AARCH64 => Ok(Architecture::Arm64),
            x => Err(InspectError::UnsupportedArchitecture(x)),
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Architecture::X86_64 => write!(f, "x86_64"),
            Architecture::Arm64 => write!(f, "arm64"),
        }
    }
}

/// Function symbol.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct Symbol {
    /// Virtual address.
    pub(crate) address: u64,
    /// Size in bytes, 0 if unknown.
    pub(crate) size: u64,
}

/// Allocated and executable section.
#[derive(Clone, Copy, Debug)]
struct ExecSection {
    addr: u64,
    offset: u64,
    size: u64,
}

impl ExecSection {
    fn contains(&self, addr: u64) -> bool {
        addr >= self.addr && addr < self.addr.saturating_add(self.size)
    }

    fn to_offset(self, addr: u64) -> u64 {
        addr - self.addr + self.offset
    }
}

/// Result of the inspection of one binary. It owns the binary image so
/// functions can be scanned without reading the file again.
pub(crate) struct BinaryDescriptor {
    pub(crate) path: PathBuf,
    pub(crate) architecture: Architecture,
    /// Toolchain version, only detected for Go binaries.
    pub(crate) toolchain: Option<GoVersion>,
    symbols: HashMap<String, Symbol>,
    sections: Vec<ExecSection>,
    image: Vec<u8>,
}

impl BinaryDescriptor {
    pub(crate) fn symbol(&self, name: &str) -> Result<&Symbol, InspectError> {
        self.symbols
            .get(name)
            .ok_or_else(|| InspectError::SymbolNotFound(name.to_string()))
    }

    pub(crate) fn has_symbol(&self, name: &str) -> bool {
        self.symbols.contains_key(name)
    }

    fn section_of(&self, name: &str, addr: u64) -> Result<&ExecSection, InspectError> {
        self.sections
            .iter()
            .find(|s| s.contains(addr))
            .ok_or_else(|| InspectError::SymbolOutOfRange(name.to_string()))
    }

    /// Offset of a symbol in the file, as expected by uprobes.
    pub(crate) fn file_offset(&self, name: &str) -> Result<u64, InspectError> {
        let symbol = self.symbol(name)?;
        Ok(self.section_of(name, symbol.address)?.to_offset(symbol.address))
    }

    /// Compute the entry point and every return site of a function. The scan
    /// stops at the first of: the next symbol, the end of the symbol (if its
    /// size is known) and the end of its section.
    pub(crate) fn function_site(&self, name: &str) -> Result<FunctionSite, InspectError> {
        let symbol = self.symbol(name)?;
        let section = self.section_of(name, symbol.address)?;

        let mut end = section.addr + section.size;
        if symbol.size > 0 {
            end = end.min(symbol.address.saturating_add(symbol.size));
        }
        if let Some(next) = self
            .symbols
            .values()
            .map(|s| s.address)
            .filter(|addr| *addr > symbol.address)
            .min()
        {
            end = end.min(next);
        }

        let out_of_range = || InspectError::SymbolOutOfRange(name.to_string());
        let start = section.to_offset(symbol.address);
        let code = self
            .image
            .get(start as usize..section.to_offset(end) as usize)
            .ok_or_else(out_of_range)?;

        let returns = scan_return_sites(self.architecture, name, code, start)?;
        debug!(
            "{}: {name} at {start:#x}, {} return site(s)",
            self.path.display(),
            returns.len()
        );

        Ok(FunctionSite {
            symbol: name.to_string(),
            entry_offset: u32::try_from(start).map_err(|_| out_of_range())?,
            return_offsets: returns
                .into_iter()
                .map(|off| u32::try_from(off).map_err(|_| out_of_range()))
                .collect::<Result<_, _>>()?,
        })
    }
}

/// Inspects binaries before probes are attached to them.
pub(crate) struct Inspector {
    /// Oldest toolchain using the register-based calling convention.
    min_toolchain: GoVersion,
}

impl Inspector {
    pub(crate) fn new(min_toolchain: GoVersion) -> Inspector {
        Inspector { min_toolchain }
    }

    /// Inspect a Go binary. Fails if its toolchain is older than the minimum
    /// supported version.
    pub(crate) fn inspect(&self, path: &Path) -> Result<BinaryDescriptor, InspectError> {
        Self::load(path, Some(&self.min_toolchain))
    }

    /// Inspect a shared library. No toolchain requirement applies.
    pub(crate) fn inspect_library(&self, path: &Path) -> Result<BinaryDescriptor, InspectError> {
        Self::load(path, None)
    }

    fn load(path: &Path, min: Option<&GoVersion>) -> Result<BinaryDescriptor, InspectError> {
        let image = fs::read(path).map_err(|source| InspectError::UnreadableBinary {
            path: path.to_path_buf(),
            source,
        })?;
        let elf = ElfBytes::<AnyEndian>::minimal_parse(&image)?;

        let architecture = Architecture::from_machine(elf.ehdr.e_machine)?;

        let toolchain = match min {
            Some(min) => {
                let found = detect_toolchain(&elf)?;
                if !found.satisfies(min) {
                    return Err(InspectError::UnsupportedToolchainVersion {
                        found,
                        min: min.clone(),
                    });
                }
                Some(found)
            }
            None => None,
        };

        let symbols = collect_symbols(&elf)?;
        let exec = (SHF_ALLOC | SHF_EXECINSTR) as u64;
        let sections = elf
            .section_headers()
            .map(|shdrs| {
                shdrs
                    .iter()
                    .filter(|s| s.sh_flags & exec == exec)
                    .filter(|s| s.sh_offset.saturating_add(s.sh_size) <= image.len() as u64)
                    .map(|s| ExecSection {
                        addr: s.sh_addr,
                        offset: s.sh_offset,
                        size: s.sh_size,
                    })
                    .collect()
            })
            .unwrap_or_default();

        debug!(
            "Inspected {}: {architecture}, {} symbol(s)",
            path.display(),
            symbols.len()
        );

        Ok(BinaryDescriptor {
            path: path.to_path_buf(),
            architecture,
            toolchain,
            symbols,
            sections,
            image,
        })
    }
}

/// Merge the static and the dynamic symbol tables. On conflicts the static
/// entry wins, the dynamic one being more likely a PLT stub.
fn collect_symbols(elf: &ElfBytes<AnyEndian>) -> Result<HashMap<String, Symbol>, InspectError> {
    let mut symbols = HashMap::new();

    for (table, strtab) in [elf.symbol_table()?, elf.dynamic_symbol_table()?]
        .into_iter()
        .flatten()
    {
        for sym in table.iter() {
            if sym.st_symtype() != STT_FUNC || sym.is_undefined() || sym.st_value == 0 {
                continue;
            }
            let name = strtab.get(sym.st_name as usize)?;
            symbols.entry(name.to_string()).or_insert(Symbol {
                address: sym.st_value,
                size: sym.st_size,
            });
        }
    }

    Ok(symbols)
}

#[cfg(test)]
mod tests {
    use elf::abi::EM_386;

    use super::*;
    use crate::core::inspect::test_elf::{buildinfo_inline, ElfBuilder};

    const TEXT: u64 = 0x401000;

    fn code() -> Vec<u8> {
        vec![
            // main.a
            0x55, // push rbp
            0x48, 0x89, 0xe5, // mov rbp,rsp
            0xb8, 0xc3, 0x00, 0x00, 0x00, // mov eax,0xc3
            0x85, 0xc0, // test eax,eax
            0x74, 0x01, // je +1
            0xc3, // ret
            0xc3, // ret
            0xc2, 0x08, 0x00, // ret 8
            // main.b
            0x31, 0xc0, // xor eax,eax
            0xc3, // ret
            // main.c
            0x90, 0x90, 0xeb, 0xfe,
        ]
    }

    fn go_binary(version: &str) -> ElfBuilder {
        ElfBuilder::x86_64()
            .text(".text", TEXT, code())
            .section(".go.buildinfo", 0x500000, buildinfo_inline(version))
            .symbol("main.a", TEXT, 0)
            .symbol("main.b", TEXT + 0x12, 3)
            .symbol("main.c", TEXT + 0x15, 4)
    }

    fn inspector() -> Inspector {
        Inspector::new(GoVersion::new(1, 18))
    }

    #[test]
    fn inspect() {
        let file = go_binary("go1.21.5").write();
        let desc = inspector().inspect(file.path()).unwrap();

        assert_eq!(desc.architecture, Architecture::X86_64);
        assert_eq!(desc.toolchain, Some(GoVersion::parse("go1.21.5").unwrap()));
        assert_eq!(
            desc.symbol("main.b").unwrap(),
            &Symbol {
                address: TEXT + 0x12,
                size: 3
            }
        );
        assert!(desc.has_symbol("main.c"));
    }

    #[test]
    fn arm64() {
        let file = ElfBuilder::arm64()
            .section(".go.buildinfo", 0x500000, buildinfo_inline("go1.22.0"))
            .write();
        let desc = inspector().inspect(file.path()).unwrap();

        assert_eq!(desc.architecture, Architecture::Arm64);
    }

    #[test]
    fn unsupported_architecture() {
        let file = ElfBuilder::new(EM_386)
            .section(".go.buildinfo", 0x500000, buildinfo_inline("go1.21.5"))
            .write();

        assert!(matches!(
            inspector().inspect(file.path()),
            Err(InspectError::UnsupportedArchitecture(EM_386))
        ));
        assert!(matches!(
            inspector().inspect_library(file.path()),
            Err(InspectError::UnsupportedArchitecture(_))
        ));
    }

    #[test]
    fn unreadable() {
        assert!(matches!(
            inspector().inspect(Path::new("/nonexistent/tapline/binary")),
            Err(InspectError::UnreadableBinary { .. })
        ));
    }

    #[test]
    fn not_an_elf() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"#!/bin/sh\nexit 0\n").unwrap();

        assert!(matches!(
            inspector().inspect(file.path()),
            Err(InspectError::Elf(_))
        ));
    }

    #[test]
    fn old_toolchain() {
        let file = go_binary("go1.16.15").write();

        match inspector().inspect(file.path()) {
            Err(InspectError::UnsupportedToolchainVersion { found, min }) => {
                assert_eq!(found.to_string(), "go1.16.15");
                assert_eq!(min, GoVersion::new(1, 18));
            }
            _ => panic!("toolchain should be rejected"),
        }
    }

    #[test]
    fn library_without_toolchain() {
        let file = ElfBuilder::x86_64()
            .text(".text", TEXT, code())
            .dynamic_symbol("SSL_write", TEXT + 0x12, 3)
            .write();

        assert!(matches!(
            inspector().inspect(file.path()),
            Err(InspectError::ToolchainNotDetected)
        ));

        let desc = inspector().inspect_library(file.path()).unwrap();
        assert_eq!(desc.toolchain, None);
        assert_eq!(desc.file_offset("SSL_write").unwrap(), 0x1012);
    }

    #[test]
    fn static_symbols_win() {
        let file = go_binary("go1.21.5")
            .dynamic_symbol("main.a", TEXT + 0x100, 0)
            .dynamic_symbol("main.dyn", TEXT + 0x12, 0)
            .write();
        let desc = inspector().inspect(file.path()).unwrap();

        assert_eq!(desc.symbol("main.a").unwrap().address, TEXT);
        assert_eq!(desc.symbol("main.dyn").unwrap().address, TEXT + 0x12);
    }

    #[test]
    fn file_offsets() {
        let file = go_binary("go1.21.5")
            .symbol("main.data", 0x500010, 8)
            .symbol("main.nowhere", 0x900000, 8)
            .write();
        let desc = inspector().inspect(file.path()).unwrap();

        // .text is the first section, at file offset 0x1000.
        assert_eq!(desc.file_offset("main.a").unwrap(), 0x1000);
        assert_eq!(desc.file_offset("main.b").unwrap(), 0x1012);

        assert!(matches!(
            desc.file_offset("main.data"),
            Err(InspectError::SymbolOutOfRange(s)) if s == "main.data"
        ));
        assert!(matches!(
            desc.file_offset("main.nowhere"),
            Err(InspectError::SymbolOutOfRange(_))
        ));
        assert!(matches!(
            desc.file_offset("main.missing"),
            Err(InspectError::SymbolNotFound(s)) if s == "main.missing"
        ));
    }

    #[test]
    fn function_sites() {
        let file = go_binary("go1.21.5").write();
        let desc = inspector().inspect(file.path()).unwrap();

        // Bounded by main.b, no size.
        let site = desc.function_site("main.a").unwrap();
        assert_eq!(site.entry_offset, 0x1000);
        assert_eq!(site.return_offsets, vec![0x100d, 0x100e, 0x100f]);

        // Bounded by its size.
        let site = desc.function_site("main.b").unwrap();
        assert_eq!(site.entry_offset, 0x1012);
        assert_eq!(site.return_offsets, vec![0x1014]);

        // Bounded by the section end, endless loop.
        assert!(matches!(
            desc.function_site("main.c"),
            Err(InspectError::NoReturnSitesFound(s)) if s == "main.c"
        ));
    }
}
