//! Minimal ELF64 writer used to synthesize test binaries.
//!
//! User sections are laid out in the order they are added, the first one at
//! file offset 0x1000 and each following one at the next 0x1000 boundary.

use std::io::Write;

use elf::abi::{
    EM_AARCH64, EM_X86_64, SHF_ALLOC, SHF_EXECINSTR, SHT_DYNSYM, SHT_PROGBITS, SHT_STRTAB,
    SHT_SYMTAB, STB_GLOBAL, STT_FUNC,
};
use tempfile::NamedTempFile;

pub(crate) const SECTION_ALIGN: u64 = 0x1000;

struct TestSection {
    name: String,
    sh_type: u32,
    flags: u64,
    addr: u64,
    data: Vec<u8>,
    link: u32,
    entsize: u64,
}

struct TestSymbol {
    name: String,
    value: u64,
    size: u64,
}

pub(crate) struct ElfBuilder {
    machine: u16,
    sections: Vec<TestSection>,
    symbols: Vec<TestSymbol>,
    dynsyms: Vec<TestSymbol>,
}

impl ElfBuilder {
    pub(crate) fn new(machine: u16) -> ElfBuilder {
        ElfBuilder {
            machine,
            sections: Vec::new(),
            symbols: Vec::new(),
            dynsyms: Vec::new(),
        }
    }

    pub(crate) fn x86_64() -> ElfBuilder {
        Self::new(EM_X86_64)
    }

    pub(crate) fn arm64() -> ElfBuilder {
        Self::new(EM_AARCH64)
    }

    fn push(mut self, name: &str, flags: u64, addr: u64, data: Vec<u8>) -> ElfBuilder {
        self.sections.push(TestSection {
            name: name.to_string(),
            sh_type: SHT_PROGBITS,
            flags,
            addr,
            data,
            link: 0,
            entsize: 0,
        });
        self
    }

    /// Add an allocated, non executable, section.
    pub(crate) fn section(self, name: &str, addr: u64, data: Vec<u8>) -> ElfBuilder {
        self.push(name, SHF_ALLOC as u64, addr, data)
    }

    /// Add an executable section.
    pub(crate) fn text(self, name: &str, addr: u64, code: Vec<u8>) -> ElfBuilder {
        self.push(name, (SHF_ALLOC | SHF_EXECINSTR) as u64, addr, code)
    }

    /// Add a function to the static symbol table.
    pub(crate) fn symbol(mut self, name: &str, value: u64, size: u64) -> ElfBuilder {
        self.symbols.push(TestSymbol {
            name: name.to_string(),
            value,
            size,
        });
        self
    }

    /// Add a function to the dynamic symbol table.
    pub(crate) fn dynamic_symbol(mut self, name: &str, value: u64, size: u64) -> ElfBuilder {
        self.dynsyms.push(TestSymbol {
            name: name.to_string(),
            value,
            size,
        });
        self
    }

    fn symbol_table(&self, symbols: &[TestSymbol]) -> (Vec<u8>, Vec<u8>) {
        let mut strtab = vec![0u8];
        // Null symbol.
        let mut symtab = vec![0u8; 24];

        for sym in symbols.iter() {
            let name = strtab.len() as u32;
            strtab.extend_from_slice(sym.name.as_bytes());
            strtab.push(0);

            // Index of the user section holding the symbol, user sections
            // start at index 1.
            let shndx = self
                .sections
                .iter()
                .position(|s| sym.value >= s.addr && sym.value < s.addr + s.data.len() as u64)
                .map(|i| i as u16 + 1)
                .unwrap_or(0xfff1); // SHN_ABS

            symtab.extend_from_slice(&name.to_le_bytes());
            symtab.push((STB_GLOBAL << 4) | STT_FUNC);
            symtab.push(0);
            symtab.extend_from_slice(&shndx.to_le_bytes());
            symtab.extend_from_slice(&sym.value.to_le_bytes());
            symtab.extend_from_slice(&sym.size.to_le_bytes());
        }

        (symtab, strtab)
    }

    pub(crate) fn build(mut self) -> Vec<u8> {
        let user = self.sections.len() as u32;

        if !self.symbols.is_empty() {
            let (symtab, strtab) = self.symbol_table(&self.symbols);
            self.sections.push(TestSection {
                name: ".symtab".to_string(),
                sh_type: SHT_SYMTAB,
                flags: 0,
                addr: 0,
                data: symtab,
                link: user + 2,
                entsize: 24,
            });
            self.sections.push(TestSection {
                name: ".strtab".to_string(),
                sh_type: SHT_STRTAB,
                flags: 0,
                addr: 0,
                data: strtab,
                link: 0,
                entsize: 0,
            });
        }
        if !self.dynsyms.is_empty() {
            let link = self.sections.len() as u32 + 2;
            let (dynsym, dynstr) = self.symbol_table(&self.dynsyms);
            self.sections.push(TestSection {
                name: ".dynsym".to_string(),
                sh_type: SHT_DYNSYM,
                flags: SHF_ALLOC as u64,
                addr: 0,
                data: dynsym,
                link,
                entsize: 24,
            });
            self.sections.push(TestSection {
                name: ".dynstr".to_string(),
                sh_type: SHT_STRTAB,
                flags: SHF_ALLOC as u64,
                addr: 0,
                data: dynstr,
                link: 0,
                entsize: 0,
            });
        }

        let mut shstrtab = vec![0u8];
        let mut names = Vec::new();
        for section in self.sections.iter() {
            names.push(shstrtab.len() as u32);
            shstrtab.extend_from_slice(section.name.as_bytes());
            shstrtab.push(0);
        }
        let shstrndx = self.sections.len() as u16 + 1;
        names.push(shstrtab.len() as u32);
        shstrtab.extend_from_slice(b".shstrtab\0");
        self.sections.push(TestSection {
            name: ".shstrtab".to_string(),
            sh_type: SHT_STRTAB,
            flags: 0,
            addr: 0,
            data: shstrtab,
            link: 0,
            entsize: 0,
        });

        // Section contents.
        let mut out = vec![0u8; SECTION_ALIGN as usize];
        let mut offsets = Vec::new();
        for section in self.sections.iter() {
            offsets.push(out.len() as u64);
            out.extend_from_slice(&section.data);
            out.resize(align(out.len() as u64, SECTION_ALIGN) as usize, 0);
        }

        // Section headers, starting with the null one.
        let shoff = out.len() as u64;
        out.extend_from_slice(&[0u8; 64]);
        for (i, section) in self.sections.iter().enumerate() {
            out.extend_from_slice(&names[i].to_le_bytes());
            out.extend_from_slice(&section.sh_type.to_le_bytes());
            out.extend_from_slice(&section.flags.to_le_bytes());
            out.extend_from_slice(&section.addr.to_le_bytes());
            out.extend_from_slice(&offsets[i].to_le_bytes());
            out.extend_from_slice(&(section.data.len() as u64).to_le_bytes());
            out.extend_from_slice(&section.link.to_le_bytes());
            out.extend_from_slice(&0u32.to_le_bytes());
            out.extend_from_slice(&1u64.to_le_bytes());
            out.extend_from_slice(&section.entsize.to_le_bytes());
        }

        // ELF header.
        let mut ehdr = Vec::with_capacity(64);
        ehdr.extend_from_slice(&[0x7f, b'E', b'L', b'F', 2, 1, 1, 0]);
        ehdr.extend_from_slice(&[0u8; 8]);
        ehdr.extend_from_slice(&2u16.to_le_bytes()); // ET_EXEC
        ehdr.extend_from_slice(&self.machine.to_le_bytes());
        ehdr.extend_from_slice(&1u32.to_le_bytes());
        ehdr.extend_from_slice(&0u64.to_le_bytes()); // e_entry
        ehdr.extend_from_slice(&0u64.to_le_bytes()); // e_phoff
        ehdr.extend_from_slice(&shoff.to_le_bytes());
        ehdr.extend_from_slice(&0u32.to_le_bytes()); // e_flags
        ehdr.extend_from_slice(&64u16.to_le_bytes()); // e_ehsize
        ehdr.extend_from_slice(&56u16.to_le_bytes()); // e_phentsize
        ehdr.extend_from_slice(&0u16.to_le_bytes()); // e_phnum
        ehdr.extend_from_slice(&64u16.to_le_bytes()); // e_shentsize
        ehdr.extend_from_slice(&(self.sections.len() as u16 + 1).to_le_bytes());
        ehdr.extend_from_slice(&shstrndx.to_le_bytes());
        out[..64].copy_from_slice(&ehdr);

        out
    }

    /// Build the binary and write it to a temporary file.
    pub(crate) fn write(self) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&self.build()).unwrap();
        file.flush().unwrap();
        file
    }
}

fn align(value: u64, align: u64) -> u64 {
    value.div_ceil(align) * align
}

fn buildinfo_header(flags: u8) -> Vec<u8> {
    let mut data = b"\xff Go buildinf:".to_vec();
    data.push(8);
    data.push(flags);
    data.resize(32, 0);
    data
}

/// Build info section using the inline strings layout.
pub(crate) fn buildinfo_inline(version: &str) -> Vec<u8> {
    let mut data = buildinfo_header(0x2);
    data.push(version.len() as u8);
    data.extend_from_slice(version.as_bytes());
    // Empty module info.
    data.push(0);
    data
}

/// Build info section using the pointer layout, alongside the data section
/// it points into.
pub(crate) fn buildinfo_pointers(data_addr: u64, version: &str) -> (Vec<u8>, Vec<u8>) {
    let mut buildinfo = buildinfo_header(0);
    buildinfo[16..24].copy_from_slice(&data_addr.to_le_bytes());
    buildinfo[24..32].copy_from_slice(&(data_addr + 16).to_le_bytes());

    let mut data = Vec::new();
    data.extend_from_slice(&(data_addr + 32).to_le_bytes());
    data.extend_from_slice(&(version.len() as u64).to_le_bytes());
    // Empty module info string header.
    data.extend_from_slice(&[0u8; 16]);
    data.extend_from_slice(version.as_bytes());

    (buildinfo, data)
}

/// Go binary exposing the crypto/tls functions probed by default: Write at
/// file offset 0x1000, Read at 0x1002 with returns at 0x1003 and 0x1005.
pub(crate) fn go_tls_binary(version: &str) -> Vec<u8> {
    ElfBuilder::x86_64()
        .text(".text", 0x401000, vec![0x55, 0xc3, 0x90, 0xc3, 0x90, 0xc3])
        .section(".go.buildinfo", 0x500000, buildinfo_inline(version))
        .symbol("crypto/tls.(*Conn).Write", 0x401000, 2)
        .symbol("crypto/tls.(*Conn).Read", 0x401002, 4)
        .build()
}
