//! Go toolchain version detection, from the build information embedded in
//! the `.go.buildinfo` section.

use std::fmt;

use anyhow::{anyhow, bail, Result};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use elf::{abi::SHT_NOBITS, endian::AnyEndian, ElfBytes};

use super::InspectError;

const BUILDINFO_SECTION: &str = ".go.buildinfo";
const BUILDINFO_MAGIC: &[u8] = b"\xff Go buildinf:";
/// Size of the build info header, the version follows it when strings are
/// stored inline.
const BUILDINFO_HEADER_SIZE: usize = 32;
const BUILDINFO_FLAG_BIG_ENDIAN: u8 = 0x1;
/// Set by toolchains >= 1.18, strings are stored right after the header
/// instead of being referenced by pointers.
const BUILDINFO_FLAG_INLINE: u8 = 0x2;

/// Go toolchain version, eg. go1.21.5, go1.22rc1 or devel.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct GoVersion {
    major: u32,
    minor: u32,
    patch: u32,
    /// Pre-release marker, eg. rc1 or beta2.
    pre: Option<String>,
    /// Development toolchains are considered newer than any release.
    devel: bool,
}

impl GoVersion {
    pub(crate) fn new(major: u32, minor: u32) -> GoVersion {
        GoVersion {
            major,
            minor,
            patch: 0,
            pre: None,
            devel: false,
        }
    }

    /// Parse a version as found in the build info (`go1.21.5`,
    /// `go1.21rc2`, `devel go1.23-abcdef`) or in the configuration (`1.18`).
    pub(crate) fn parse(raw: &str) -> Result<GoVersion> {
        let raw = raw.trim();
        if raw.starts_with("devel") {
            return Ok(GoVersion {
                major: 0,
                minor: 0,
                patch: 0,
                pre: None,
                devel: true,
            });
        }

        // Drop the experiment suffixes, eg. "go1.21.5 X:loopvar" or
        // "go1.21.0-vendor".
        let version = raw
            .split_whitespace()
            .next()
            .and_then(|v| v.split('-').next())
            .ok_or_else(|| anyhow!("Empty toolchain version"))?;
        let version = version.strip_prefix("go").unwrap_or(version);

        let (numbers, pre) = match version.find(|c: char| c.is_ascii_alphabetic()) {
            Some(pos) => (&version[..pos], Some(version[pos..].to_string())),
            None => (version, None),
        };

        let mut parts = numbers.split('.');
        let major: u32 = parts
            .next()
            .ok_or_else(|| anyhow!("Could not get major version from {raw}"))?
            .parse()?;
        let minor: u32 = parts
            .next()
            .ok_or_else(|| anyhow!("Could not get minor version from {raw}"))?
            .parse()?;
        let patch: u32 = match parts.next() {
            Some(patch) => patch.parse()?,
            None => 0,
        };
        if parts.next().is_some() {
            bail!("Too many version members in {raw}");
        }

        Ok(GoVersion {
            major,
            minor,
            patch,
            pre,
            devel: false,
        })
    }

    /// Is this version at least `min`? Pre-releases of a minor version are
    /// considered part of it.
    pub(crate) fn satisfies(&self, min: &GoVersion) -> bool {
        if self.devel {
            return true;
        }
        if min.devel {
            return false;
        }
        (self.major, self.minor, self.patch) >= (min.major, min.minor, min.patch)
    }
}

impl fmt::Display for GoVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.devel {
            return write!(f, "devel");
        }
        write!(f, "go{}.{}", self.major, self.minor)?;
        if self.patch != 0 {
            write!(f, ".{}", self.patch)?;
        }
        if let Some(pre) = &self.pre {
            write!(f, "{pre}")?;
        }
        Ok(())
    }
}

impl<'de> serde::Deserialize<'de> for GoVersion {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct VersionVisitor;

        impl serde::de::Visitor<'_> for VersionVisitor {
            type Value = GoVersion;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("toolchain version")
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                GoVersion::parse(value).map_err(|_| {
                    serde::de::Error::invalid_value(serde::de::Unexpected::Str(value), &self)
                })
            }

            // YAML reads 1.18 as a float.
            fn visit_f64<E>(self, value: f64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                self.visit_str(&value.to_string())
            }
        }

        deserializer.deserialize_any(VersionVisitor)
    }
}

/// Detect the toolchain version of a binary.
pub(crate) fn detect_toolchain(elf: &ElfBytes<AnyEndian>) -> Result<GoVersion, InspectError> {
    let shdr = elf
        .section_header_by_name(BUILDINFO_SECTION)?
        .ok_or(InspectError::ToolchainNotDetected)?;
    let (data, _) = elf.section_data(&shdr)?;

    let raw = read_buildinfo_version(elf, data).ok_or(InspectError::ToolchainNotDetected)?;
    GoVersion::parse(&raw).map_err(|_| InspectError::ToolchainNotDetected)
}

fn read_buildinfo_version(elf: &ElfBytes<AnyEndian>, data: &[u8]) -> Option<String> {
    if data.len() < BUILDINFO_HEADER_SIZE || !data.starts_with(BUILDINFO_MAGIC) {
        return None;
    }
    let ptr_size = data[14] as usize;
    let flags = data[15];

    if flags & BUILDINFO_FLAG_INLINE != 0 {
        let (len, read) = read_uvarint(&data[BUILDINFO_HEADER_SIZE..])?;
        let start = BUILDINFO_HEADER_SIZE + read;
        let end = start.checked_add(usize::try_from(len).ok()?)?;
        return String::from_utf8(data.get(start..end)?.to_vec()).ok();
    }

    // Older layout: the header holds a pointer to the runtime.buildVersion
    // string header ({data, len}).
    let big_endian = flags & BUILDINFO_FLAG_BIG_ENDIAN != 0;
    let read_ptr = |buf: &[u8]| -> Option<u64> {
        Some(match (ptr_size, big_endian) {
            (4, false) => LittleEndian::read_u32(buf.get(..4)?) as u64,
            (4, true) => BigEndian::read_u32(buf.get(..4)?) as u64,
            (8, false) => LittleEndian::read_u64(buf.get(..8)?),
            (8, true) => BigEndian::read_u64(buf.get(..8)?),
            _ => return None,
        })
    };

    let version_ptr = read_ptr(data.get(16..)?)?;
    let header = read_vaddr(elf, version_ptr, 2 * ptr_size)?;
    let str_ptr = read_ptr(header)?;
    let str_len = read_ptr(&header[ptr_size..])?;

    let bytes = read_vaddr(elf, str_ptr, usize::try_from(str_len).ok()?)?;
    String::from_utf8(bytes.to_vec()).ok()
}

/// Read `len` bytes at a virtual address, from the section mapping it.
fn read_vaddr<'data>(elf: &ElfBytes<'data, AnyEndian>, addr: u64, len: usize) -> Option<&'data [u8]> {
    let shdr = elf.section_headers()?.iter().find(|s| {
        s.sh_type != SHT_NOBITS && addr >= s.sh_addr && addr < s.sh_addr.saturating_add(s.sh_size)
    })?;
    let (data, _) = elf.section_data(&shdr).ok()?;

    let start = usize::try_from(addr - shdr.sh_addr).ok()?;
    data.get(start..start.checked_add(len)?)
}

/// Decode an unsigned LEB128 varint, returns the value and the number of
/// bytes consumed.
fn read_uvarint(buf: &[u8]) -> Option<(u64, usize)> {
    let mut value = 0u64;
    for (i, byte) in buf.iter().enumerate().take(10) {
        value |= ((byte & 0x7f) as u64) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}
