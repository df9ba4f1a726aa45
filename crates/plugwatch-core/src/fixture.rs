//! Builders for synthetic executable images and archives used in tests.
//!
//! The images are minimal PE32+ (or PE32) files with a single `.rsrc`
//! section holding one version resource, which is all the extractor reads.
#![allow(clippy::missing_panics_doc, clippy::cast_possible_truncation)]

use std::io::{Cursor, Write as _};

use plugwatch_model::Version;

const RESOURCE_RVA: u32 = 0x1000;
const HEADERS_SIZE: usize = 0x200;
const PE_OFFSET: usize = 0x40;
const RT_ICON: u32 = 3;
const RT_VERSION: u32 = 16;
const SUBDIRECTORY_FLAG: u32 = 0x8000_0000;

#[derive(Debug, Clone)]
pub struct ImageBuilder {
    file_version: Version,
    product_version: Version,
    strings: Vec<(String, String)>,
    resource_type: u32,
    pe32: bool,
    section_offset: usize,
    binary_strings: bool,
}

impl Default for ImageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            file_version: Version::default(),
            product_version: Version::default(),
            strings: Vec::new(),
            resource_type: RT_VERSION,
            pe32: false,
            section_offset: HEADERS_SIZE,
            binary_strings: false,
        }
    }

    #[must_use]
    pub fn file_version(mut self, version: [u16; 4]) -> Self {
        self.file_version = Version::from(version);
        self
    }

    #[must_use]
    pub fn product_version(mut self, version: [u16; 4]) -> Self {
        self.product_version = Version::from(version);
        self
    }

    #[must_use]
    pub fn string(mut self, key: &str, value: &str) -> Self {
        self.strings.push((key.to_string(), value.to_string()));
        self
    }

    /// Store the resource under a non-version type so the lookup misses.
    #[must_use]
    pub fn without_version_resource(mut self) -> Self {
        self.resource_type = RT_ICON;
        self
    }

    #[must_use]
    pub fn pe32(mut self) -> Self {
        self.pe32 = true;
        self
    }

    /// Place the `.rsrc` raw data at `offset` in the file instead of right
    /// after the headers.
    #[must_use]
    pub fn section_offset(mut self, offset: usize) -> Self {
        self.section_offset = offset.max(HEADERS_SIZE);
        self
    }

    /// Write string table entries with `wType = 0` and a byte length, as
    /// some resource compilers do.
    #[must_use]
    pub fn binary_strings(mut self) -> Self {
        self.binary_strings = true;
        self
    }

    #[must_use]
    pub fn build(&self) -> Vec<u8> {
        let resources = self.resource_section();
        let resource_len = u32::try_from(resources.len()).expect("resource section fits in u32");

        let mut image = vec![0_u8; self.section_offset];
        image[..2].copy_from_slice(b"MZ");
        put_u32(&mut image, 0x3C, PE_OFFSET as u32);
        image[PE_OFFSET..PE_OFFSET + 4].copy_from_slice(b"PE\0\0");

        let coff = PE_OFFSET + 4;
        let (machine, magic, directories_offset, optional_size) = if self.pe32 {
            (0x014C_u16, 0x10B_u16, 96, 224_u16)
        } else {
            (0x8664_u16, 0x20B_u16, 112, 240_u16)
        };
        put_u16(&mut image, coff, machine);
        put_u16(&mut image, coff + 2, 1);
        put_u16(&mut image, coff + 16, optional_size);
        put_u16(&mut image, coff + 18, 0x2022);

        let optional = coff + 20;
        put_u16(&mut image, optional, magic);
        put_u32(&mut image, optional + directories_offset - 4, 16);
        let resource_directory = optional + directories_offset + 2 * 8;
        put_u32(&mut image, resource_directory, RESOURCE_RVA);
        put_u32(&mut image, resource_directory + 4, resource_len);

        let section = optional + usize::from(optional_size);
        image[section..section + 8].copy_from_slice(b".rsrc\0\0\0");
        put_u32(&mut image, section + 8, resource_len);
        put_u32(&mut image, section + 12, RESOURCE_RVA);
        put_u32(&mut image, section + 16, resource_len);
        put_u32(&mut image, section + 20, self.section_offset as u32);

        image.extend_from_slice(&resources);
        image
    }

    fn resource_section(&self) -> Vec<u8> {
        let info = self.version_info();
        let mut out = Vec::new();
        directory(&mut out, self.resource_type, SUBDIRECTORY_FLAG | 24);
        directory(&mut out, 1, SUBDIRECTORY_FLAG | 48);
        directory(&mut out, 0x0409, 72);
        out.extend_from_slice(&(RESOURCE_RVA + 88).to_le_bytes());
        out.extend_from_slice(&u32::try_from(info.len()).expect("fits").to_le_bytes());
        out.extend_from_slice(&[0; 8]);
        out.extend_from_slice(&info);
        out
    }

    fn version_info(&self) -> Vec<u8> {
        let mut fixed = Vec::with_capacity(52);
        let words = |version: Version| {
            (
                (u32::from(version.major) << 16) | u32::from(version.minor),
                (u32::from(version.build) << 16) | u32::from(version.revision),
            )
        };
        let (file_ms, file_ls) = words(self.file_version);
        let (product_ms, product_ls) = words(self.product_version);
        for word in [0xFEEF_04BD, 0x0001_0000, file_ms, file_ls, product_ms, product_ls] {
            fixed.extend_from_slice(&u32::to_le_bytes(word));
        }
        fixed.resize(52, 0);

        let strings: Vec<Vec<u8>> = self
            .strings
            .iter()
            .map(|(key, value)| {
                let value = utf16z(value);
                let bytes = u16::try_from(value.len()).expect("fits");
                if self.binary_strings {
                    block(key, 0, &value, bytes, &[])
                } else {
                    block(key, 1, &value, bytes / 2, &[])
                }
            })
            .collect();
        let table = block("040904b0", 1, &[], 0, &strings);
        let string_file_info = block("StringFileInfo", 1, &[], 0, &[table]);
        block("VS_VERSION_INFO", 0, &fixed, 52, &[string_file_info])
    }
}

/// Image of an addon binary with the usual metadata filled in.
#[must_use]
pub fn addon_image(name: &str, version: [u16; 4]) -> Vec<u8> {
    ImageBuilder::new()
        .file_version(version)
        .product_version(version)
        .string("ProductName", name)
        .string("FileVersion", &Version::from(version).to_string())
        .build()
}

/// A zip archive holding the given entries in order.
#[must_use]
pub fn zip_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, content) in entries {
        writer.start_file(*name, options).expect("entry should start");
        writer.write_all(content).expect("entry should be written");
    }
    writer
        .finish()
        .expect("archive should be finalized")
        .into_inner()
}

fn directory(out: &mut Vec<u8>, id: u32, target: u32) {
    out.extend_from_slice(&[0; 12]);
    out.extend_from_slice(&0_u16.to_le_bytes());
    out.extend_from_slice(&1_u16.to_le_bytes());
    out.extend_from_slice(&id.to_le_bytes());
    out.extend_from_slice(&target.to_le_bytes());
}

fn block(
    key: &str,
    value_type: u16,
    value: &[u8],
    value_length: u16,
    children: &[Vec<u8>],
) -> Vec<u8> {
    let mut out = vec![0_u8; 6];
    out.extend_from_slice(&utf16z(key));
    pad4(&mut out);
    out.extend_from_slice(value);
    for child in children {
        pad4(&mut out);
        out.extend_from_slice(child);
    }
    let length = u16::try_from(out.len()).expect("block fits in u16");
    out[0..2].copy_from_slice(&length.to_le_bytes());
    out[2..4].copy_from_slice(&value_length.to_le_bytes());
    out[4..6].copy_from_slice(&value_type.to_le_bytes());
    out
}

fn utf16z(text: &str) -> Vec<u8> {
    text.encode_utf16()
        .chain(std::iter::once(0))
        .flat_map(u16::to_le_bytes)
        .collect()
}

fn pad4(out: &mut Vec<u8>) {
    while out.len() % 4 != 0 {
        out.push(0);
    }
}

fn put_u16(image: &mut [u8], offset: usize, value: u16) {
    image[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(image: &mut [u8], offset: usize, value: u32) {
    image[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}
