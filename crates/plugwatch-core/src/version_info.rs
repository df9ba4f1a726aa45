use log::debug;
use plugwatch_model::{Release, ReleaseId, ResolveError, Version};

const PE_SIGNATURE: &[u8; 4] = b"PE\0\0";
const PE32_MAGIC: u16 = 0x10b;
const PE32_PLUS_MAGIC: u16 = 0x20b;
const COFF_HEADER_SIZE: usize = 20;
const SECTION_HEADER_SIZE: usize = 40;
const RESOURCE_DIRECTORY_INDEX: u32 = 2;

const RT_VERSION: u32 = 16;
const SUBDIRECTORY_FLAG: u32 = 0x8000_0000;
const NAMED_ENTRY_FLAG: u32 = 0x8000_0000;

const VERSION_INFO_KEY: &str = "VS_VERSION_INFO";
const STRING_FILE_INFO_KEY: &str = "StringFileInfo";
const FIXED_FILE_INFO_SIGNATURE: u32 = 0xFEEF_04BD;

const NAME_KEYS: [&str; 2] = ["ProductName", "FileDescription"];
const VERSION_KEYS: [&str; 2] = ["FileVersion", "ProductVersion"];

/// Build a release from the version resource of an executable image.
///
/// # Errors
/// Returns an error when the image is not a PE file, carries no version
/// resource, has an all-zero file and product version, or names no product.
pub fn extract_release(
    image: &[u8],
    id: ReleaseId,
    download_url: &str,
) -> Result<Release, ResolveError> {
    let info = VersionInfo::parse(image)?;
    let version = info.version()?;
    let name = info
        .product_name()
        .ok_or(ResolveError::NoNameFound)?
        .to_string();
    let version_str = info
        .version_string()
        .map_or_else(|| version.to_string(), str::to_string);

    debug!("Identified {name} {version_str} from {download_url}");

    Ok(Release {
        id,
        name,
        version,
        version_str,
        download_url: download_url.to_string(),
        asset_index: None,
    })
}

/// The parts of a version resource this crate cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub file_version: Version,
    pub product_version: Version,
    /// Key/value pairs of the first string table, in resource order.
    pub strings: Vec<(String, String)>,
}

impl VersionInfo {
    /// Locate and decode the version resource of an executable image.
    ///
    /// # Errors
    /// Returns `InvalidImage` for malformed headers and `NoVersionResource`
    /// when any level of the resource tree is missing.
    pub fn parse(image: &[u8]) -> Result<Self, ResolveError> {
        let image = PeImage::parse(image)?;
        let resource = image.version_resource()?;
        let (root, _) = Block::parse(resource).ok_or(ResolveError::InvalidImage {
            reason: "malformed version resource",
        })?;
        if root.key != VERSION_INFO_KEY {
            return Err(ResolveError::NoVersionResource);
        }

        let (file_version, product_version) = fixed_versions(root.value);
        let strings = root
            .child(STRING_FILE_INFO_KEY)
            .and_then(|string_file_info| string_file_info.children.first())
            .map(|table| {
                table
                    .children
                    .iter()
                    .map(|entry| (entry.key.clone(), entry.text()))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            file_version,
            product_version,
            strings,
        })
    }

    /// The file version, or the product version when the file version is
    /// all zero.
    ///
    /// # Errors
    /// Returns `NoVersionFound` when both are all zero.
    pub fn version(&self) -> Result<Version, ResolveError> {
        [self.file_version, self.product_version]
            .into_iter()
            .find(|version| !version.is_zero())
            .ok_or(ResolveError::NoVersionFound)
    }

    #[must_use]
    pub fn string(&self, key: &str) -> Option<&str> {
        self.strings
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, value)| value.trim())
            .filter(|value| !value.is_empty())
    }

    #[must_use]
    pub fn product_name(&self) -> Option<&str> {
        NAME_KEYS.iter().find_map(|key| self.string(key))
    }

    #[must_use]
    pub fn version_string(&self) -> Option<&str> {
        VERSION_KEYS.iter().find_map(|key| self.string(key))
    }
}

fn fixed_versions(value: &[u8]) -> (Version, Version) {
    if u32_at(value, 0) != Some(FIXED_FILE_INFO_SIGNATURE) {
        debug!("Version resource has no fixed file info");
        return (Version::default(), Version::default());
    }
    let words = |offset| u32_at(value, offset).unwrap_or(0);
    (
        Version::from_words(words(8), words(12)),
        Version::from_words(words(16), words(20)),
    )
}

struct Section {
    virtual_address: u32,
    virtual_size: u32,
    raw_size: u32,
    raw_offset: u32,
}

struct PeImage<'a> {
    data: &'a [u8],
    sections: Vec<Section>,
    resource_rva: u32,
    resource_size: u32,
}

impl<'a> PeImage<'a> {
    fn parse(data: &'a [u8]) -> Result<Self, ResolveError> {
        let invalid = |reason| ResolveError::InvalidImage { reason };

        if data.get(..2) != Some(b"MZ".as_slice()) {
            return Err(invalid("missing MZ header"));
        }
        let pe_offset = u32_at(data, 0x3C).ok_or(invalid("truncated DOS header"))? as usize;
        if data.get(pe_offset..pe_offset.saturating_add(4)) != Some(PE_SIGNATURE.as_slice()) {
            return Err(invalid("missing PE signature"));
        }

        let coff = pe_offset + 4;
        let section_count = u16_at(data, coff + 2).ok_or(invalid("truncated COFF header"))?;
        let optional_size = u16_at(data, coff + 16).ok_or(invalid("truncated COFF header"))?;
        let optional = coff + COFF_HEADER_SIZE;

        let directories = match u16_at(data, optional) {
            Some(PE32_MAGIC) => optional + 96,
            Some(PE32_PLUS_MAGIC) => optional + 112,
            _ => return Err(invalid("unknown optional header magic")),
        };
        let directory_count =
            u32_at(data, directories - 4).ok_or(invalid("truncated optional header"))?;
        let (resource_rva, resource_size) = if directory_count > RESOURCE_DIRECTORY_INDEX {
            let entry = directories + RESOURCE_DIRECTORY_INDEX as usize * 8;
            (
                u32_at(data, entry).ok_or(invalid("truncated data directories"))?,
                u32_at(data, entry + 4).ok_or(invalid("truncated data directories"))?,
            )
        } else {
            (0, 0)
        };

        let section_table = optional + usize::from(optional_size);
        let sections = (0..usize::from(section_count))
            .map(|index| {
                let header = section_table + index * SECTION_HEADER_SIZE;
                Some(Section {
                    virtual_size: u32_at(data, header + 8)?,
                    virtual_address: u32_at(data, header + 12)?,
                    raw_size: u32_at(data, header + 16)?,
                    raw_offset: u32_at(data, header + 20)?,
                })
            })
            .collect::<Option<Vec<_>>>()
            .ok_or(invalid("truncated section table"))?;

        Ok(Self {
            data,
            sections,
            resource_rva,
            resource_size,
        })
    }

    fn offset_of(&self, rva: u32) -> Option<usize> {
        self.sections.iter().find_map(|section| {
            let delta = rva.checked_sub(section.virtual_address)?;
            // Only bytes backed by raw data can hold resources.
            let mapped = match section.virtual_size {
                0 => section.raw_size,
                size => size.min(section.raw_size),
            };
            (delta < mapped).then(|| section.raw_offset as usize + delta as usize)
        })
    }

    fn slice_at(&self, rva: u32, len: u32) -> Option<&'a [u8]> {
        let start = self.offset_of(rva)?;
        self.data.get(start..start.checked_add(len as usize)?)
    }

    /// Walk type -> name -> language down to the version resource bytes.
    fn version_resource(&self) -> Result<&'a [u8], ResolveError> {
        if self.resource_rva == 0 || self.resource_size == 0 {
            return Err(ResolveError::NoVersionResource);
        }
        let root = self
            .offset_of(self.resource_rva)
            .ok_or(ResolveError::NoVersionResource)?;

        let by_type = self.directory_entry(root, 0, Some(RT_VERSION))?;
        let by_name = self.directory_entry(root, subdirectory(by_type)?, None)?;
        let by_language = self.directory_entry(root, subdirectory(by_name)?, None)?;
        if by_language & SUBDIRECTORY_FLAG != 0 {
            return Err(ResolveError::NoVersionResource);
        }

        let data_entry = root + by_language as usize;
        let truncated = ResolveError::InvalidImage {
            reason: "truncated resource data entry",
        };
        let rva = u32_at(self.data, data_entry).ok_or(truncated.clone())?;
        let size = u32_at(self.data, data_entry + 4).ok_or(truncated)?;
        self.slice_at(rva, size).ok_or(ResolveError::InvalidImage {
            reason: "version resource lies outside the image",
        })
    }

    /// Find an entry in the directory at `root + relative`, by numeric id or
    /// the first one when `id` is `None`. Returns the entry's target offset.
    fn directory_entry(
        &self,
        root: usize,
        relative: usize,
        id: Option<u32>,
    ) -> Result<u32, ResolveError> {
        let truncated = ResolveError::InvalidImage {
            reason: "truncated resource directory",
        };
        let directory = root + relative;
        let named = u16_at(self.data, directory + 12).ok_or(truncated.clone())?;
        let ids = u16_at(self.data, directory + 14).ok_or(truncated.clone())?;

        for index in 0..usize::from(named) + usize::from(ids) {
            let entry = directory + 16 + index * 8;
            let name = u32_at(self.data, entry).ok_or(truncated.clone())?;
            let target = u32_at(self.data, entry + 4).ok_or(truncated.clone())?;
            match id {
                None => return Ok(target),
                Some(wanted) if name & NAMED_ENTRY_FLAG == 0 && name == wanted => {
                    return Ok(target);
                }
                Some(_) => {}
            }
        }
        Err(ResolveError::NoVersionResource)
    }
}

fn subdirectory(target: u32) -> Result<usize, ResolveError> {
    if target & SUBDIRECTORY_FLAG == 0 {
        return Err(ResolveError::NoVersionResource);
    }
    Ok((target & !SUBDIRECTORY_FLAG) as usize)
}

/// One node of the version resource tree: length, value length, type, a
/// null-terminated UTF-16 key, then a value and children on 32-bit
/// boundaries.
struct Block<'a> {
    key: String,
    value: &'a [u8],
    /// Everything after the key, up to the end of the block.
    body: &'a [u8],
    children: Vec<Block<'a>>,
}

impl<'a> Block<'a> {
    fn parse(data: &'a [u8]) -> Option<(Self, usize)> {
        let length = usize::from(u16_at(data, 0)?);
        let value_length = usize::from(u16_at(data, 2)?);
        let value_type = u16_at(data, 4)?;
        if length < 6 || length > data.len() {
            return None;
        }
        let block = &data[..length];

        let (key, key_end) = utf16_until_nul(block, 6);
        let value_start = align4(key_end).min(length);
        // Text values count UTF-16 units, binary values count bytes.
        let value_bytes = if value_type == 1 {
            value_length * 2
        } else {
            value_length
        };
        let value_end = (value_start + value_bytes).min(length);
        let value = &block[value_start..value_end];

        let mut children = Vec::new();
        let mut cursor = align4(value_end);
        while cursor + 6 <= length {
            let Some((child, child_length)) = Block::parse(&block[cursor..]) else {
                debug!("Stopping at malformed version block under {key}");
                break;
            };
            children.push(child);
            cursor = align4(cursor + child_length);
        }

        Some((
            Self {
                key,
                value,
                body: &block[value_start..],
                children,
            },
            length,
        ))
    }

    fn child(&self, key: &str) -> Option<&Block<'a>> {
        self.children.iter().find(|child| child.key == key)
    }

    /// String table entries are UTF-16 whatever their declared type, and
    /// some compilers count their length in bytes.
    fn text(&self) -> String {
        utf16_until_nul(self.body, 0).0
    }
}

fn utf16_until_nul(data: &[u8], start: usize) -> (String, usize) {
    let mut units = Vec::new();
    let mut offset = start;
    while let Some(unit) = u16_at(data, offset) {
        offset += 2;
        if unit == 0 {
            break;
        }
        units.push(unit);
    }
    (String::from_utf16_lossy(&units), offset)
}

fn align4(offset: usize) -> usize {
    (offset + 3) & !3
}

fn u16_at(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset.checked_add(2)?)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn u32_at(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}
