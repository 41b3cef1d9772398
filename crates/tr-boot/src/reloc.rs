//! Self-relocation of the loaded module
//!
//! The module is linked position-independent, so before anything touches a
//! pointer stored in data the `R_AARCH64_RELATIVE` entries of its dynamic
//! relocation table have to be patched with the load address. Only that one
//! relocation type is supported; anything else means the module was linked
//! wrong and startup is aborted.
//!
//! The image is the module as mapped in memory, so all structures are read
//! and written in native byte order.

use bytemuck::{Pod, Zeroable};
use tr_core::BootError;
use tracing::{debug, trace};

/// ELF dynamic entry (64-bit)
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct Elf64Dyn {
    pub d_tag: i64,
    pub d_val: u64,
}

/// ELF relocation entry with addend (64-bit)
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct Elf64Rela {
    pub r_offset: u64,
    pub r_type: u32,
    pub r_symbol: u32,
    pub r_addend: i64,
}

/// Dynamic entry tags
pub mod dt {
    pub const NULL: i64 = 0;
    pub const RELA: i64 = 7;
    pub const RELASZ: i64 = 8;
    pub const RELAENT: i64 = 9;
    pub const SYMBOLIC: i64 = 16;
    pub const RELACOUNT: i64 = 0x6fff_fff9;
}

/// AArch64 relocation types
pub mod r_aarch64 {
    /// B + A
    pub const RELATIVE: u32 = 0x403;
}

const DYN_SIZE: usize = std::mem::size_of::<Elf64Dyn>();
const RELA_SIZE: usize = std::mem::size_of::<Elf64Rela>();

fn error(msg: impl Into<String>) -> BootError {
    BootError::Relocation(msg.into())
}

fn read<T: Pod>(image: &[u8], offset: u64) -> Result<T, BootError> {
    let size = std::mem::size_of::<T>();
    let start = usize::try_from(offset).map_err(|_| error("offset out of range"))?;
    let bytes = start
        .checked_add(size)
        .and_then(|end| image.get(start..end))
        .ok_or_else(|| error(format!("read of {} bytes at 0x{:x} is outside the image", size, offset)))?;
    Ok(bytemuck::pod_read_unaligned(bytes))
}

fn write_u64(image: &mut [u8], offset: u64, value: u64) -> Result<(), BootError> {
    let start = usize::try_from(offset).map_err(|_| error("offset out of range"))?;
    let slot = start
        .checked_add(8)
        .and_then(|end| image.get_mut(start..end))
        .ok_or_else(|| error(format!("relocation target 0x{:x} is outside the image", offset)))?;
    slot.copy_from_slice(&value.to_ne_bytes());
    Ok(())
}

/// Relocation table described by the dynamic section
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct RelaTable {
    offset: u64,
    size: u64,
    entry_size: u64,
    count: u64,
}

fn scan_dynamic(image: &[u8], dynamic_offset: usize) -> Result<RelaTable, BootError> {
    let mut table = RelaTable::default();
    let mut found_rela = false;
    let mut offset = dynamic_offset as u64;

    loop {
        let entry: Elf64Dyn = read(image, offset)?;
        if entry.d_tag <= dt::NULL {
            break;
        }

        match entry.d_tag {
            dt::RELA => {
                if found_rela {
                    return Err(error("more than one DT_RELA entry"));
                }
                table.offset = entry.d_val;
                found_rela = true;
            }
            dt::RELASZ => table.size = entry.d_val,
            dt::RELAENT => table.entry_size = entry.d_val,
            dt::RELACOUNT => table.count = entry.d_val,
            _ => {}
        }
        offset += DYN_SIZE as u64;
    }

    Ok(table)
}

/// Apply the module's relative relocations
///
/// `dynamic_offset` locates the dynamic section inside `image`, and `base`
/// is the address the image is mapped at. Returns how many relocations
/// were applied.
pub fn relocate(image: &mut [u8], dynamic_offset: usize, base: u64) -> Result<usize, BootError> {
    let table = scan_dynamic(image, dynamic_offset)?;

    if table.entry_size != RELA_SIZE as u64 {
        return Err(error(format!(
            "DT_RELAENT is 0x{:x}, expected 0x{:x}",
            table.entry_size, RELA_SIZE
        )));
    }
    if table.count.checked_mul(table.entry_size) != Some(table.size) {
        return Err(error(format!(
            "DT_RELASZ 0x{:x} does not match {} entries",
            table.size, table.count
        )));
    }

    debug!(
        "Applying {} relocations from 0x{:x} with base 0x{:x}",
        table.count, table.offset, base
    );

    for i in 0..table.count {
        let rela: Elf64Rela = read(image, table.offset + i * RELA_SIZE as u64)?;

        if rela.r_type != r_aarch64::RELATIVE {
            return Err(error(format!("unsupported relocation type 0x{:x}", rela.r_type)));
        }
        if rela.r_symbol != 0 {
            return Err(error(format!(
                "relative relocation at 0x{:x} references symbol {}",
                rela.r_offset, rela.r_symbol
            )));
        }

        let value = base.wrapping_add(rela.r_addend as u64);
        trace!("reloc 0x{:x} <- 0x{:x}", rela.r_offset, value);
        write_u64(image, rela.r_offset, value)?;
    }

    usize::try_from(table.count).map_err(|_| error("relocation count out of range"))
}

/// Lays out a module image with a dynamic section and relocation table
///
/// The layout is: dynamic section at 0, relocation table right after it,
/// then `data_size` bytes of zeroed data. Offsets given to
/// [`ImageBuilder::relative`] are relative to the start of that data.
#[derive(Debug, Clone, Default)]
pub struct ImageBuilder {
    data_size: usize,
    relocations: Vec<Elf64Rela>,
    extra_dynamic: Vec<Elf64Dyn>,
}

impl ImageBuilder {
    pub fn new(data_size: usize) -> Self {
        Self {
            data_size,
            ..Self::default()
        }
    }

    /// Add an `R_AARCH64_RELATIVE` relocation for `data_offset`
    pub fn relative(mut self, data_offset: u64, addend: i64) -> Self {
        self.relocations.push(Elf64Rela {
            r_offset: data_offset,
            r_type: r_aarch64::RELATIVE,
            r_symbol: 0,
            r_addend: addend,
        });
        self
    }

    /// Add an arbitrary relocation entry
    pub fn rela(mut self, rela: Elf64Rela) -> Self {
        self.relocations.push(rela);
        self
    }

    /// Append a raw dynamic entry after the standard ones
    pub fn dynamic(mut self, entry: Elf64Dyn) -> Self {
        self.extra_dynamic.push(entry);
        self
    }

    /// Offset of the data area inside the built image
    pub fn data_offset(&self) -> usize {
        (4 + self.extra_dynamic.len() + 1) * DYN_SIZE + self.relocations.len() * RELA_SIZE
    }

    /// Build the image; the dynamic section starts at offset 0
    pub fn build(&self) -> Vec<u8> {
        let dynamic_len = (4 + self.extra_dynamic.len() + 1) * DYN_SIZE;
        let data_offset = self.data_offset() as u64;
        let count = self.relocations.len() as u64;

        let mut dynamic = vec![
            Elf64Dyn { d_tag: dt::RELA, d_val: dynamic_len as u64 },
            Elf64Dyn { d_tag: dt::RELASZ, d_val: count * RELA_SIZE as u64 },
            Elf64Dyn { d_tag: dt::RELAENT, d_val: RELA_SIZE as u64 },
            Elf64Dyn { d_tag: dt::RELACOUNT, d_val: count },
        ];
        dynamic.extend_from_slice(&self.extra_dynamic);
        dynamic.push(Elf64Dyn { d_tag: dt::NULL, d_val: 0 });

        let mut image = Vec::with_capacity(data_offset as usize + self.data_size);
        image.extend_from_slice(bytemuck::cast_slice(&dynamic));
        for rela in &self.relocations {
            let mut rela = *rela;
            rela.r_offset += data_offset;
            rela.r_addend += data_offset as i64;
            image.extend_from_slice(bytemuck::bytes_of(&rela));
        }
        image.resize(data_offset as usize + self.data_size, 0);
        image
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: u64 = 0x8000_0000;

    fn read_slot(image: &[u8], offset: usize) -> u64 {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&image[offset..offset + 8]);
        u64::from_ne_bytes(bytes)
    }

    #[test]
    fn test_struct_sizes() {
        assert_eq!(DYN_SIZE, 0x10);
        assert_eq!(RELA_SIZE, 0x18);
    }

    #[test]
    fn test_relative_relocations() {
        let builder = ImageBuilder::new(0x40).relative(0x00, 0x10).relative(0x08, 0x20);
        let data = builder.data_offset();
        let mut image = builder.build();

        assert_eq!(relocate(&mut image, 0, BASE), Ok(2));
        assert_eq!(read_slot(&image, data), BASE + data as u64 + 0x10);
        assert_eq!(read_slot(&image, data + 8), BASE + data as u64 + 0x20);
        assert_eq!(read_slot(&image, data + 16), 0);
    }

    #[test]
    fn test_no_relocations() {
        let mut image = ImageBuilder::new(0x10).build();
        assert_eq!(relocate(&mut image, 0, BASE), Ok(0));
    }

    #[test]
    fn test_ignores_unrelated_tags() {
        let builder = ImageBuilder::new(0x10)
            .relative(0, 0)
            .dynamic(Elf64Dyn { d_tag: dt::SYMBOLIC, d_val: 0 })
            .dynamic(Elf64Dyn { d_tag: 0x6fff_fffb, d_val: 1 });
        let mut image = builder.build();
        assert_eq!(relocate(&mut image, 0, BASE), Ok(1));
    }

    #[test]
    fn test_duplicate_rela_tag() {
        let mut image = ImageBuilder::new(0x10)
            .dynamic(Elf64Dyn { d_tag: dt::RELA, d_val: 0 })
            .build();
        assert!(matches!(relocate(&mut image, 0, BASE), Err(BootError::Relocation(_))));
    }

    #[test]
    fn test_bad_entry_size() {
        let mut image = ImageBuilder::new(0x10)
            .dynamic(Elf64Dyn { d_tag: dt::RELAENT, d_val: 0x10 })
            .build();
        let err = relocate(&mut image, 0, BASE).unwrap_err();
        assert_eq!(err.exit_code(), -4);
    }

    #[test]
    fn test_size_count_mismatch() {
        let mut image = ImageBuilder::new(0x10)
            .relative(0, 0)
            .dynamic(Elf64Dyn { d_tag: dt::RELACOUNT, d_val: 2 })
            .build();
        assert!(relocate(&mut image, 0, BASE).is_err());
    }

    #[test]
    fn test_rejects_other_types_and_symbols() {
        let mut image = ImageBuilder::new(0x10)
            .rela(Elf64Rela { r_offset: 0, r_type: 0x101, r_symbol: 0, r_addend: 0 })
            .build();
        assert!(relocate(&mut image, 0, BASE).is_err());

        let mut image = ImageBuilder::new(0x10)
            .rela(Elf64Rela { r_offset: 0, r_type: r_aarch64::RELATIVE, r_symbol: 3, r_addend: 0 })
            .build();
        assert!(relocate(&mut image, 0, BASE).is_err());
    }

    #[test]
    fn test_out_of_bounds_target() {
        let mut image = ImageBuilder::new(0x10).relative(0x0c, 0).build();
        assert!(matches!(relocate(&mut image, 0, BASE), Err(BootError::Relocation(_))));
    }

    #[test]
    fn test_unterminated_dynamic_section() {
        let mut image = vec![0u8; DYN_SIZE];
        image[..DYN_SIZE].copy_from_slice(bytemuck::bytes_of(&Elf64Dyn {
            d_tag: dt::RELAENT,
            d_val: 0x18,
        }));
        assert!(relocate(&mut image, 0, BASE).is_err());
    }
}
