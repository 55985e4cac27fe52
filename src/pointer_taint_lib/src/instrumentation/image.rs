//! Loaded images (executables and shared libraries) and the routines they contain.

use crate::prelude::*;
use goblin::elf;
use goblin::Object;

/// A function inside an image.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
pub struct Routine {
    /// The symbol name of the routine.
    pub name: String,
    /// The entry point of the routine.
    pub address: u64,
}

/// A module loaded into the monitored process.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
pub struct Image {
    /// A unique identifier of the image.
    pub id: u32,
    /// The file name or path of the image.
    pub name: String,
    /// Set for the executable the process was started from.
    #[serde(default)]
    pub is_main_executable: bool,
    /// The lowest address occupied by the image.
    pub low_address: u64,
    /// The highest address occupied by the image.
    pub high_address: u64,
    /// The routines known for the image.
    #[serde(default)]
    pub routines: Vec<Routine>,
}

impl Image {
    /// Returns `true` if the address lies inside the image.
    pub fn contains(&self, address: u64) -> bool {
        self.low_address <= address && address <= self.high_address
    }

    /// Find a routine of the image by its name.
    pub fn find_routine(&self, name: &str) -> Option<&Routine> {
        self.routines.iter().find(|routine| routine.name == name)
    }

    /// Add the function symbols of the given ELF file to the routines of the image.
    ///
    /// For position independent executables the symbol addresses are relocated
    /// so that the first loadable segment starts at `low_address`.
    /// Routines already known under the same name are kept.
    pub fn add_elf_symbols(&mut self, binary: &[u8]) -> Result<(), Error> {
        let elf_file = match Object::parse(binary)? {
            Object::Elf(elf_file) => elf_file,
            _ => return Err(anyhow!("Binary type not yet supported")),
        };
        let relocation = if elf_file.header.e_type == elf::header::ET_DYN {
            let link_base = elf_file
                .program_headers
                .iter()
                .find(|header| header.p_type == elf::program_header::PT_LOAD)
                .map(|header| header.p_vaddr)
                .ok_or_else(|| anyhow!("No loadable segment bounds found."))?;
            self.low_address.wrapping_sub(link_base)
        } else {
            0
        };
        for symbol in elf_file.syms.iter() {
            if symbol.st_type() != elf::sym::STT_FUNC || symbol.st_value == 0 {
                continue;
            }
            let name = match elf_file.strtab.get_at(symbol.st_name) {
                Some(name) if !name.is_empty() => name,
                _ => continue,
            };
            if self.find_routine(name).is_none() {
                self.routines.push(Routine {
                    name: name.to_string(),
                    address: symbol.st_value.wrapping_add(relocation),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl Image {
        pub fn mock(id: u32, name: &str, is_main_executable: bool, low: u64, high: u64) -> Image {
            Image {
                id,
                name: name.to_string(),
                is_main_executable,
                low_address: low,
                high_address: high,
                routines: Vec::new(),
            }
        }
    }

    #[test]
    fn address_range() {
        let image = Image::mock(0, "prog", true, 0x400000, 0x401fff);
        assert!(image.contains(0x400000));
        assert!(image.contains(0x401fff));
        assert!(!image.contains(0x402000));
        assert!(!image.contains(0x3fffff));
    }

    #[test]
    fn routine_lookup() {
        let mut image = Image::mock(0, "prog", true, 0x400000, 0x401fff);
        image.routines.push(Routine {
            name: "parse".to_string(),
            address: 0x401000,
        });
        assert_eq!(image.find_routine("parse").unwrap().address, 0x401000);
        assert!(image.find_routine("main").is_none());
    }

    #[test]
    fn non_elf_input_is_rejected() {
        let mut image = Image::mock(0, "prog", true, 0x400000, 0x401fff);
        assert!(image.add_elf_symbols(b"definitely not an ELF file").is_err());
        assert!(image.routines.is_empty());
    }
}
