//! Linked-library inspection
//!
//! Reads the list of shared libraries a binary links against straight from
//! its ELF dynamic section or Mach-O load commands.

use goblin::mach::{Mach, SingleArch};
use goblin::Object;
use std::path::Path;

/// Libraries `path` links against, in load-command order
pub fn linked_libraries(path: &Path) -> Result<Vec<String>, String> {
    let content = std::fs::read(path).map_err(|e| e.to_string())?;
    parse_libraries(&content)
}

/// Libraries named by an in-memory binary
pub fn parse_libraries(content: &[u8]) -> Result<Vec<String>, String> {
    match Object::parse(content).map_err(|e| e.to_string())? {
        Object::Elf(elf) => Ok(elf.libraries.iter().map(ToString::to_string).collect()),
        Object::Mach(Mach::Binary(macho)) => Ok(macho_libs(&macho.libs)),
        Object::Mach(Mach::Fat(multi)) => match multi.get(0).map_err(|e| e.to_string())? {
            SingleArch::MachO(macho) => Ok(macho_libs(&macho.libs)),
            SingleArch::Archive(_) => Err("fat binary holds an archive".to_string()),
        },
        Object::PE(_) => Err("PE binaries are not supported".to_string()),
        Object::Archive(_) => Err("static archives do not link libraries".to_string()),
        _ => Err("unrecognised binary format".to_string()),
    }
}

// goblin lists the binary itself as "self"
fn macho_libs(libs: &[&str]) -> Vec<String> {
    libs.iter()
        .filter(|lib| **lib != "self")
        .map(ToString::to_string)
        .collect()
}
