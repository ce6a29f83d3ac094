//! Driver inputs and the file types they are classified into.

use crate::densemap::{dense_id, DenseMap};
use std::path::Path;

/// The role a file plays in a compilation.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum FileType {
    /// Stone source text.
    Source,
    Assembly,
    IR,
    BitCode,
    Object,
    /// A linked product: executable, dynamic or static library.
    Image,
    /// A serialized module interface, partial or merged.
    Module,
    /// Make-style dependency output of a compile.
    Dependencies,
    None,
}

impl FileType {
    pub const ALL: [FileType; 9] = [
        FileType::Source,
        FileType::Assembly,
        FileType::IR,
        FileType::BitCode,
        FileType::Object,
        FileType::Image,
        FileType::Module,
        FileType::Dependencies,
        FileType::None,
    ];

    /// The name used for this type in output file maps and diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            FileType::Source => "source",
            FileType::Assembly => "assembly",
            FileType::IR => "llvm-ir",
            FileType::BitCode => "llvm-bc",
            FileType::Object => "object",
            FileType::Image => "image",
            FileType::Module => "stonemodule",
            FileType::Dependencies => "dependencies",
            FileType::None => "none",
        }
    }

    /// The extension (without dot) files of this type are written with.
    /// Images have no fixed extension; it depends on the toolchain.
    pub fn extension(self) -> &'static str {
        match self {
            FileType::Source => "stone",
            FileType::Assembly => "s",
            FileType::IR => "ll",
            FileType::BitCode => "bc",
            FileType::Object => "o",
            FileType::Module => "stonemodule",
            FileType::Dependencies => "d",
            FileType::Image | FileType::None => "",
        }
    }

    pub fn from_name(name: &str) -> Option<FileType> {
        FileType::ALL.iter().copied().find(|ty| ty.name() == name)
    }

    pub fn from_extension(ext: &str) -> Option<FileType> {
        match ext {
            "stone" => Some(FileType::Source),
            "s" | "S" => Some(FileType::Assembly),
            "ll" => Some(FileType::IR),
            "bc" => Some(FileType::BitCode),
            "o" | "obj" => Some(FileType::Object),
            "stonemodule" => Some(FileType::Module),
            "d" => Some(FileType::Dependencies),
            "a" | "so" | "dylib" | "dll" | "lib" | "exe" => Some(FileType::Image),
            _ => None,
        }
    }

    pub fn from_path(path: &str) -> Option<FileType> {
        let ext = Path::new(path).extension()?.to_str()?;
        FileType::from_extension(ext)
    }

    pub fn is_textual(self) -> bool {
        match self {
            FileType::Source | FileType::Assembly | FileType::IR | FileType::Dependencies => true,
            FileType::BitCode
            | FileType::Object
            | FileType::Image
            | FileType::Module
            | FileType::None => false,
        }
    }

    /// Types produced by the compiler after backend code generation; a
    /// multi-threaded compile emits one of these per primary input.
    pub fn is_after_backend_codegen(self) -> bool {
        match self {
            FileType::Assembly | FileType::IR | FileType::BitCode | FileType::Object => true,
            FileType::Source
            | FileType::Image
            | FileType::Module
            | FileType::Dependencies
            | FileType::None => false,
        }
    }

    /// Types that are parsed as part of the module being compiled.
    pub fn is_part_of_compilation(self) -> bool {
        match self {
            FileType::Source => true,
            FileType::Assembly
            | FileType::IR
            | FileType::BitCode
            | FileType::Object
            | FileType::Image
            | FileType::Module
            | FileType::Dependencies
            | FileType::None => false,
        }
    }

    pub fn can_link(self) -> bool {
        match self {
            FileType::Object => true,
            FileType::Source
            | FileType::Assembly
            | FileType::IR
            | FileType::BitCode
            | FileType::Image
            | FileType::Module
            | FileType::Dependencies
            | FileType::None => false,
        }
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

dense_id!(
    /// Identifies an input file within one driver invocation.
    FileId
);

#[derive(Debug, Clone)]
pub struct File {
    pub name: String,
    pub file_type: FileType,
    pub id: FileId,
}

impl File {
    /// File name without directory or extension, used to derive output names.
    pub fn stem(&self) -> &str {
        Path::new(&self.name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.name)
    }
}

/// The classified input files of one driver invocation, in command-line order.
#[derive(Default)]
pub struct Inputs {
    files: DenseMap<FileId, File>,
}

impl Inputs {
    pub fn new() -> Self {
        Inputs::default()
    }

    pub fn add(&mut self, name: impl Into<String>, file_type: FileType) -> FileId {
        let id = self.files.next_id();
        self.files.push(File {
            name: name.into(),
            file_type,
            id,
        })
    }

    pub fn get(&self, id: FileId) -> &File {
        &self.files[id]
    }

    pub fn iter(&self) -> impl Iterator<Item = &File> {
        self.files.values()
    }

    pub fn of_type(&self, file_type: FileType) -> impl Iterator<Item = &File> {
        self.iter().filter(move |f| f.file_type == file_type)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for ty in FileType::ALL {
            assert_eq!(FileType::from_name(ty.name()), Some(ty));
        }
        assert_eq!(FileType::from_name("swiftmodule"), None);
    }

    #[test]
    fn classify_paths() {
        assert_eq!(FileType::from_path("dir/a.stone"), Some(FileType::Source));
        assert_eq!(FileType::from_path("a.o"), Some(FileType::Object));
        assert_eq!(FileType::from_path("a.obj"), Some(FileType::Object));
        assert_eq!(FileType::from_path("x.ll"), Some(FileType::IR));
        assert_eq!(FileType::from_path("noext"), None);
        assert_eq!(FileType::from_path("a.txt"), None);
    }

    #[test]
    fn predicates() {
        assert!(FileType::Source.is_part_of_compilation());
        assert!(!FileType::Object.is_part_of_compilation());
        assert!(FileType::Object.can_link());
        assert!(!FileType::Source.can_link());
        assert!(FileType::BitCode.is_after_backend_codegen());
        assert!(!FileType::BitCode.is_textual());
        assert!(FileType::IR.is_textual());
    }

    #[test]
    fn inputs_keep_order() {
        let mut inputs = Inputs::new();
        let a = inputs.add("src/a.stone", FileType::Source);
        let b = inputs.add("b.o", FileType::Object);
        assert_eq!(inputs.get(a).stem(), "a");
        assert_eq!(inputs.get(b).stem(), "b");
        let names: Vec<_> = inputs.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["src/a.stone", "b.o"]);
        assert_eq!(inputs.of_type(FileType::Object).count(), 1);
    }
}
