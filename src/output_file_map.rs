//! Output file maps: a two-level map from input path to the output paths, by
//! file type, that compiling that input should produce.
//!
//! The on-disk form is a small YAML subset:
//!
//! ```text
//! # comment
//! "a.stone":
//!   object: "build/a.o"
//!   dependencies: "build/a.d"
//! b.stone: { object: "build/b.o" }
//! "": { stonemodule: "build/main.stonemodule" }
//! ```
//!
//! The empty input key holds the outputs of a whole-module product.

use crate::file::FileType;
use crate::scanner::{ParseResult, Scanner};
use anyhow::anyhow;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

pub type TypeToPathMap = BTreeMap<FileType, String>;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct OutputFileMap {
    inputs: BTreeMap<String, TypeToPathMap>,
}

impl OutputFileMap {
    pub fn new() -> Self {
        OutputFileMap::default()
    }

    /// Loads a map from `path`, resolving relative paths in it against
    /// `work_dir` when that is non-empty.
    pub fn load_from_path(path: &Path, work_dir: &str) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| anyhow!("read {}: {}", path.display(), err))?;
        Self::load_from_str(&text, path, work_dir)
    }

    pub fn load_from_str(text: &str, filename: &Path, work_dir: &str) -> anyhow::Result<Self> {
        let mut parser = Parser {
            scanner: Scanner::new(text),
            work_dir,
        };
        match parser.parse() {
            Ok(map) => Ok(map),
            Err(err) => Err(anyhow!(parser.scanner.format_parse_error(filename, err))),
        }
    }

    /// The outputs for `input`, or None when the map has no entry for it.
    pub fn output_map_for_input(&self, input: &str) -> Option<&TypeToPathMap> {
        self.inputs.get(input)
    }

    pub fn get_or_create_output_map_for_input(&mut self, input: &str) -> &mut TypeToPathMap {
        self.inputs.entry(input.to_string()).or_default()
    }

    pub fn output_map_for_single_output(&self) -> Option<&TypeToPathMap> {
        self.output_map_for_input("")
    }

    pub fn output_for(&self, input: &str, file_type: FileType) -> Option<&str> {
        self.output_map_for_input(input)?
            .get(&file_type)
            .map(|s| s.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Human-readable listing, one `input -> type: "path"` line per output.
    pub fn dump(&self, w: &mut dyn Write) -> std::io::Result<()> {
        for (input, outputs) in &self.inputs {
            for (file_type, path) in outputs {
                writeln!(w, "{} -> {}: \"{}\"", input, file_type, path)?;
            }
        }
        Ok(())
    }

    /// Writes the map for `inputs` in a form load_from_str() parses.
    /// Inputs without an entry get an empty sub-map.
    pub fn write(&self, w: &mut dyn Write, inputs: &[&str]) -> std::io::Result<()> {
        for input in inputs {
            write_quoted(w, input)?;
            write!(w, ":")?;
            let outputs = match self.output_map_for_input(input) {
                Some(outputs) if !outputs.is_empty() => outputs,
                _ => {
                    writeln!(w, " {{}}")?;
                    continue;
                }
            };
            writeln!(w)?;
            for (file_type, path) in outputs {
                write!(w, "  {}: ", file_type)?;
                write_quoted(w, path)?;
                writeln!(w)?;
            }
        }
        Ok(())
    }
}

fn write_quoted(w: &mut dyn Write, s: &str) -> std::io::Result<()> {
    write!(w, "\"")?;
    for c in s.chars() {
        match c {
            '"' => write!(w, "\\\"")?,
            '\\' => write!(w, "\\\\")?,
            '\n' => write!(w, "\\n")?,
            '\t' => write!(w, "\\t")?,
            c => write!(w, "{}", c)?,
        }
    }
    write!(w, "\"")
}

struct Parser<'a> {
    scanner: Scanner<'a>,
    work_dir: &'a str,
}

impl<'a> Parser<'a> {
    fn parse(&mut self) -> ParseResult<OutputFileMap> {
        let mut map = OutputFileMap::new();
        loop {
            self.skip_blank_lines();
            if self.scanner.at_end() {
                break;
            }
            if self.scanner.peek() == ' ' || self.scanner.peek() == '\t' {
                return self.scanner.parse_error("unexpected indentation");
            }
            let input = self.read_scalar(&[':'])?;
            self.scanner.expect(':')?;
            self.scanner.skip_spaces();
            let outputs = if self.scanner.skip('{') {
                let outputs = self.read_flow_map()?;
                self.end_of_line()?;
                outputs
            } else {
                self.end_of_line()?;
                self.read_block_map()?
            };
            let input = self.resolve(input);
            map.inputs.insert(input, outputs);
        }
        Ok(map)
    }

    /// `{ kind: path, ... }` with the opening brace already consumed.
    fn read_flow_map(&mut self) -> ParseResult<TypeToPathMap> {
        let mut outputs = TypeToPathMap::new();
        loop {
            self.scanner.skip_spaces();
            if self.scanner.skip('}') {
                return Ok(outputs);
            }
            let kind = self.read_scalar(&[':'])?;
            self.scanner.expect(':')?;
            self.scanner.skip_spaces();
            let path = self.read_scalar(&[',', '}'])?;
            self.insert_output(&mut outputs, &kind, path);
            self.scanner.skip_spaces();
            if self.scanner.skip(',') {
                continue;
            }
            self.scanner.expect('}')?;
            return Ok(outputs);
        }
    }

    /// Indented `kind: path` lines following an input key.
    fn read_block_map(&mut self) -> ParseResult<TypeToPathMap> {
        let mut outputs = TypeToPathMap::new();
        loop {
            self.skip_blank_lines();
            if !(self.scanner.peek() == ' ' || self.scanner.peek() == '\t') {
                return Ok(outputs);
            }
            self.scanner.skip_spaces();
            let kind = self.read_scalar(&[':'])?;
            self.scanner.expect(':')?;
            self.scanner.skip_spaces();
            let path = self.read_scalar(&[])?;
            self.end_of_line()?;
            self.insert_output(&mut outputs, &kind, path);
        }
    }

    fn insert_output(&self, outputs: &mut TypeToPathMap, kind: &str, path: String) {
        // Unknown kinds are ignored so that maps written for newer drivers
        // still load.
        if let Some(file_type) = FileType::from_name(kind) {
            outputs.insert(file_type, self.resolve(path));
        }
    }

    /// Reads a quoted string, or a bare one ending at a newline, a comment or
    /// any of `stops`.
    fn read_scalar(&mut self, stops: &[char]) -> ParseResult<String> {
        if self.scanner.skip('"') {
            return self.read_quoted();
        }
        let start = self.scanner.ofs;
        while !self.scanner.at_end() && !self.scanner.peek_newline() {
            let c = self.scanner.peek();
            if c == '#' || stops.contains(&c) {
                break;
            }
            self.scanner.next();
        }
        let text = self.scanner.slice(start, self.scanner.ofs).trim_end();
        if text.is_empty() {
            return self.scanner.parse_error("expected a value");
        }
        Ok(text.to_string())
    }

    fn read_quoted(&mut self) -> ParseResult<String> {
        let mut bytes = Vec::new();
        loop {
            if self.scanner.at_end() || self.scanner.peek_newline() {
                return self.scanner.parse_error("unterminated string");
            }
            match self.scanner.read() {
                '"' => break,
                '\\' => match self.scanner.read() {
                    '"' => bytes.push(b'"'),
                    '\\' => bytes.push(b'\\'),
                    '/' => bytes.push(b'/'),
                    'n' => bytes.push(b'\n'),
                    't' => bytes.push(b'\t'),
                    c => {
                        self.scanner.back();
                        return self.scanner.parse_error(format!("bad escape {:?}", c));
                    }
                },
                c => bytes.push(c as u8),
            }
        }
        // The input is a str and we only split at ASCII, so this is valid UTF-8.
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn end_of_line(&mut self) -> ParseResult<()> {
        self.scanner.skip_spaces();
        if self.scanner.peek() == '#' {
            self.scanner.skip_to_newline();
        }
        if self.scanner.at_end() {
            return Ok(());
        }
        if !self.scanner.peek_newline() {
            return self
                .scanner
                .parse_error(format!("unexpected {:?}", self.scanner.peek()));
        }
        self.scanner.skip('\r');
        self.scanner.next();
        Ok(())
    }

    fn skip_blank_lines(&mut self) {
        loop {
            let start = self.scanner.ofs;
            self.scanner.skip_spaces();
            if self.scanner.peek() == '#' {
                self.scanner.skip_to_newline();
            }
            if self.scanner.peek_newline() {
                self.scanner.skip('\r');
                self.scanner.next();
                continue;
            }
            if !self.scanner.at_end() {
                // Not blank: rewind so indentation is visible to the caller.
                while self.scanner.ofs > start {
                    self.scanner.back();
                }
            }
            return;
        }
    }

    fn resolve(&self, path: String) -> String {
        if self.work_dir.is_empty() || path.is_empty() || path == "-" || Path::new(&path).is_absolute()
        {
            return path;
        }
        Path::new(self.work_dir)
            .join(path)
            .to_string_lossy()
            .into_owned()
    }
}
