//! Support code for e2e tests, which run stone as a binary against fake
//! tools written as shell scripts.

mod basic;
mod failures;
mod incremental;

use std::path::PathBuf;

pub fn stone_binary() -> PathBuf {
    std::env::current_exe()
        .expect("test binary path")
        .parent()
        .expect("test binary directory")
        .parent()
        .expect("binary directory")
        .join(format!("stone{}", std::env::consts::EXE_SUFFIX))
}

fn print_output(out: &std::process::Output) {
    // Gross: use print! instead of writing to stdout so Rust test
    // framework can capture it.
    print!("{}", String::from_utf8_lossy(&out.stdout));
    print!("{}", String::from_utf8_lossy(&out.stderr));
}

pub fn assert_output_contains(out: &std::process::Output, text: &str) {
    let out = String::from_utf8_lossy(&out.stdout);
    if !out.contains(text) {
        panic!(
            "assertion failed; expected output to contain {:?} but got:\n{}",
            text, out
        );
    }
}

pub fn assert_stderr_contains(out: &std::process::Output, text: &str) {
    let err = String::from_utf8_lossy(&out.stderr);
    if !err.contains(text) {
        panic!(
            "assertion failed; expected stderr to contain {:?} but got:\n{}",
            text, err
        );
    }
}

/// The frontend: fails when a primary file is named bad.stone, otherwise
/// creates every output it was asked for.
const FAKE_COMPILER: &str = r#"#!/bin/sh
echo "stone-compile $*" >> invocations.log
prev=
for arg in "$@"; do
  if [ "$prev" = "-primary-file" ]; then
    case "$arg" in
      *bad.stone) echo "$arg:1:1: error: bad input" >&2; exit 1 ;;
    esac
  fi
  prev=$arg
done
prev=
for arg in "$@"; do
  case "$prev" in
    -o|-emit-module-path|-emit-dependencies-path) : > "$arg" ;;
  esac
  prev=$arg
done
"#;

/// A linker driver: creates the file after -o.
pub const FAKE_LINKER: &str = r#"#!/bin/sh
echo "clang $*" >> invocations.log
prev=
for arg in "$@"; do
  if [ "$prev" = "-o" ]; then : > "$arg"; fi
  prev=$arg
done
"#;

/// `ar crs <archive> <objects>...`
const FAKE_ARCHIVER: &str = r#"#!/bin/sh
echo "ar $*" >> invocations.log
: > "$2"
"#;

/// Manages a temporary directory for invoking stone.
pub struct TestSpace {
    dir: tempfile::TempDir,
}

impl TestSpace {
    pub fn new() -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        Ok(TestSpace { dir })
    }

    /// A space whose tools directory has every fake tool.
    pub fn with_tools() -> anyhow::Result<Self> {
        let space = TestSpace::new()?;
        space.install_tool("stone-compile", FAKE_COMPILER)?;
        space.install_tool("clang", FAKE_LINKER)?;
        space.install_tool("ar", FAKE_ARCHIVER)?;
        Ok(space)
    }

    pub fn path(&self, path: &str) -> PathBuf {
        self.dir.path().join(path)
    }

    pub fn install_tool(&self, name: &str, script: &str) -> anyhow::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        let tools = self.path("tools");
        std::fs::create_dir_all(&tools)?;
        let path = tools.join(name);
        std::fs::write(&path, script)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
        Ok(())
    }

    /// Write a file into the working space.
    pub fn write(&self, path: &str, content: &str) -> std::io::Result<()> {
        std::fs::write(self.path(path), content)
    }

    /// Read a file from the working space.
    pub fn read(&self, path: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.path(path))
    }

    pub fn exists(&self, path: &str) -> bool {
        self.path(path).exists()
    }

    /// Moves a file's mtime `secs` into the future, so it reads as changed
    /// even on coarse-grained file systems.
    pub fn touch_later(&self, path: &str, secs: i64) -> anyhow::Result<()> {
        let meta = std::fs::metadata(self.path(path))?;
        let mtime = filetime::FileTime::from_last_modification_time(&meta);
        let later = filetime::FileTime::from_unix_time(mtime.unix_seconds() + secs, 0);
        filetime::set_file_mtime(self.path(path), later)?;
        Ok(())
    }

    /// Tool invocations logged so far, one per line.
    pub fn invocations(&self) -> Vec<String> {
        match std::fs::read_to_string(self.path("invocations.log")) {
            Ok(text) => text.lines().map(String::from).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn count_invocations(&self, tool: &str) -> usize {
        self.invocations()
            .iter()
            .filter(|line| line.split(' ').next() == Some(tool))
            .count()
    }

    pub fn clear_invocations(&self) -> std::io::Result<()> {
        match std::fs::remove_file(self.path("invocations.log")) {
            Err(err) if err.kind() != std::io::ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }

    /// A stone command targeting Linux with this space's tools and an empty
    /// PATH, so no real tool is ever picked up.
    pub fn stone(&self, args: &[&str]) -> std::process::Command {
        let mut cmd = std::process::Command::new(stone_binary());
        cmd.arg("-target")
            .arg("x86_64-unknown-linux-gnu")
            .arg("-tools-directory")
            .arg(self.path("tools"))
            .args(args)
            .env("PATH", "")
            .env_remove("RUST_LOG")
            .current_dir(self.dir.path());
        cmd
    }

    /// Invoke stone, returning process output.
    pub fn run(&self, args: &[&str]) -> std::io::Result<std::process::Output> {
        self.stone(args).output()
    }

    /// Like run, but also print output and fail if the build failed.
    pub fn run_expect(&self, args: &[&str]) -> anyhow::Result<std::process::Output> {
        let out = self.run(args)?;
        if !out.status.success() {
            print_output(&out);
            anyhow::bail!("build failed, status {}", out.status);
        }
        Ok(out)
    }

    /// Persist the temp dir locally and abort the test.  Debugging helper.
    #[allow(dead_code)]
    pub fn eject(self) -> ! {
        panic!("ejected at {:?}", self.dir.into_path());
    }
}
