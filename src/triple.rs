//! Target triples, `arch-vendor-os[-env]`.

use crate::error::DriverError;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Triple {
    pub arch: String,
    pub vendor: String,
    pub os: String,
    pub env: Option<String>,
}

/// The operating system families the driver knows how to target.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OsFamily {
    Linux,
    Darwin,
    Windows,
}

impl Triple {
    /// Parses `arch-os`, `arch-vendor-os` or `arch-vendor-os-env`.
    pub fn parse(text: &str) -> Result<Triple, DriverError> {
        let parts: Vec<&str> = text.split('-').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(DriverError::BadTriple(text.to_string()));
        }
        let owned = |s: &str| s.to_string();
        match parts.as_slice() {
            [arch, os] => Ok(Triple {
                arch: owned(arch),
                vendor: "unknown".to_string(),
                os: owned(os),
                env: None,
            }),
            [arch, vendor, os] => Ok(Triple {
                arch: owned(arch),
                vendor: owned(vendor),
                os: owned(os),
                env: None,
            }),
            [arch, vendor, os, env] => Ok(Triple {
                arch: owned(arch),
                vendor: owned(vendor),
                os: owned(os),
                env: Some(owned(env)),
            }),
            _ => Err(DriverError::BadTriple(text.to_string())),
        }
    }

    /// The triple of the machine the driver itself was built for.
    pub fn host() -> Triple {
        let arch = std::env::consts::ARCH.to_string();
        match std::env::consts::OS {
            "macos" => Triple {
                arch,
                vendor: "apple".to_string(),
                os: "macosx".to_string(),
                env: None,
            },
            "windows" => Triple {
                arch,
                vendor: "pc".to_string(),
                os: "windows".to_string(),
                env: Some("msvc".to_string()),
            },
            os => Triple {
                arch,
                vendor: "unknown".to_string(),
                os: os.to_string(),
                env: if os == "linux" {
                    Some("gnu".to_string())
                } else {
                    None
                },
            },
        }
    }

    /// The OS name without any trailing version, e.g. "macosx" for
    /// "macosx13.0".
    pub fn os_name(&self) -> &str {
        self.os
            .trim_end_matches(|c: char| c.is_ascii_digit() || c == '.')
    }

    pub fn os_family(&self) -> Option<OsFamily> {
        match self.os_name() {
            "linux" | "freebsd" | "netbsd" | "openbsd" | "android" => Some(OsFamily::Linux),
            "darwin" | "macos" | "macosx" | "ios" | "tvos" | "watchos" => Some(OsFamily::Darwin),
            "windows" | "win32" => Some(OsFamily::Windows),
            _ => None,
        }
    }

    /// The architecture as Darwin's linker spells it.
    pub fn darwin_arch(&self) -> &str {
        match self.arch.as_str() {
            "aarch64" => "arm64",
            arch => arch,
        }
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.arch, self.vendor, self.os)?;
        if let Some(env) = &self.env {
            write!(f, "-{}", env)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_forms() {
        let t = Triple::parse("x86_64-unknown-linux-gnu").unwrap();
        assert_eq!(t.arch, "x86_64");
        assert_eq!(t.env.as_deref(), Some("gnu"));
        assert_eq!(t.os_family(), Some(OsFamily::Linux));
        assert_eq!(t.to_string(), "x86_64-unknown-linux-gnu");

        let t = Triple::parse("aarch64-apple-macosx13.0").unwrap();
        assert_eq!(t.os_name(), "macosx");
        assert_eq!(t.os_family(), Some(OsFamily::Darwin));
        assert_eq!(t.darwin_arch(), "arm64");

        let t = Triple::parse("x86_64-windows").unwrap();
        assert_eq!(t.vendor, "unknown");
        assert_eq!(t.os_family(), Some(OsFamily::Windows));
    }

    #[test]
    fn bad_triples() {
        for text in ["", "x86_64", "x86_64--linux", "a-b-c-d-e"] {
            assert!(
                matches!(Triple::parse(text), Err(DriverError::BadTriple(_))),
                "{:?}",
                text
            );
        }
        let t = Triple::parse("riscv64-unknown-haiku").unwrap();
        assert_eq!(t.os_family(), None);
    }

    #[test]
    fn host_is_usable() {
        let host = Triple::host();
        assert_eq!(Triple::parse(&host.to_string()).unwrap(), host);
    }
}
