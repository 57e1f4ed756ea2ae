// ABOUTME: Target runtime model parsed from a package's runtime setting.
// ABOUTME: "native", "net-4.5", "netcore-2.1", "mono-4.0"; an empty setting means native.

use std::fmt;
use std::str::FromStr;

/// Runtime family an agent is launched under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Runtime {
    /// The agent binary runs directly
    Native,
    /// .NET Framework agent executable
    Net,
    /// .NET Core agent assembly started through `dotnet`
    NetCore,
    /// .NET Framework agent executable started through `mono`
    Mono,
}

impl Runtime {
    pub fn framework_identifier(&self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Net | Self::Mono => ".NETFramework",
            Self::NetCore => ".NETCoreApp",
        }
    }
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native => write!(f, "native"),
            Self::Net => write!(f, "net"),
            Self::NetCore => write!(f, "netcore"),
            Self::Mono => write!(f, "mono"),
        }
    }
}

impl FromStr for Runtime {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "native" => Ok(Self::Native),
            "net" => Ok(Self::Net),
            "netcore" => Ok(Self::NetCore),
            "mono" => Ok(Self::Mono),
            _ => anyhow::bail!("Unknown runtime: {}", s),
        }
    }
}

/// `major.minor[.build]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameworkVersion {
    pub major: u32,
    pub minor: u32,
    pub build: Option<u32>,
}

impl FrameworkVersion {
    pub fn new(major: u32, minor: u32) -> Self {
        Self {
            major,
            minor,
            build: None,
        }
    }
}

impl fmt::Display for FrameworkVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.build {
            Some(build) => write!(f, "{}.{}.{}", self.major, self.minor, build),
            None => write!(f, "{}.{}", self.major, self.minor),
        }
    }
}

impl FromStr for FrameworkVersion {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix('v').unwrap_or(s);
        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() < 2 || parts.len() > 3 {
            anyhow::bail!("Invalid framework version: {}", s);
        }

        let number = |part: &str| -> anyhow::Result<u32> {
            part.parse()
                .map_err(|_| anyhow::anyhow!("Invalid framework version: {}", s))
        };

        Ok(Self {
            major: number(parts[0])?,
            minor: number(parts[1])?,
            build: parts.get(2).map(|b| number(b)).transpose()?,
        })
    }
}

/// Runtime family plus optional version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeFramework {
    pub runtime: Runtime,
    pub version: Option<FrameworkVersion>,
}

impl RuntimeFramework {
    pub fn new(runtime: Runtime, version: Option<FrameworkVersion>) -> Self {
        Self { runtime, version }
    }

    /// Runtime used when a package does not ask for one
    pub fn native() -> Self {
        Self::new(Runtime::Native, None)
    }

    /// Parse a runtime setting; empty selects [`RuntimeFramework::native`]
    pub fn parse(setting: &str) -> anyhow::Result<Self> {
        let setting = setting.trim();
        if setting.is_empty() {
            return Ok(Self::native());
        }

        match setting.split_once('-') {
            Some((runtime, version)) => Ok(Self::new(runtime.parse()?, Some(version.parse()?))),
            None => Ok(Self::new(setting.parse()?, None)),
        }
    }

    /// Version passed to `mono --runtime=v<...>`
    pub fn clr_version(&self) -> String {
        match self.version {
            Some(v) if v.major >= 4 => "4.0.30319".to_string(),
            Some(_) => "2.0.50727".to_string(),
            None => "4.0.30319".to_string(),
        }
    }
}

impl fmt::Display for RuntimeFramework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.version {
            Some(version) => write!(f, "{}-{}", self.runtime, version),
            None => write!(f, "{}", self.runtime),
        }
    }
}

impl FromStr for RuntimeFramework {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
