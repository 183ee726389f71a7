//! Capabilities and sandbox modes: the permission vocabulary of the sandbox.

use std::collections::BTreeSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// An atomic permission tag.
///
/// Serialized as `"<resource>:<verb>"`, e.g. `"fs:read"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Capability {
    #[serde(rename = "fs:read")]
    FsRead,
    #[serde(rename = "fs:write")]
    FsWrite,
    #[serde(rename = "fs:delete")]
    FsDelete,
    #[serde(rename = "fs:move")]
    FsMove,
    #[serde(rename = "state:read")]
    StateRead,
    #[serde(rename = "state:write")]
    StateWrite,
    #[serde(rename = "network:read")]
    NetworkRead,
    #[serde(rename = "network:write")]
    NetworkWrite,
    #[serde(rename = "exec:command")]
    ExecCommand,
    #[serde(rename = "memory:read")]
    MemoryRead,
    #[serde(rename = "memory:write")]
    MemoryWrite,
}

/// Ordered set of capabilities.
pub type CapabilitySet = BTreeSet<Capability>;

impl Capability {
    pub const ALL: [Capability; 11] = [
        Capability::FsRead,
        Capability::FsWrite,
        Capability::FsDelete,
        Capability::FsMove,
        Capability::StateRead,
        Capability::StateWrite,
        Capability::NetworkRead,
        Capability::NetworkWrite,
        Capability::ExecCommand,
        Capability::MemoryRead,
        Capability::MemoryWrite,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FsRead => "fs:read",
            Self::FsWrite => "fs:write",
            Self::FsDelete => "fs:delete",
            Self::FsMove => "fs:move",
            Self::StateRead => "state:read",
            Self::StateWrite => "state:write",
            Self::NetworkRead => "network:read",
            Self::NetworkWrite => "network:write",
            Self::ExecCommand => "exec:command",
            Self::MemoryRead => "memory:read",
            Self::MemoryWrite => "memory:write",
        }
    }

    /// Write-type capabilities are refused outright in [`SandboxMode::Strict`].
    pub fn is_write(&self) -> bool {
        !matches!(
            self,
            Self::FsRead | Self::StateRead | Self::NetworkRead | Self::MemoryRead
        )
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown capability: {0}")]
pub struct UnknownCapability(pub String);

impl FromStr for Capability {
    type Err = UnknownCapability;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Capability::ALL
            .iter()
            .find(|c| c.as_str() == s.trim())
            .copied()
            .ok_or_else(|| UnknownCapability(s.to_string()))
    }
}

/// Parse a comma-separated capability list (`"fs:read,state:read"`).
pub fn parse_capability_list(list: &str) -> Result<CapabilitySet, UnknownCapability> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Capability::from_str)
        .collect()
}

/// Render a capability set as `"a, b, c"` for messages.
pub fn format_capabilities(caps: &CapabilitySet) -> String {
    caps.iter()
        .map(Capability::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Privilege tier modulating how granted capabilities are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxMode {
    /// Read-only: write-type capabilities are always denied.
    Strict,
    /// Capabilities enforced as granted, path whitelist enforced.
    Controlled,
    /// Capabilities enforced as granted, no path whitelist.
    Trusted,
}

impl SandboxMode {
    pub fn enforces_path_whitelist(self) -> bool {
        matches!(self, Self::Controlled)
    }
}

impl std::fmt::Display for SandboxMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Strict => write!(f, "strict"),
            Self::Controlled => write!(f, "controlled"),
            Self::Trusted => write!(f, "trusted"),
        }
    }
}

impl FromStr for SandboxMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "controlled" => Ok(Self::Controlled),
            "trusted" => Ok(Self::Trusted),
            other => Err(format!("unknown sandbox mode: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Tool classification
// ---------------------------------------------------------------------------

/// What a tool does, as far as its name tells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolVerb {
    Read,
    Write,
    Delete,
    Move,
    Execute,
    Fetch,
    Unknown,
}

/// What a tool touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolResource {
    Fs,
    State,
    Network,
    Memory,
}

const DELETE_WORDS: &[&str] = &["delete", "remove", "rm", "unlink", "rmdir", "purge"];
const MOVE_WORDS: &[&str] = &["move", "rename", "mv"];
const EXECUTE_WORDS: &[&str] = &[
    "exec", "execute", "run", "shell", "bash", "command", "cmd", "spawn",
];
const WRITE_WORDS: &[&str] = &[
    "write", "create", "edit", "update", "save", "append", "patch", "format", "mkdir", "set",
    "put", "post", "upload", "send", "store", "replace", "insert",
];
const FETCH_WORDS: &[&str] = &["fetch", "download", "http", "web", "url", "browse", "curl"];
const READ_WORDS: &[&str] = &[
    "read", "get", "list", "search", "find", "grep", "glob", "view", "cat", "stat", "show",
    "open", "load", "query", "ls", "inspect", "diff",
];

const STATE_WORDS: &[&str] = &["state", "todo", "task", "session", "context"];
const NETWORK_WORDS: &[&str] = &["network", "http", "url", "web", "api", "fetch", "download"];
const MEMORY_WORDS: &[&str] = &["memory", "memo", "remember", "recall", "note", "notes"];

/// The classification of a tool name into a (verb, resource) pair.
///
/// Resolution goes through closed keyword tables; the result maps to a
/// constant capability set via [`ToolClass::required_capabilities`]. This is a
/// convenience for callers that do not declare requirements, not a security
/// boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToolClass {
    pub verb: ToolVerb,
    pub resource: ToolResource,
}

impl ToolClass {
    pub fn classify(tool_name: &str) -> Self {
        let lowered = tool_name.to_ascii_lowercase();
        let tokens: Vec<&str> = lowered
            .split(|c: char| c == '_' || c == '-' || c == '.' || c == ':' || c.is_whitespace())
            .filter(|t| !t.is_empty())
            .collect();
        let has = |words: &[&str]| tokens.iter().any(|t| words.contains(t));

        // Most destructive verb wins.
        let verb = if has(DELETE_WORDS) {
            ToolVerb::Delete
        } else if has(MOVE_WORDS) {
            ToolVerb::Move
        } else if has(EXECUTE_WORDS) {
            ToolVerb::Execute
        } else if has(WRITE_WORDS) {
            ToolVerb::Write
        } else if has(FETCH_WORDS) {
            ToolVerb::Fetch
        } else if has(READ_WORDS) {
            ToolVerb::Read
        } else {
            ToolVerb::Unknown
        };

        let resource = if has(MEMORY_WORDS) {
            ToolResource::Memory
        } else if has(STATE_WORDS) {
            ToolResource::State
        } else if verb == ToolVerb::Fetch || has(NETWORK_WORDS) {
            ToolResource::Network
        } else {
            ToolResource::Fs
        };

        Self { verb, resource }
    }

    /// The capability set this class needs.
    pub fn required_capabilities(&self) -> CapabilitySet {
        use Capability::*;
        let caps: &[Capability] = match (self.resource, self.verb) {
            (_, ToolVerb::Unknown) => &[],
            (_, ToolVerb::Execute) => &[ExecCommand],

            (ToolResource::Fs, ToolVerb::Read) => &[FsRead],
            (ToolResource::Fs, ToolVerb::Write) => &[FsWrite],
            (ToolResource::Fs, ToolVerb::Delete) => &[FsDelete],
            (ToolResource::Fs, ToolVerb::Move) => &[FsMove],
            (ToolResource::Fs, ToolVerb::Fetch) => &[NetworkRead],

            (ToolResource::State, ToolVerb::Read | ToolVerb::Fetch) => &[StateRead],
            (ToolResource::State, _) => &[StateWrite],

            (ToolResource::Memory, ToolVerb::Read | ToolVerb::Fetch) => &[MemoryRead],
            (ToolResource::Memory, _) => &[MemoryWrite],

            (ToolResource::Network, ToolVerb::Read | ToolVerb::Fetch) => &[NetworkRead],
            (ToolResource::Network, _) => &[NetworkWrite],
        };
        caps.iter().copied().collect()
    }
}

/// Infer the capabilities a tool needs from its name.
pub fn infer_capabilities(tool_name: &str) -> CapabilitySet {
    ToolClass::classify(tool_name).required_capabilities()
}
