//! Build metadata embedded by `build.rs`

use std::fmt;

use serde::Serialize;

/// What was built, from which commit, with which toolchain
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BuildInfo {
    pub name: &'static str,
    pub version: &'static str,
    /// Short commit hash, `unknown` outside a git checkout
    pub commit: &'static str,
    pub branch: &'static str,
    /// `true`, `false` or `unknown`
    #[serde(skip)]
    dirty: &'static str,
    pub built_at: &'static str,
    pub profile: &'static str,
    pub target: &'static str,
    pub host: &'static str,
    pub rustc: &'static str,
}

const BUILD: BuildInfo = BuildInfo {
    name: env!("CARGO_PKG_NAME"),
    version: env!("CARGO_PKG_VERSION"),
    commit: env!("BILI2TEXT_GIT_HASH"),
    branch: env!("BILI2TEXT_GIT_BRANCH"),
    dirty: env!("BILI2TEXT_GIT_DIRTY"),
    built_at: env!("BILI2TEXT_BUILD_TIMESTAMP"),
    profile: env!("BILI2TEXT_PROFILE"),
    target: env!("BILI2TEXT_TARGET"),
    host: env!("BILI2TEXT_HOST"),
    rustc: env!("BILI2TEXT_RUSTC_VERSION"),
};

impl BuildInfo {
    pub fn dirty(&self) -> bool {
        self.dirty == "true"
    }

    /// `0.1.0+abc1234`, with `.dirty` appended for uncommitted builds
    pub fn full_version(&self) -> String {
        let mut full = format!("{}+{}", self.version, self.commit);
        if self.dirty() {
            full.push_str(".dirty");
        }
        full
    }

    /// `User-Agent` of API requests
    pub fn user_agent(&self) -> String {
        format!("{}/{}", self.name, self.version)
    }
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {}", self.name, self.full_version())?;
        writeln!(f)?;
        writeln!(f, "Build Information:")?;
        writeln!(f, "  commit   {} ({})", self.commit, self.branch)?;
        writeln!(f, "  built    {} [{}]", self.built_at, self.profile)?;
        writeln!(f, "  target   {}", self.target)?;
        writeln!(f, "  host     {}", self.host)?;
        writeln!(f, "  rustc    {}", self.rustc)
    }
}

pub fn build_info() -> BuildInfo {
    BUILD
}

/// `version` command output, human-readable or JSON
pub fn print_version(json: bool) {
    let info = build_info();
    if json {
        match serde_json::to_string_pretty(&info) {
            Ok(text) => println!("{}", text),
            Err(_) => print!("{}", info),
        }
    } else {
        print!("{}", info);
    }
}
