//! In-container mount path resolution
//!
//! Maps the logical locations every phase needs (app dir, layers dir, build
//! cache dir, launch cache, kaniko cache, cnb dir, and the well-known TOML
//! files under the layers dir) to container-OS-specific absolute paths. The
//! result is identical across every phase in a single run — `MountPaths` is
//! computed once by the scheduler and shared.

use std::fmt;

/// The builder/lifecycle container's operating system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerOs {
    Linux,
    Windows,
}

impl fmt::Display for ContainerOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerOs::Linux => write!(f, "linux"),
            ContainerOs::Windows => write!(f, "windows"),
        }
    }
}

/// Every in-container path a phase might need, resolved for a single run.
///
/// A pure function of `(os, workspace)` (R2): no field depends on anything
/// other than these two inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPaths {
    os: ContainerOs,
    app_dir: String,
    layers_dir: String,
    cache_dir: String,
    launch_cache_dir: String,
    kaniko_cache_dir: String,
    cnb_dir: String,
    extended_new_dir: String,
}

impl MountPaths {
    /// `workspace` overrides the default app-directory name (e.g. a
    /// user-chosen working directory); `None` uses the conventional name.
    pub fn new(os: ContainerOs, workspace: Option<&str>) -> Self {
        let app_name = workspace.unwrap_or("workspace");
        let join = |parts: &[&str]| -> String { Self::join(os, parts) };

        Self {
            os,
            app_dir: join(&[app_name]),
            layers_dir: join(&["layers"]),
            cache_dir: join(&["cache"]),
            launch_cache_dir: join(&["launch-cache"]),
            kaniko_cache_dir: join(&["kaniko", "cache"]),
            cnb_dir: join(&["cnb"]),
            extended_new_dir: join(&["extended-new"]),
        }
    }

    fn join(os: ContainerOs, parts: &[&str]) -> String {
        match os {
            ContainerOs::Linux => format!("/{}", parts.join("/")),
            ContainerOs::Windows => format!("c:\\{}", parts.join("\\")),
        }
    }

    fn sep(&self) -> char {
        match self.os {
            ContainerOs::Linux => '/',
            ContainerOs::Windows => '\\',
        }
    }

    fn child(&self, dir: &str, name: &str) -> String {
        format!("{dir}{}{name}", self.sep())
    }

    pub fn os(&self) -> ContainerOs {
        self.os
    }

    pub fn app_dir(&self) -> &str {
        &self.app_dir
    }

    pub fn layers_dir(&self) -> &str {
        &self.layers_dir
    }

    /// Build-cache mount point (used when the build cache is a bind mount,
    /// or as the `-cache-dir` argument otherwise).
    pub fn cache_dir(&self) -> &str {
        &self.cache_dir
    }

    pub fn launch_cache_dir(&self) -> &str {
        &self.launch_cache_dir
    }

    pub fn kaniko_cache_dir(&self) -> &str {
        &self.kaniko_cache_dir
    }

    pub fn cnb_dir(&self) -> &str {
        &self.cnb_dir
    }

    pub fn extended_new_dir(&self) -> &str {
        &self.extended_new_dir
    }

    pub fn analyzed_toml(&self) -> String {
        self.child(&self.layers_dir, "analyzed.toml")
    }

    pub fn group_toml(&self) -> String {
        self.child(&self.layers_dir, "group.toml")
    }

    pub fn stack_toml(&self) -> String {
        self.child(&self.layers_dir, "stack.toml")
    }

    pub fn run_toml(&self) -> String {
        self.child(&self.layers_dir, "run.toml")
    }

    pub fn project_metadata_toml(&self) -> String {
        self.child(&self.layers_dir, "project-metadata.toml")
    }

    pub fn sbom_dir(&self) -> String {
        self.child(&self.layers_dir, "sbom")
    }

    pub fn report_toml(&self) -> String {
        self.child(&self.layers_dir, "report.toml")
    }
}
