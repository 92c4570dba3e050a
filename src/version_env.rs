//! Version Environment Manager (C7): the dual-supervisor protocol that
//! stages a new version alongside the running one and promotes it via an
//! atomic symlink swap.
//!
//! Directory layout and the six-step protocol are described in full in the
//! accompanying design notes; this module implements the cluster-scoped
//! steps (Stage, Expose, Launch, Promote, Abort). The per-node Migrate step
//! lives in `crate::node_ops`/`crate::supervisor`, which call `stop`/`start`
//! on the two supervisor handles this module stages.

use crate::errors::RuntimeError;
use crate::supervisor::config_gen::{self, ProgramSpec};
use crate::topology::{NodeRef, Topology};
use crate::util::supervisor_port;
use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

pub struct VersionEnv {
    cluster_root: PathBuf,
    port_base: u16,
}

impl VersionEnv {
    pub fn new(cluster_root: impl Into<PathBuf>, port_base: u16) -> Self {
        Self {
            cluster_root: cluster_root.into(),
            port_base,
        }
    }

    fn version_dir(&self, version_mm: &str) -> PathBuf {
        self.cluster_root.join(format!("v{version_mm}"))
    }

    pub fn current_link(&self) -> PathBuf {
        self.cluster_root.join("current")
    }

    pub fn previous_link(&self) -> PathBuf {
        self.cluster_root.join("previous")
    }

    pub fn next_link(&self) -> PathBuf {
        self.cluster_root.join("next")
    }

    pub fn control_port(&self, version_mm: &str) -> u16 {
        supervisor_port(&self.version_dir(version_mm).to_string_lossy(), self.port_base)
    }

    pub fn current_target(&self) -> Result<PathBuf, RuntimeError> {
        fs::read_link(self.current_link()).map_err(RuntimeError::StateIOError)
    }

    /// Step 1: create the version directory tree, copy binaries from the
    /// binary cache, and write a `supervisor.ini` with every program
    /// `autostart=false`.
    pub fn stage(
        &self,
        version_mm: &str,
        binary_cache_dir: &Path,
        topology: &Topology,
    ) -> Result<(), RuntimeError> {
        let dir = self.version_dir(version_mm);
        fs::create_dir_all(dir.join("bin")).map_err(RuntimeError::StateIOError)?;

        for binary in ["mongod", "mongos", "mongosh"] {
            let src = binary_cache_dir.join(version_mm).join(binary);
            if src.exists() {
                fs::copy(&src, dir.join("bin").join(binary)).map_err(RuntimeError::StateIOError)?;
            }
        }

        let mut programs = Vec::new();
        for node in &topology.mongod {
            let proc_dir = dir.join(config_gen::program_name_for(node, false));
            fs::create_dir_all(proc_dir.join("config")).map_err(RuntimeError::StateIOError)?;
            fs::create_dir_all(proc_dir.join("log")).map_err(RuntimeError::StateIOError)?;
            write_mongod_config(&proc_dir.join("config").join("mongod.conf"), node, &dir)?;
            programs.push(ProgramSpec {
                name: config_gen::program_name_for(node, false),
                command: format!(
                    "{}/bin/mongod --config {}/config/mongod.conf",
                    dir.display(),
                    proc_dir.display()
                ),
                directory: dir.to_string_lossy().into_owned(),
                stdout_logfile: proc_dir.join("log").join("stdout.log").to_string_lossy().into_owned(),
                stderr_logfile: proc_dir.join("log").join("stderr.log").to_string_lossy().into_owned(),
                replica_set: (!node.replica_set.is_empty()).then(|| node.replica_set.clone()),
            });
        }
        for node in &topology.mongos {
            let proc_dir = dir.join(config_gen::program_name_for(node, true));
            fs::create_dir_all(proc_dir.join("config")).map_err(RuntimeError::StateIOError)?;
            fs::create_dir_all(proc_dir.join("log")).map_err(RuntimeError::StateIOError)?;
            programs.push(ProgramSpec {
                name: config_gen::program_name_for(node, true),
                command: format!("{}/bin/mongos --config {}/config/mongos.conf", dir.display(), proc_dir.display()),
                directory: dir.to_string_lossy().into_owned(),
                stdout_logfile: proc_dir.join("log").join("stdout.log").to_string_lossy().into_owned(),
                stderr_logfile: proc_dir.join("log").join("stderr.log").to_string_lossy().into_owned(),
                replica_set: None,
            });
        }

        let ini = config_gen::render(self.control_port(version_mm), &programs);
        fs::write(dir.join("supervisor.ini"), ini).map_err(RuntimeError::StateIOError)?;
        Ok(())
    }

    /// Step 2: point `next` at the staged directory.
    pub fn expose(&self, version_mm: &str) -> Result<(), RuntimeError> {
        atomic_symlink(&self.version_dir(version_mm), &self.next_link())
    }

    /// Step 3 is external: starting the supervisor daemon against the
    /// staged `supervisor.ini` is the caller's responsibility (it spawns a
    /// long-lived process this module has no business owning). This returns
    /// the path the caller hands to `supervisor::local::launch_supervisor`.
    pub fn ini_path(&self, version_mm: &str) -> PathBuf {
        self.version_dir(version_mm).join("supervisor.ini")
    }

    /// Step 5: promote `next` to `current`, demoting the prior `current` to
    /// `previous`. Must be called only after every node has migrated.
    pub fn promote(&self) -> Result<(), RuntimeError> {
        let next_target = fs::read_link(self.next_link()).map_err(RuntimeError::StateIOError)?;
        let old_current = self.current_target().ok();

        if self.previous_link().exists() {
            fs::remove_file(self.previous_link()).map_err(RuntimeError::StateIOError)?;
        }
        if let Some(old) = old_current {
            // Advisory: failure to record `previous` does not fail promotion.
            let _ = atomic_symlink(&old, &self.previous_link());
        }

        atomic_symlink(&next_target, &self.current_link())?;
        fs::remove_file(self.next_link()).map_err(RuntimeError::StateIOError)?;
        Ok(())
    }

    /// Step 6: on any failure before promotion, remove `next` and leave
    /// `current` untouched.
    pub fn abort(&self) -> Result<(), RuntimeError> {
        if self.next_link().exists() {
            fs::remove_file(self.next_link()).map_err(RuntimeError::StateIOError)?;
        }
        Ok(())
    }
}

fn write_mongod_config(path: &Path, node: &NodeRef, version_dir: &Path) -> Result<(), RuntimeError> {
    let data_dir = version_dir
        .parent()
        .unwrap_or(version_dir)
        .join("data")
        .join(node.id().replace(':', "-"));
    let mut contents = format!(
        "net:\n  port: {}\n  bindIp: 127.0.0.1\nstorage:\n  dbPath: {}\n",
        node.port,
        data_dir.display()
    );
    if !node.replica_set.is_empty() {
        contents.push_str(&format!("replication:\n  replSetName: {}\n", node.replica_set));
    }
    fs::write(path, contents).map_err(RuntimeError::StateIOError)
}

/// Atomically point `link` at `target`, overwriting any existing link, by
/// creating the new link at a sibling temporary name and renaming over it.
pub fn atomic_symlink(target: &Path, link: &Path) -> Result<(), RuntimeError> {
    let tmp = link.with_extension(format!("tmp-{}", std::process::id()));
    if tmp.exists() {
        fs::remove_file(&tmp).map_err(RuntimeError::StateIOError)?;
    }
    symlink(target, &tmp).map_err(|e| RuntimeError::SymlinkError {
        path: link.to_string_lossy().into_owned(),
        message: e.to_string(),
    })?;
    fs::rename(&tmp, link).map_err(|e| RuntimeError::SymlinkError {
        path: link.to_string_lossy().into_owned(),
        message: e.to_string(),
    })
}
