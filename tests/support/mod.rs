use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};

use grootfs::config::EngineConfig;
use grootfs::ops::{Engine, RequestContext};

pub struct Fixture {
    pub tempdir: tempfile::TempDir,
    pub engine: Engine,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let tempdir = tempfile::tempdir().expect("create temp dir");
        let root = std::fs::File::open(tempdir.path()).expect("open backing root");
        let engine = Engine::new(OwnedFd::from(root), config);
        Self { tempdir, engine }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.tempdir.path().join(name)
    }
}

pub fn ctx(uid: u32, gid: u32) -> RequestContext {
    RequestContext { uid, gid }
}

pub fn placeholder_names(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| {
            let name = e.unwrap().file_name().to_string_lossy().into_owned();
            name.starts_with(".groot.symlink.").then_some(name)
        })
        .collect()
}
