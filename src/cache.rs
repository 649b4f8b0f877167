//! Build manifest kept between runs of the same task.
//!
//! After a successful build the manifest records every module that went into
//! the bundle together with its content hash. The next run compares the
//! hashes and skips the bundler when nothing changed. The same file doubles
//! as the source of the dependency listing.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use serde::{Deserialize, Serialize};

use crate::bundler::BuildStatus;
use crate::config::CompilerConfig;
use crate::error::ManifestError;
use crate::hash::Hash32;
use crate::path::{relative_to, resolve};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestInput {
    pub path: Utf8PathBuf,
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    /// Digest of the configuration the build ran with.
    pub fingerprint: String,
    /// Output path, a `[name]` template for named entries.
    pub destination: Utf8PathBuf,
    pub inputs: Vec<ManifestInput>,
    pub outputs: Vec<Utf8PathBuf>,
}

impl Manifest {
    /// Records a finished build. Input paths are stored relative to the
    /// build context unless `full_paths` is set.
    pub fn from_status(config: &CompilerConfig, status: &BuildStatus) -> std::io::Result<Self> {
        let inputs = status
            .inputs
            .par_iter()
            .map(|input| {
                let hash = Hash32::hash_file(&input.path)?.to_hex();
                let path = if config.full_paths {
                    input.path.clone()
                } else {
                    relative_to(&input.path, &config.context)
                };
                Ok(ManifestInput { path, hash })
            })
            .collect::<std::io::Result<Vec<_>>>()?;

        Ok(Self {
            name: config.name.clone(),
            fingerprint: config.fingerprint(),
            destination: config.output.dir.join(&config.output.filename),
            inputs,
            outputs: status.outputs.iter().map(|o| o.path.clone()).collect(),
        })
    }

    pub fn read(path: &Utf8Path) -> Result<Self, ManifestError> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ManifestError::Missing(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };

        Ok(serde_json::from_slice(&data)?)
    }

    pub fn write(&self, path: &Utf8Path) -> Result<(), ManifestError> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    /// True when `config` is the one this manifest was written for, every
    /// output is still in place and no input changed.
    pub fn is_fresh(&self, config: &CompilerConfig) -> bool {
        if self.fingerprint != config.fingerprint() || self.inputs.is_empty() {
            return false;
        }

        if !self.outputs.iter().all(|output| output.exists()) {
            return false;
        }

        self.inputs.par_iter().all(|input| {
            let path = resolve(&config.context, &input.path);
            match Hash32::hash_file(&path) {
                Ok(hash) => hash.to_hex() == input.hash,
                Err(_) => false,
            }
        })
    }

    /// Paths of the modules that went into the last build.
    pub fn dependencies(&self) -> Vec<Utf8PathBuf> {
        self.inputs.iter().map(|input| input.path.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Context;
    use crate::bundler::Artifact;
    use crate::config::build_config;
    use crate::entry::Entry;
    use crate::options::TaskOptions;

    fn setup(root: &Utf8Path, options: TaskOptions) -> (CompilerConfig, BuildStatus) {
        fs::write(root.join("a.js"), "export default 1").unwrap();
        fs::write(root.join("out.js"), "bundle").unwrap();

        let config = build_config(
            &Entry::from("a.js"),
            Utf8Path::new("out.js"),
            &options.cache_path("cache/{env}.json").resolve(None),
            &Context::with_cwd(root),
        );

        let status = BuildStatus {
            inputs: vec![Artifact {
                path: root.join("a.js"),
                bytes: 16,
            }],
            outputs: vec![Artifact {
                path: root.join("out.js"),
                bytes: 6,
            }],
            ..BuildStatus::default()
        };

        (config, status)
    }

    #[test]
    fn fresh_until_input_changes() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let (config, status) = setup(root, TaskOptions::new());

        let manifest = Manifest::from_status(&config, &status).unwrap();
        let path = config.cache.clone().unwrap();
        manifest.write(&path).unwrap();

        let manifest = Manifest::read(&path).unwrap();
        assert_eq!(manifest.destination, root.join("out.js"));
        assert_eq!(manifest.dependencies(), vec![Utf8PathBuf::from("a.js")]);
        assert!(manifest.is_fresh(&config));

        fs::write(root.join("a.js"), "export default 2").unwrap();
        assert!(!manifest.is_fresh(&config));
    }

    #[test]
    fn stale_when_output_missing_or_config_changed() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let (config, status) = setup(root, TaskOptions::new());
        let manifest = Manifest::from_status(&config, &status).unwrap();

        let (other, _) = setup(root, TaskOptions::new().minimize(true));
        assert!(!manifest.is_fresh(&other));

        fs::remove_file(root.join("out.js")).unwrap();
        assert!(!manifest.is_fresh(&config));
    }

    #[test]
    fn full_paths_keep_absolute_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let (config, status) = setup(root, TaskOptions::new().full_paths(true));

        let manifest = Manifest::from_status(&config, &status).unwrap();
        assert_eq!(manifest.dependencies(), vec![root.join("a.js")]);
        assert!(manifest.is_fresh(&config));
    }

    #[test]
    fn read_missing_and_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();

        assert!(matches!(
            Manifest::read(&root.join("nope.json")),
            Err(ManifestError::Missing(_))
        ));

        fs::write(root.join("bad.json"), "{ not json").unwrap();
        assert!(matches!(
            Manifest::read(&root.join("bad.json")),
            Err(ManifestError::Malformed(_))
        ));
    }
}
