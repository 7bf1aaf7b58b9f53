// file: src/storage/paths.rs
// description: maps absolute asset paths onto named public mount roots and back
// reference: static file mounts for generated outputs

use crate::config::Config;
use crate::error::{PipelineError, Result};
use std::path::{Component, Path, PathBuf};

pub const OUTPUTS_MOUNT: &str = "outputs";
pub const DATA_MOUNT: &str = "data";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetLocation {
    Mounted { mount: String, relative: PathBuf },
    Unmounted(PathBuf),
}

#[derive(Debug, Clone)]
struct MountRoot {
    name: String,
    root: PathBuf,
}

/// Stateless resolver over a fixed set of mount roots. Mounts may nest; the
/// deepest root containing a path wins.
#[derive(Debug, Clone)]
pub struct AssetPathResolver {
    mounts: Vec<MountRoot>,
}

impl AssetPathResolver {
    pub fn new<N, P>(mounts: impl IntoIterator<Item = (N, P)>) -> Self
    where
        N: Into<String>,
        P: AsRef<Path>,
    {
        let mut mounts: Vec<MountRoot> = mounts
            .into_iter()
            .map(|(name, root)| MountRoot {
                name: name.into(),
                root: absolutize(root.as_ref()),
            })
            .collect();
        mounts.sort_by_key(|m| std::cmp::Reverse(m.root.components().count()));
        Self { mounts }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new([
            (OUTPUTS_MOUNT, config.outputs_root()),
            (DATA_MOUNT, config.paths.data_root.clone()),
        ])
    }

    pub fn root(&self, mount: &str) -> Option<&Path> {
        self.mounts
            .iter()
            .find(|m| m.name == mount)
            .map(|m| m.root.as_path())
    }

    pub fn relativize(&self, path: &Path) -> AssetLocation {
        let absolute = absolutize(path);
        for mount in &self.mounts {
            if let Ok(relative) = absolute.strip_prefix(&mount.root) {
                return AssetLocation::Mounted {
                    mount: mount.name.clone(),
                    relative: relative.to_path_buf(),
                };
            }
        }
        AssetLocation::Unmounted(path.to_path_buf())
    }

    /// Path of `path` relative to one specific mount, ignoring more specific mounts.
    pub fn relative_to(&self, mount: &str, path: &Path) -> Option<PathBuf> {
        let root = self.root(mount)?;
        absolutize(path)
            .strip_prefix(root)
            .ok()
            .map(Path::to_path_buf)
    }

    /// Joins `relative` onto the mount root. A relative path that repeats the
    /// root's own last segment (`outputs/run/a.png` under `.../outputs`) is
    /// collapsed to a single occurrence, unless the doubled path exists.
    pub fn resolve(&self, mount: &str, relative: &Path) -> Result<PathBuf> {
        let root = self
            .root(mount)
            .ok_or_else(|| PipelineError::Config(format!("Unknown asset mount: {}", mount)))?;

        let mut cleaned = PathBuf::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => cleaned.push(part),
                Component::ParentDir => cleaned.push(".."),
                _ => {}
            }
        }

        let joined = root.join(&cleaned);
        let joined = match root.file_name().and_then(|name| cleaned.strip_prefix(name).ok()) {
            Some(rest) if !joined.exists() => root.join(rest),
            _ => joined,
        };
        Ok(normalize_lexically(&joined))
    }

    /// Externally addressable reference: `/{mount}/{relative}` with forward
    /// slashes, or the path unchanged when no mount contains it.
    pub fn public_url(&self, path: &Path) -> String {
        match self.relativize(path) {
            AssetLocation::Mounted { mount, relative } => {
                let parts: Vec<String> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                format!("/{}/{}", mount, parts.join("/"))
            }
            AssetLocation::Unmounted(path) => path.display().to_string(),
        }
    }
}

fn absolutize(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    normalize_lexically(&absolute)
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                result.pop();
            }
            other => result.push(other.as_os_str()),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn resolver(base: &Path) -> AssetPathResolver {
        AssetPathResolver::new([
            (DATA_MOUNT, base.join("data")),
            (OUTPUTS_MOUNT, base.join("data/outputs")),
        ])
    }

    #[test]
    fn test_relativize_prefers_most_specific_mount() {
        let temp = TempDir::new().unwrap();
        let resolver = resolver(temp.path());

        let generated = temp.path().join("data/outputs/run_1/scene1.png");
        assert_eq!(
            resolver.relativize(&generated),
            AssetLocation::Mounted {
                mount: OUTPUTS_MOUNT.to_string(),
                relative: PathBuf::from("run_1/scene1.png"),
            }
        );

        let catalog_image = temp.path().join("data/7/main.jpg");
        assert_eq!(
            resolver.relativize(&catalog_image),
            AssetLocation::Mounted {
                mount: DATA_MOUNT.to_string(),
                relative: PathBuf::from("7/main.jpg"),
            }
        );
    }

    #[test]
    fn test_round_trip() {
        let temp = TempDir::new().unwrap();
        let resolver = resolver(temp.path());

        for relative in ["data/outputs/a/b.png", "data/3/detail/detail_0.jpg", "data/x.png"] {
            let path = temp.path().join(relative);
            let AssetLocation::Mounted { mount, relative } = resolver.relativize(&path) else {
                panic!("expected {} to be mounted", path.display());
            };
            assert_eq!(resolver.resolve(&mount, &relative).unwrap(), path);
        }
    }

    #[test]
    fn test_unmounted_path_returned_unchanged() {
        let temp = TempDir::new().unwrap();
        let resolver = resolver(temp.path());
        let outside = PathBuf::from("/elsewhere/file.png");

        assert_eq!(
            resolver.relativize(&outside),
            AssetLocation::Unmounted(outside.clone())
        );
        assert_eq!(resolver.public_url(&outside), "/elsewhere/file.png");
    }

    #[test]
    fn test_resolve_collapses_duplicated_root_segment() {
        let temp = TempDir::new().unwrap();
        let resolver = resolver(temp.path());

        let resolved = resolver
            .resolve(DATA_MOUNT, Path::new("data/5/main.jpg"))
            .unwrap();
        assert_eq!(resolved, temp.path().join("data/5/main.jpg"));

        let resolved = resolver
            .resolve(OUTPUTS_MOUNT, Path::new("outputs/run/a.png"))
            .unwrap();
        assert_eq!(resolved, temp.path().join("data/outputs/run/a.png"));
    }

    #[test]
    fn test_resolve_unknown_mount() {
        let temp = TempDir::new().unwrap();
        let resolver = resolver(temp.path());
        assert!(matches!(
            resolver.resolve("static", Path::new("a.png")),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn test_public_url() {
        let temp = TempDir::new().unwrap();
        let resolver = resolver(temp.path());
        let path = temp.path().join("data/outputs/run_1/scene1.png");
        assert_eq!(resolver.public_url(&path), "/outputs/run_1/scene1.png");
    }

    #[test]
    fn test_collapse_only_at_mount_boundary() {
        let temp = TempDir::new().unwrap();
        let resolver = resolver(temp.path());

        let resolved = resolver
            .resolve(DATA_MOUNT, Path::new("5/data/data/a.png"))
            .unwrap();
        assert_eq!(resolved, temp.path().join("data/5/data/data/a.png"));
    }

    #[test]
    fn test_round_trip_through_directory_named_like_mount() {
        let temp = TempDir::new().unwrap();
        let resolver = resolver(temp.path());

        let nested = temp.path().join("data/outputs/outputs");
        std::fs::create_dir_all(&nested).unwrap();
        let path = nested.join("a.png");
        std::fs::write(&path, b"png").unwrap();

        let AssetLocation::Mounted { mount, relative } = resolver.relativize(&path) else {
            panic!("expected {} to be mounted", path.display());
        };
        assert_eq!(relative, PathBuf::from("outputs/a.png"));
        assert_eq!(resolver.resolve(&mount, &relative).unwrap(), path);
    }

    #[test]
    fn test_relative_to_specific_mount() {
        let temp = TempDir::new().unwrap();
        let resolver = resolver(temp.path());
        let path = temp.path().join("data/outputs/white_bg_1.png");
        assert_eq!(
            resolver.relative_to(DATA_MOUNT, &path),
            Some(PathBuf::from("outputs/white_bg_1.png"))
        );
    }
}
