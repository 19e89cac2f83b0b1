//! Package directory layout.
//!
//! Provides the directory structure a host loads packages from, and the
//! helpers that map files and package names onto it.
//!
//! ```text
//! <root>/
//! ├── Packages/             # Unpacked package roots: Packages/<name>/...
//! └── Installed Packages/   # Archived package roots: <name>.<archive ext>
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Prefix of host resource paths (`Packages/<name>/<file>`).
pub const RESOURCE_PREFIX: &str = "Packages";

/// Where a host finds its packages, and how their files are named.
#[derive(Debug, Clone)]
pub struct PackageLayout {
    /// Directory holding unpacked package directories.
    pub packages_dir: PathBuf,
    /// Directory holding archived packages.
    pub installed_dir: PathBuf,
    /// Extension of loadable unit files (without the dot).
    pub unit_extension: String,
    /// Extension of archived packages (without the dot).
    pub archive_extension: String,
}

impl PackageLayout {
    /// Layout rooted at `root`, with the default directory names.
    pub fn new(root: &Path, unit_extension: impl Into<String>) -> Self {
        Self {
            packages_dir: root.join("Packages"),
            installed_dir: root.join("Installed Packages"),
            unit_extension: unit_extension.into(),
            archive_extension: "package".to_string(),
        }
    }

    /// Create the package directories if they don't exist.
    pub fn create_dirs(&self) -> Result<()> {
        fs::create_dir_all(&self.packages_dir)?;
        fs::create_dir_all(&self.installed_dir)?;
        Ok(())
    }

    /// Roots a package may be loaded from: its archive, then its directory.
    pub fn package_roots(&self, name: &str) -> Vec<PathBuf> {
        vec![
            self.installed_dir
                .join(format!("{name}.{}", self.archive_extension)),
            self.packages_dir.join(name),
        ]
    }

    /// Whether `name` is installed (archived or unpacked).
    pub fn has_package(&self, name: &str) -> bool {
        self.package_roots(name).iter().any(|root| root.exists())
    }

    /// Resource path of a top-level file in a package.
    pub fn resource_path(package: &str, file_name: &str) -> String {
        format!("{RESOURCE_PREFIX}/{package}/{file_name}")
    }

    /// Whether `path` names a loadable unit file.
    pub fn is_unit_file(&self, path: &Path) -> bool {
        path.extension()
            .is_some_and(|ext| ext == self.unit_extension.as_str())
    }

    /// Name of the package that contains `path`, if it lies under the
    /// packages directory.
    pub fn package_of(&self, path: &Path) -> Option<String> {
        package_of(path, &self.packages_dir)
    }
}

/// Name of the package under `packages_dir` that contains `path`.
///
/// Both the given and canonical forms of each path are tried. When the file
/// is not located under the packages directory itself, symlinked package
/// directories are followed.
pub fn package_of(path: &Path, packages_dir: &Path) -> Option<String> {
    let candidates = with_canonical(path);
    for dir in with_canonical(packages_dir) {
        for candidate in &candidates {
            if let Some(name) = first_component_under(candidate, &dir) {
                return Some(name);
            }
        }
    }

    let entries = fs::read_dir(packages_dir).ok()?;
    for entry in entries.flatten() {
        let subdir = entry.path();
        let is_link = fs::symlink_metadata(&subdir)
            .map(|meta| meta.file_type().is_symlink())
            .unwrap_or(false);
        if !is_link || !subdir.is_dir() {
            continue;
        }
        for dir in with_canonical(&subdir) {
            if candidates.iter().any(|c| c.starts_with(&dir) && c != &dir) {
                return Some(entry.file_name().to_string_lossy().into_owned());
            }
        }
    }

    None
}

fn with_canonical(path: &Path) -> Vec<PathBuf> {
    let mut paths = vec![path.to_path_buf()];
    if let Ok(real) = path.canonicalize()
        && real != path
    {
        paths.push(real);
    }
    paths
}

fn first_component_under(path: &Path, dir: &Path) -> Option<String> {
    let rest = path.strip_prefix(dir).ok()?;
    let mut components = rest.components();
    let first = components.next()?;
    // A file directly in the packages directory belongs to no package.
    components.next()?;
    Some(first.as_os_str().to_string_lossy().into_owned())
}

/// Directory structure for a hotswap host.
///
/// All files are kept under a `.hotswap` directory next to the host manifest:
///
/// ```text
/// host.json
/// .hotswap/
/// ├── Packages/
/// └── Installed Packages/
/// ```
#[derive(Debug, Clone)]
pub struct HostDirs {
    /// The `.hotswap` directory itself.
    pub hotswap_dir: PathBuf,

    /// Package layout rooted at `hotswap_dir`.
    pub layout: PackageLayout,
}

impl HostDirs {
    /// Create directory structure from a manifest path.
    ///
    /// # Errors
    /// Returns an error if directory creation fails.
    pub fn from_manifest_path(manifest_path: &Path, unit_extension: &str) -> Result<Self> {
        let manifest_dir = manifest_path.parent().unwrap_or(Path::new("."));
        let hotswap_dir = manifest_dir.join(".hotswap");
        let layout = PackageLayout::new(&hotswap_dir, unit_extension);
        layout.create_dirs()?;

        Ok(Self {
            hotswap_dir,
            layout,
        })
    }
}
