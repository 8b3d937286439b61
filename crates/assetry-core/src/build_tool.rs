//! The external bundler: locating its binary and invoking it.
//!
//! Invocation contract: `<tool> build <entrypoint> --outdir <dir> [--watch]`.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{AssetError, Result};

#[derive(Clone, Debug)]
pub struct BuildTool {
    program: PathBuf,
    /// Arguments placed before `build ...`, e.g. a script path when `program` is a shell.
    leading_args: Vec<OsString>,
}

impl BuildTool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    pub fn with_leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Resolve a tool name the way npm resolves bins: explicit paths are used as-is,
    /// then the nearest `node_modules/.bin` walking up from `from_dir`, then `PATH`.
    pub fn resolve(name: &str, from_dir: &Path) -> Self {
        let as_path = Path::new(name);
        if as_path.components().count() > 1 || as_path.is_absolute() {
            return Self::new(as_path);
        }
        match find_binary_in_node_modules(name, from_dir) {
            Some(found) => Self::new(found),
            None => Self::new(name),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Display form used in errors and logs.
    pub fn display_name(&self) -> String {
        self.program.display().to_string()
    }

    /// Command for one invocation, with `cwd` set to `root`.
    pub fn command(&self, root: &Path, entrypoint: &Path, outdir: &Path, watch: bool) -> Command {
        let mut cmd = self.base_command();
        cmd.args(&self.leading_args)
            .arg("build")
            .arg(entrypoint)
            .arg("--outdir")
            .arg(outdir)
            .current_dir(root);
        if watch {
            cmd.arg("--watch");
        }
        cmd
    }

    #[cfg(unix)]
    fn base_command(&self) -> Command {
        Command::new(&self.program)
    }

    #[cfg(windows)]
    fn base_command(&self) -> Command {
        let ext = self.program.extension().and_then(|e| e.to_str());
        if ext == Some("cmd") || ext == Some("bat") {
            let mut cmd = Command::new("cmd");
            cmd.arg("/c").arg(&self.program);
            cmd
        } else {
            Command::new(&self.program)
        }
    }

    /// Run a single non-watch build and wait for it.
    pub fn build_once(&self, root: &Path, entrypoint: &Path, outdir: &Path) -> Result<()> {
        check_inputs(root, entrypoint)?;
        let outdir = absolute_outdir(root, outdir);
        std::fs::create_dir_all(&outdir)?;
        let out = self
            .command(root, entrypoint, &outdir, false)
            .output()
            .map_err(|source| AssetError::ProcessSpawn {
                program: self.display_name(),
                source,
            })?;
        if !out.status.success() {
            return Err(AssetError::BuildFailed {
                status: out.status.to_string(),
                stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            });
        }
        tracing::info!(tool = %self.display_name(), entrypoint = %entrypoint.display(), "build finished");
        Ok(())
    }
}

/// `root` must be a directory and `root/entrypoint` must exist.
pub(crate) fn check_inputs(root: &Path, entrypoint: &Path) -> Result<()> {
    if !root.is_dir() {
        return Err(AssetError::NotADirectory(root.to_path_buf()));
    }
    let entry = root.join(entrypoint);
    if !entry.exists() {
        return Err(AssetError::not_found_path(&entry));
    }
    Ok(())
}

/// Relative output directories are relative to the build root, as the tool sees them.
pub(crate) fn absolute_outdir(root: &Path, outdir: &Path) -> PathBuf {
    if outdir.is_absolute() {
        outdir.to_path_buf()
    } else {
        root.join(outdir)
    }
}

/// Find binary in node_modules/.bin, nearest directory first.
pub fn find_binary_in_node_modules(binary: &str, from_dir: &Path) -> Option<PathBuf> {
    let mut dir = Some(from_dir);
    while let Some(current) = dir {
        let bin_dir = current.join("node_modules").join(".bin");
        if bin_dir.is_dir() {
            let exact = bin_dir.join(binary);
            if exact.exists() {
                return Some(exact);
            }
            #[cfg(windows)]
            {
                let cmd = bin_dir.join(format!("{}.cmd", binary));
                if cmd.exists() {
                    return Some(cmd);
                }
            }
        }
        dir = current.parent();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_prefers_nearest_node_modules_bin() {
        let td = tempfile::tempdir().expect("tmp");
        let root = td.path();
        let app = root.join("packages").join("app");
        std::fs::create_dir_all(&app).expect("app dir");
        let root_bin = root.join("node_modules").join(".bin");
        let local_bin = app.join("node_modules").join(".bin");
        std::fs::create_dir_all(&root_bin).expect("root bin");
        std::fs::create_dir_all(&local_bin).expect("local bin");
        let name = if cfg!(windows) { "bun.cmd" } else { "bun" };
        std::fs::write(root_bin.join(name), "root").expect("write root");
        std::fs::write(local_bin.join(name), "local").expect("write local");

        let tool = BuildTool::resolve("bun", &app);
        assert!(tool.program().starts_with(&local_bin));
    }

    #[test]
    fn test_resolve_falls_back_to_path_lookup() {
        let td = tempfile::tempdir().expect("tmp");
        let tool = BuildTool::resolve("esbuild", td.path());
        assert_eq!(tool.program(), Path::new("esbuild"));
        let explicit = BuildTool::resolve("./tools/bun", td.path());
        assert_eq!(explicit.program(), Path::new("./tools/bun"));
    }

    #[test]
    fn test_command_follows_invocation_contract() {
        let tool = BuildTool::new("bun");
        let cmd = tool.command(
            Path::new("/proj"),
            Path::new("src/index.ts"),
            Path::new("/proj/dist"),
            true,
        );
        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            ["build", "src/index.ts", "--outdir", "/proj/dist", "--watch"]
        );
        assert_eq!(cmd.get_current_dir(), Some(Path::new("/proj")));
    }

    #[test]
    fn test_check_inputs() {
        let td = tempfile::tempdir().expect("tmp");
        assert!(matches!(
            check_inputs(&td.path().join("missing"), Path::new("a.ts")),
            Err(AssetError::NotADirectory(_))
        ));
        assert!(matches!(
            check_inputs(td.path(), Path::new("a.ts")),
            Err(AssetError::NotFound(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_build_once_reports_failure() {
        let td = tempfile::tempdir().expect("tmp");
        std::fs::write(td.path().join("index.ts"), "x").unwrap();
        std::fs::write(
            td.path().join("tool.sh"),
            "echo 'error: could not resolve ./missing' >&2\nexit 1\n",
        )
        .unwrap();
        let tool = BuildTool::new("sh").with_leading_args([td.path().join("tool.sh")]);
        let err = tool
            .build_once(td.path(), Path::new("index.ts"), Path::new("dist"))
            .unwrap_err();
        match err {
            AssetError::BuildFailed { stderr, .. } => assert!(stderr.contains("could not resolve")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(td.path().join("dist").is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn test_build_once_success() {
        let td = tempfile::tempdir().expect("tmp");
        std::fs::write(td.path().join("index.ts"), "x").unwrap();
        std::fs::write(td.path().join("tool.sh"), "cp \"$2\" \"$4/index.js\"\n").unwrap();
        let tool = BuildTool::new("sh").with_leading_args([td.path().join("tool.sh")]);
        tool.build_once(td.path(), Path::new("index.ts"), Path::new("dist"))
            .unwrap();
        assert!(td.path().join("dist/index.js").is_file());
    }
}
