//! Maestro Detection
//!
//! Finds the installed Maestro CLI, reads its version and locates the `lib`
//! directory holding the JARs that setup replaces.

use std::path::{Path, PathBuf};
use regex::Regex;
use tokio::process::Command;
use tracing::{info, debug};

use crate::{SetupError, PATCHED_FLAG};

const VERSION_PREFIXES: &[&str] = &["cli version: ", "version: ", "CLI "];

/// The `maestro` launcher on PATH
pub struct MaestroCli {
    program: PathBuf,
}

impl MaestroCli {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into() }
    }

    /// Run the launcher; `Ok(None)` when it is not installed
    async fn output(&self, arg: &str) -> Result<Option<String>, SetupError> {
        debug!("{:?} {}", self.program, arg);

        match Command::new(&self.program).arg(arg).output().await {
            Ok(output) => Ok(Some(String::from_utf8_lossy(&output.stdout).to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SetupError::Io(e)),
        }
    }

    /// Installed version, or `None` when Maestro is missing
    pub async fn check_installed(&self) -> Result<Option<String>, SetupError> {
        Ok(self.output("--version").await?.map(|out| parse_version(&out)))
    }

    /// Whether the installed Maestro has the device-host patches
    pub async fn is_patched(&self) -> Result<bool, SetupError> {
        match self.output("--help").await? {
            Some(help) => Ok(help.contains(PATCHED_FLAG)),
            None => Err(SetupError::MaestroNotInstalled),
        }
    }

    /// Locate Maestro's `lib` directory
    pub fn find_lib_dir(&self) -> Result<PathBuf, SetupError> {
        let launcher = which::which(&self.program).map_err(|_| SetupError::MaestroNotInPath)?;
        let script = std::fs::canonicalize(&launcher).unwrap_or(launcher);
        debug!("Maestro launcher resolved to {:?}", script);

        let lib = locate_lib_dir(&script, dirs::home_dir().as_deref())?;
        info!("Found Maestro lib at {:?}", lib);
        Ok(lib)
    }
}

impl Default for MaestroCli {
    fn default() -> Self {
        Self::new("maestro")
    }
}

/// Extract the version from `maestro --version` output
pub fn parse_version(output: &str) -> String {
    let output = output.trim();
    let lowered = output.to_ascii_lowercase();

    for prefix in VERSION_PREFIXES {
        if let Some(idx) = lowered.find(&prefix.to_ascii_lowercase()) {
            let rest = &output[idx + prefix.len()..];
            if let Some(word) = rest.split_whitespace().next() {
                return word.to_string();
            }
        }
    }

    Regex::new(r"\d+\.\d+\.\d+")
        .ok()
        .and_then(|re| re.find(output).map(|m| m.as_str().to_string()))
        .unwrap_or_else(|| output.to_string())
}

/// Lib directory for a resolved launcher script: the script's CLASSPATH,
/// then `../lib` next to its bin dir, then `~/.maestro/lib`.
pub fn locate_lib_dir(script: &Path, home: Option<&Path>) -> Result<PathBuf, SetupError> {
    let script_dir = script.parent().unwrap_or(Path::new("/"));

    if let Ok(content) = std::fs::read(script) {
        let content = String::from_utf8_lossy(&content);
        if let Some(lib) = find_lib_in_script(&content, script_dir) {
            return Ok(lib);
        }
    }

    let sibling = script_dir.parent().unwrap_or(script_dir).join("lib");
    if sibling.is_dir() {
        return Ok(sibling);
    }

    if let Some(home) = home {
        let fallback = home.join(".maestro").join("lib");
        if fallback.is_dir() {
            return Ok(fallback);
        }
    }

    Err(SetupError::LibNotFound)
}

/// Find the lib directory named by a launcher script's CLASSPATH line
pub fn find_lib_in_script(content: &str, script_dir: &Path) -> Option<PathBuf> {
    for line in content.lines() {
        if !line.contains("CLASSPATH") {
            continue;
        }
        let Some(idx) = line.find("/lib/").filter(|&idx| idx > 0) else {
            continue;
        };

        let start = line[..idx]
            .rfind(|c: char| c == '=' || c == '"' || c == '\'')
            .map_or(0, |i| i + 1);
        let path_part = &line[start..idx + "/lib".len()];

        // $APP_HOME style launchers are relative to the script
        if path_part.starts_with('$') {
            return Some(script_dir.parent().unwrap_or(script_dir).join("lib"));
        }
        if Path::new(path_part).is_absolute() {
            return Some(PathBuf::from(path_part));
        }
    }
    None
}

/// Copy `maestro*.jar` from `lib_dir` into `backup_dir`
pub async fn backup_jars(lib_dir: &Path, backup_dir: &Path) -> Result<usize, SetupError> {
    tokio::fs::create_dir_all(backup_dir).await?;

    let mut entries = tokio::fs::read_dir(lib_dir).await?;
    let mut copied = 0;

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.starts_with("maestro") || !name.ends_with(".jar") {
            continue;
        }

        let source = entry.path();
        tokio::fs::copy(&source, backup_dir.join(&name))
            .await
            .map_err(|e| SetupError::Backup { path: source, source: e })?;
        copied += 1;
    }

    debug!("Backed up {} JARs to {:?}", copied, backup_dir);
    Ok(copied)
}
