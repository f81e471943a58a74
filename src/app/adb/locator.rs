use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// Path fragments of package-manager proxies that forward to adb but break some invocations.
const SHIM_MARKERS: &[&str] = &[
    "scoop/shims",
    "chocolatey/bin",
    ".asdf/shims",
    "mise/shims",
    "rtx/shims",
    ".proto/shims",
    "volta/bin",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    PathSearch,
    DeepSearch,
    Bundled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolCandidate {
    pub path: PathBuf,
    pub rank: usize,
    pub source: CandidateSource,
}

/// Everything resolution reads from the host, captured up front so it can be faked in tests.
#[derive(Debug, Clone, Default)]
pub struct ResolverEnv {
    pub path_var: Option<OsString>,
    pub home: Option<PathBuf>,
    pub exe_dir: Option<PathBuf>,
    pub sdk_roots: Vec<PathBuf>,
    pub cwd: PathBuf,
}

impl ResolverEnv {
    pub fn capture() -> Self {
        let sdk_roots = ["ANDROID_HOME", "ANDROID_SDK_ROOT"]
            .iter()
            .filter_map(|key| std::env::var_os(key))
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .collect();
        Self {
            path_var: std::env::var_os("PATH"),
            home: dirs::home_dir(),
            exe_dir: std::env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(Path::to_path_buf)),
            sdk_roots,
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }
}

pub fn adb_binary_name() -> &'static str {
    if cfg!(windows) {
        "adb.exe"
    } else {
        "adb"
    }
}

pub fn normalize_command_path(value: &str) -> String {
    let trimmed = value.trim();
    if let Some(inner) = trimmed
        .strip_prefix('"')
        .and_then(|candidate| candidate.strip_suffix('"'))
    {
        return inner.trim().to_string();
    }
    if let Some(inner) = trimmed
        .strip_prefix('\'')
        .and_then(|candidate| candidate.strip_suffix('\''))
    {
        return inner.trim().to_string();
    }
    trimmed.to_string()
}

pub fn validate_adb_program(program: &str) -> Result<(), String> {
    if program.trim().is_empty() {
        return Err("ADB command is empty".to_string());
    }
    if program == "adb" {
        return Ok(());
    }
    let path = Path::new(program);
    if path.is_dir() {
        return Err("ADB path must point to an executable file".to_string());
    }
    if !path.exists() {
        return Err("ADB executable not found at the configured path".to_string());
    }
    Ok(())
}

pub fn is_shim_path(path: &Path) -> bool {
    let normalized = path.to_string_lossy().replace('\\', "/").to_lowercase();
    SHIM_MARKERS.iter().any(|marker| normalized.contains(marker))
}

/// First existing, non-shim candidate in priority order.
pub fn resolve(env: &ResolverEnv) -> Option<ToolCandidate> {
    candidates(env).into_iter().find(|candidate| candidate.path.is_file())
}

pub fn resolve_bundled(env: &ResolverEnv) -> Option<ToolCandidate> {
    bundled_candidates(env, 0)
        .into_iter()
        .find(|candidate| candidate.path.is_file())
}

/// All hypotheses in rank order. PATH hits flagged as shims never make it into the list.
pub fn candidates(env: &ResolverEnv) -> Vec<ToolCandidate> {
    let mut out = Vec::new();

    if let Ok(found) = which::which_in_all(adb_binary_name(), env.path_var.clone(), &env.cwd) {
        for path in found.filter(|path| !is_shim_path(path)) {
            out.push(ToolCandidate {
                path,
                rank: out.len(),
                source: CandidateSource::PathSearch,
            });
        }
    }

    for path in deep_search_paths(env) {
        out.push(ToolCandidate {
            path,
            rank: out.len(),
            source: CandidateSource::DeepSearch,
        });
    }

    let next_rank = out.len();
    out.extend(bundled_candidates(env, next_rank));
    out
}

fn deep_search_paths(env: &ResolverEnv) -> Vec<PathBuf> {
    let exe = adb_binary_name();
    let mut paths = Vec::new();
    if let Some(home) = env.home.as_ref() {
        paths.push(home.join("scoop/apps/adb/current/platform-tools").join(exe));
        paths.push(home.join("scoop/apps/android-platform-tools/current").join(exe));
    }
    if cfg!(windows) {
        paths.push(PathBuf::from(
            "C:/ProgramData/chocolatey/lib/adb/tools/platform-tools/adb.exe",
        ));
    }
    for root in &env.sdk_roots {
        paths.push(root.join("platform-tools").join(exe));
    }
    if let Some(home) = env.home.as_ref() {
        paths.push(home.join("Library/Android/sdk/platform-tools").join(exe));
        paths.push(home.join("Android/Sdk/platform-tools").join(exe));
        paths.push(home.join("AppData/Local/Android/Sdk/platform-tools").join(exe));
    }
    paths
}

fn bundled_candidates(env: &ResolverEnv, first_rank: usize) -> Vec<ToolCandidate> {
    let Some(dir) = env.exe_dir.as_ref() else {
        return Vec::new();
    };
    let exe = adb_binary_name();
    [dir.join("platform-tools").join(exe), dir.join(exe)]
        .into_iter()
        .enumerate()
        .map(|(offset, path)| ToolCandidate {
            path,
            rank: first_rank + offset,
            source: CandidateSource::Bundled,
        })
        .collect()
}
