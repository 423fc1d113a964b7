//! Build/type analyzer
//!
//! Classifies an extracted archive for the declared project type. The
//! declared type is trusted; only generic checks are made (manifest, lock
//! file, build output), so a new project type needs no changes here.
//! Malformed projects degrade to warnings, never to errors.

pub mod output;

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::project::{PackageManager, ProjectType};

pub use output::{detect_build_output, BuildOutput};

/// Lock files, in priority order
const LOCK_FILES: &[(&str, PackageManager)] = &[
    ("pnpm-lock.yaml", PackageManager::Pnpm),
    ("yarn.lock", PackageManager::Yarn),
    ("package-lock.json", PackageManager::Npm),
];

/// Files tried as the process entry point when there is no start script
pub const ENTRY_CANDIDATES: &[&str] = &["server.js", "index.js", "app.js", "main.js"];

/// How the project gets from archive to served
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Files are served as they are
    Static,
    /// A process runs what was uploaded, no build
    ServePrebuilt,
    /// A build runs first, then the output is served
    BuildAndServe,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Static => "static",
            Strategy::ServePrebuilt => "serve-prebuilt",
            Strategy::BuildAndServe => "build-and-serve",
        }
    }
}

/// How the proxy reaches the project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServeMethod {
    ProxyStatic,
    ProxyProcess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// A finding about the uploaded project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisWarning {
    pub severity: Severity,
    /// Stable code, e.g. `MISSING_BUILD_SCRIPT`
    pub code: String,
    pub message: String,
}

impl AnalysisWarning {
    fn new(severity: Severity, code: &str, message: impl Into<String>) -> Self {
        Self {
            severity,
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Result of analyzing an extracted archive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub declared_type: ProjectType,
    pub has_manifest: bool,
    pub package_manager: PackageManager,
    pub lock_file: Option<String>,
    pub build_script: Option<String>,
    pub start_script: Option<String>,
    /// `main` field of the manifest
    pub main_entry: Option<String>,
    pub build_output: Option<BuildOutput>,
    pub has_root_index: bool,
    pub requires_build: bool,
    pub strategy: Strategy,
    pub serve_method: ServeMethod,
    pub warnings: Vec<AnalysisWarning>,
}

impl Analysis {
    /// First critical finding, if any
    pub fn critical(&self) -> Option<&AnalysisWarning> {
        self.warnings
            .iter()
            .find(|w| w.severity == Severity::Critical)
    }

    pub fn has_warning(&self, code: &str) -> bool {
        self.warnings.iter().any(|w| w.code == code)
    }

    /// Directory the proxy should serve for a static project
    pub fn static_root(&self) -> Option<String> {
        match &self.build_output {
            Some(output) if output.complete => Some(output.dir.clone()),
            _ if self.has_root_index => Some(".".to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct Manifest {
    build_script: Option<String>,
    start_script: Option<String>,
    main_entry: Option<String>,
}

/// Analyze an extracted archive for the declared project type
pub fn analyze(root: &Path, declared_type: ProjectType) -> Analysis {
    let mut warnings = Vec::new();

    let manifest_path = root.join("package.json");
    let has_manifest = manifest_path.is_file();
    let manifest = if has_manifest {
        match read_manifest(&manifest_path) {
            Ok(manifest) => manifest,
            Err(e) => {
                warnings.push(AnalysisWarning::new(
                    Severity::Warning,
                    "INVALID_MANIFEST",
                    format!("package.json could not be parsed: {}", e),
                ));
                Manifest::default()
            }
        }
    } else {
        Manifest::default()
    };

    let (package_manager, lock_file) = detect_package_manager(root);
    if has_manifest && lock_file.is_none() {
        warnings.push(AnalysisWarning::new(
            Severity::Info,
            "NO_LOCK_FILE",
            "No lock file found, installing with npm",
        ));
    }

    let build_output = detect_build_output(root);
    let output_complete = build_output.as_ref().map(|o| o.complete).unwrap_or(false);
    let has_root_index = root.join("index.html").is_file();

    if let Some(output) = build_output.as_ref().filter(|o| !o.complete) {
        warnings.push(AnalysisWarning::new(
            Severity::Warning,
            "INCOMPLETE_BUILD",
            format!(
                "{}/ has content but no entry HTML, scripts or server build",
                output.dir
            ),
        ));
    }

    let requires_build = match declared_type {
        ProjectType::StaticPlain => false,
        ProjectType::StaticBuildable | ProjectType::DynamicFramework => !output_complete,
        ProjectType::DynamicNode => manifest.build_script.is_some() && !output_complete,
    };

    if output_complete && declared_type.is_buildable() {
        if let Some(output) = &build_output {
            warnings.push(AnalysisWarning::new(
                Severity::Info,
                "SKIP_BUILD",
                format!("Usable build output found in {}/, skipping build", output.dir),
            ));
        }
    }

    if requires_build && manifest.build_script.is_none() {
        warnings.push(AnalysisWarning::new(
            Severity::Critical,
            "MISSING_BUILD_SCRIPT",
            "A build is required but package.json declares no \"build\" script",
        ));
    }

    let needs_manifest = declared_type.requires_manifest() || requires_build;
    if needs_manifest && !has_manifest {
        warnings.push(AnalysisWarning::new(
            Severity::Critical,
            "MISSING_MANIFEST",
            format!("package.json is required for {} projects", declared_type.as_str()),
        ));
    }

    if declared_type.requires_process()
        && manifest.start_script.is_none()
        && manifest.main_entry.is_none()
        && !ENTRY_CANDIDATES.iter().any(|f| root.join(f).is_file())
    {
        warnings.push(AnalysisWarning::new(
            Severity::Warning,
            "MISSING_START_COMMAND",
            "No \"start\" script or entry file found yet",
        ));
    }

    if declared_type.is_static() && !requires_build && !output_complete && !has_root_index {
        warnings.push(AnalysisWarning::new(
            Severity::Critical,
            "NO_ENTRY_HTML",
            "No index.html found at the root or in a build output directory",
        ));
    }

    let strategy = if requires_build {
        Strategy::BuildAndServe
    } else if declared_type.is_static() {
        Strategy::Static
    } else {
        Strategy::ServePrebuilt
    };

    let serve_method = if declared_type.is_static() {
        ServeMethod::ProxyStatic
    } else {
        ServeMethod::ProxyProcess
    };

    Analysis {
        declared_type,
        has_manifest,
        package_manager,
        lock_file,
        build_script: manifest.build_script,
        start_script: manifest.start_script,
        main_entry: manifest.main_entry,
        build_output,
        has_root_index,
        requires_build,
        strategy,
        serve_method,
        warnings,
    }
}

/// Pick the package manager from the lock file present (pnpm > yarn > npm)
pub fn detect_package_manager(root: &Path) -> (PackageManager, Option<String>) {
    LOCK_FILES
        .iter()
        .find(|(file, _)| root.join(file).is_file())
        .map(|(file, pm)| (*pm, Some(file.to_string())))
        .unwrap_or((PackageManager::Npm, None))
}

fn read_manifest(path: &Path) -> Result<Manifest, String> {
    let contents = fs::read_to_string(path).map_err(|e| e.to_string())?;
    let value: Value = serde_json::from_str(&contents).map_err(|e| e.to_string())?;

    let script = |name: &str| {
        value
            .get("scripts")
            .and_then(|s| s.get(name))
            .and_then(|s| s.as_str())
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
    };

    Ok(Manifest {
        build_script: script("build"),
        start_script: script("start"),
        main_entry: value
            .get("main")
            .and_then(|m| m.as_str())
            .map(str::to_string),
    })
}
