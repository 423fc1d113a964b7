//! Source patches for hosting under a path prefix

use std::path::Path;

use secrecy::SecretString;
use serde_json::Value;
use tracing::debug;

use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::storage::repos::EnvVars;

const VITE_CONFIGS: [&str; 4] = [
    "vite.config.js",
    "vite.config.mjs",
    "vite.config.ts",
    "vite.config.mts",
];

/// What the patches changed
#[derive(Debug, Default)]
pub struct SubpathPatches {
    /// Human-readable list for the deployment log
    pub applied: Vec<String>,
    /// Extra variables for the build environment
    pub build_env: EnvVars,
}

/// Prepare a staged source tree to be served under `base` (e.g. `/app/blog`).
///
/// Each patch is independent; callers treat an error as a warning.
pub async fn apply_subpath_patches(
    root: &Path,
    base: &str,
) -> Result<SubpathPatches, DeployError> {
    let mut patches = SubpathPatches::default();

    for key in ["PUBLIC_URL", "BASE_PATH"] {
        patches
            .build_env
            .insert(key.to_string(), SecretString::from(base.to_string()));
    }

    if set_homepage(&File::new(root.join("package.json")), base).await? {
        patches.applied.push(format!("package.json homepage set to {}", base));
    }

    for name in VITE_CONFIGS {
        let file = File::new(root.join(name));
        if !file.exists().await {
            continue;
        }
        if inject_vite_base(&file, base).await? {
            patches.applied.push(format!("{} base set to {}/", name, base));
        }
        break;
    }

    Ok(patches)
}

async fn set_homepage(manifest: &File, base: &str) -> Result<bool, DeployError> {
    if !manifest.exists().await {
        return Ok(false);
    }

    let mut value: Value = manifest.read_json().await?;
    let Some(object) = value.as_object_mut() else {
        return Err(DeployError::Validation(
            "package.json is not a JSON object".to_string(),
        ));
    };
    if object.get("homepage").and_then(Value::as_str) == Some(base) {
        return Ok(false);
    }

    object.insert("homepage".to_string(), Value::String(base.to_string()));
    manifest.write_json(&value).await?;
    Ok(true)
}

/// Insert `base` into the config object unless one is already declared
pub fn vite_with_base(source: &str, base: &str) -> Option<String> {
    if source.contains("base:") {
        return None;
    }

    let anchor = ["defineConfig({", "export default {"]
        .iter()
        .find_map(|anchor| source.find(anchor).map(|idx| idx + anchor.len()))?;

    let mut patched = String::with_capacity(source.len() + base.len() + 16);
    patched.push_str(&source[..anchor]);
    patched.push_str(&format!("\n  base: '{}/',", base.trim_end_matches('/')));
    patched.push_str(&source[anchor..]);
    Some(patched)
}

async fn inject_vite_base(file: &File, base: &str) -> Result<bool, DeployError> {
    let source = file.read_string().await?;
    match vite_with_base(&source, base) {
        Some(patched) => {
            file.write_string(&patched).await?;
            Ok(true)
        }
        None => {
            debug!("{} already sets base or has no config object", file.path().display());
            Ok(false)
        }
    }
}
