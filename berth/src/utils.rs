//! Utility functions

use colored::Colorize;
use serde::{Deserialize, Serialize};

use crate::exec::{CommandRunner, CommandSpec, TokioCommandRunner};
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;

/// Version information for the control plane
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Get version information
pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown").to_string(),
        build_time: option_env!("BUILD_TIME").unwrap_or("unknown").to_string(),
    }
}

/// One line of the diagnostic report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub name: String,
    pub ok: bool,
    pub detail: String,
}

async fn check_binary(runner: &dyn CommandRunner, name: &str, bin: &str, arg: &str) -> Check {
    let spec = CommandSpec::new(bin, [arg]);
    match runner.run(&spec).await {
        Ok(output) if output.success() => Check {
            name: name.to_string(),
            ok: true,
            detail: output.stdout.lines().next().unwrap_or("").trim().to_string(),
        },
        Ok(output) => Check {
            name: name.to_string(),
            ok: false,
            detail: output.error_tail(1),
        },
        Err(e) => Check {
            name: name.to_string(),
            ok: false,
            detail: e.to_string(),
        },
    }
}

async fn check_data_dir(layout: &StorageLayout) -> Check {
    let probe = layout.base_dir.join(".diag-probe");
    let result = async {
        tokio::fs::create_dir_all(&layout.base_dir).await?;
        tokio::fs::write(&probe, b"ok").await?;
        tokio::fs::remove_file(&probe).await
    }
    .await;

    Check {
        name: "data directory".to_string(),
        ok: result.is_ok(),
        detail: match result {
            Ok(()) => format!("{} is writable", layout.base_dir.display()),
            Err(e) => format!("{}: {}", layout.base_dir.display(), e),
        },
    }
}

/// Run every environment check
pub async fn collect_checks(
    runner: &dyn CommandRunner,
    settings: &Settings,
    layout: &StorageLayout,
) -> Vec<Check> {
    vec![
        check_binary(runner, "proxy (caddy)", &settings.proxy.bin, "version").await,
        check_binary(runner, "supervisor (pm2)", &settings.supervisor.bin, "--version").await,
        check_binary(runner, "node", "node", "--version").await,
        check_data_dir(layout).await,
    ]
}

/// Print a colored environment report
pub async fn run_diagnostic(settings: &Settings, layout: &StorageLayout) {
    let version = version_info();
    println!(
        "{} {} ({})",
        "berth".bold(),
        version.version,
        version.git_hash.dimmed()
    );

    let checks = collect_checks(&TokioCommandRunner, settings, layout).await;
    for check in &checks {
        let mark = if check.ok { "ok".green() } else { "FAIL".red() };
        println!("  [{}] {:<18} {}", mark, check.name, check.detail);
    }

    let failed = checks.iter().filter(|c| !c.ok).count();
    if failed == 0 {
        println!("{}", "All checks passed".green().bold());
    } else {
        println!("{}", format!("{} check(s) failed", failed).red().bold());
    }
}
