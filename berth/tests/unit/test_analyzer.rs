//! Analyzer tests over real directory trees

use std::fs;
use std::path::Path;

use berth::analyzer::{analyze, ServeMethod, Strategy};
use berth::models::project::{PackageManager, ProjectType};

fn write(root: &Path, path: &str, contents: &str) {
    let path = root.join(path);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

#[test]
fn test_plain_site_is_served_as_is() {
    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "index.html", "<h1>blog</h1>");
    write(tmp.path(), "assets/app.css", "h1 {}");

    let analysis = analyze(tmp.path(), ProjectType::StaticPlain);
    assert_eq!(analysis.strategy, Strategy::Static);
    assert_eq!(analysis.serve_method, ServeMethod::ProxyStatic);
    assert!(!analysis.requires_build);
    assert!(analysis.critical().is_none());
    assert_eq!(analysis.static_root().as_deref(), Some("."));
}

#[test]
fn test_spa_without_output_needs_a_build() {
    let tmp = tempfile::tempdir().unwrap();
    write(
        tmp.path(),
        "package.json",
        r#"{"scripts":{"build":"vite build"}}"#,
    );
    write(tmp.path(), "yarn.lock", "");
    write(tmp.path(), "src/main.ts", "");

    let analysis = analyze(tmp.path(), ProjectType::StaticBuildable);
    assert_eq!(analysis.strategy, Strategy::BuildAndServe);
    assert_eq!(analysis.package_manager, PackageManager::Yarn);
    assert_eq!(analysis.lock_file.as_deref(), Some("yarn.lock"));
    assert!(analysis.critical().is_none());
}

#[test]
fn test_prebuilt_output_skips_the_build() {
    let tmp = tempfile::tempdir().unwrap();
    write(
        tmp.path(),
        "package.json",
        r#"{"scripts":{"build":"vite build"}}"#,
    );
    write(tmp.path(), "dist/index.html", "<div id=app></div>");

    let analysis = analyze(tmp.path(), ProjectType::StaticBuildable);
    assert!(!analysis.requires_build);
    assert!(analysis.has_warning("SKIP_BUILD"));
    assert_eq!(analysis.static_root().as_deref(), Some("dist"));
}

#[test]
fn test_build_without_script_is_critical() {
    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "package.json", r#"{"name":"spa"}"#);

    let analysis = analyze(tmp.path(), ProjectType::StaticBuildable);
    let critical = analysis.critical().unwrap();
    assert_eq!(critical.code, "MISSING_BUILD_SCRIPT");
}

#[test]
fn test_process_type_needs_manifest() {
    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "server.js", "");

    let analysis = analyze(tmp.path(), ProjectType::DynamicNode);
    assert_eq!(analysis.critical().unwrap().code, "MISSING_MANIFEST");
    assert_eq!(analysis.serve_method, ServeMethod::ProxyProcess);
}

#[test]
fn test_incomplete_output_is_a_warning() {
    let tmp = tempfile::tempdir().unwrap();
    write(
        tmp.path(),
        "package.json",
        r#"{"scripts":{"build":"next build","start":"next start"}}"#,
    );
    write(tmp.path(), "build/manifest.json", "{}");

    let analysis = analyze(tmp.path(), ProjectType::DynamicFramework);
    assert!(analysis.has_warning("INCOMPLETE_BUILD"));
    assert!(analysis.requires_build);
    assert!(analysis.critical().is_none());
}
