//! Caddyfile rendering
//!
//! Every function here is pure: the same inputs always give the same bytes.

use std::fmt::Write as _;
use std::path::Path;

use crate::errors::DeployError;
use crate::models::project::Project;
use crate::storage::settings::ProxySettings;

const HEADER: &str = "# Managed by berth. This file is regenerated on every project change;\n\
                      # manual edits are overwritten.\n";

const PANEL_SNIPPET: &str = "berth_panel";

/// Import line pulling every path fragment into the main site
pub fn projects_import(settings: &ProxySettings) -> String {
    format!("import {}/*.caddy", settings.projects_dir.display())
}

fn domains_import(settings: &ProxySettings) -> String {
    format!("import {}/*.caddy", settings.domains_dir.display())
}

/// What the proxy points a project at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upstream<'a> {
    /// Serve files from this directory with SPA fallback
    Static { root: &'a Path },
    /// Reverse proxy to a local port
    Process { port: u16 },
}

impl<'a> Upstream<'a> {
    /// Pick the upstream for a project from its type
    pub fn for_project(project: &Project, root: &'a Path) -> Result<Self, DeployError> {
        if project.project_type.is_static() {
            return Ok(Upstream::Static { root });
        }
        project
            .port
            .map(|port| Upstream::Process { port })
            .ok_or_else(|| {
                DeployError::Internal(format!("Project {} has no port assigned", project.name))
            })
    }

    fn write_body(&self, out: &mut String, indent: &str) {
        match self {
            Upstream::Static { root } => {
                let _ = writeln!(out, "{indent}root * {}", root.display());
                let _ = writeln!(out, "{indent}try_files {{path}} /index.html");
                let _ = writeln!(out, "{indent}file_server");
            }
            Upstream::Process { port } => {
                let _ = writeln!(out, "{indent}reverse_proxy 127.0.0.1:{port}");
            }
        }
        let _ = writeln!(out, "{indent}encode gzip zstd");
    }
}

/// Path-scoped block, reachable without any domain
pub fn render_path_fragment(project: &Project, prefix: &str, upstream: &Upstream) -> String {
    let base = format!("{}/{}", prefix.trim_end_matches('/'), project.slug());
    let mut out = String::new();

    let _ = writeln!(out, "# {} ({})", project.name, project.id);
    let _ = writeln!(out, "redir {base} {base}/ 308");
    let _ = writeln!(out, "handle_path {base}/* {{");
    upstream.write_body(&mut out, "\t");
    let _ = writeln!(out, "}}");
    out
}

/// One site block per custom domain, `None` when there are no domains
pub fn render_domain_fragment(project: &Project, upstream: &Upstream) -> Option<String> {
    if project.domains.is_empty() {
        return None;
    }

    let mut out = String::new();
    let _ = writeln!(out, "# {} ({})", project.name, project.id);
    for domain in &project.domains {
        let _ = writeln!(out, "{domain} {{");
        upstream.write_body(&mut out, "\t");
        let _ = writeln!(out, "}}");
    }
    Some(out)
}

/// Master Caddyfile
pub fn render_main(settings: &ProxySettings, control_port: u16) -> String {
    let mut out = String::from(HEADER);

    let admin = settings
        .admin_url
        .trim_start_matches("http://")
        .trim_start_matches("https://")
        .trim_end_matches('/');
    let _ = writeln!(out, "{{\n\tadmin {admin}\n}}\n");

    // Control-plane API and WebSocket routes, shared by every panel site
    let _ = writeln!(out, "({PANEL_SNIPPET}) {{");
    for matcher in ["/api/*", "/ws/*"] {
        let _ = writeln!(out, "\thandle {matcher} {{");
        let _ = writeln!(out, "\t\treverse_proxy 127.0.0.1:{control_port} {{");
        let _ = writeln!(
            out,
            "\t\t\theader_up Connection {{http.request.header.Connection}}"
        );
        let _ = writeln!(out, "\t\t\theader_up Upgrade {{http.request.header.Upgrade}}");
        let _ = writeln!(out, "\t\t}}");
        let _ = writeln!(out, "\t}}");
    }
    let _ = writeln!(out, "}}\n");

    let _ = writeln!(out, "(berth_ui) {{");
    let _ = writeln!(out, "\thandle {{");
    let _ = writeln!(out, "\t\troot * {}", settings.ui_dir.display());
    let _ = writeln!(out, "\t\ttry_files {{path}} /index.html");
    let _ = writeln!(out, "\t\tfile_server");
    let _ = writeln!(out, "\t}}");
    let _ = writeln!(out, "}}\n");

    let _ = writeln!(out, "{}\n", domains_import(settings));

    for domain in &settings.panel_domains {
        let _ = writeln!(out, "{domain} {{");
        let _ = writeln!(out, "\timport {PANEL_SNIPPET}");
        let _ = writeln!(out, "\timport berth_ui");
        let _ = writeln!(out, "}}\n");
    }

    let _ = writeln!(out, ":80 {{");
    let _ = writeln!(out, "\timport {PANEL_SNIPPET}");
    let _ = writeln!(out, "\t{}", projects_import(settings));
    let _ = writeln!(out, "\timport berth_ui");
    let _ = writeln!(out, "}}");

    out
}
