use crate::output::UserOutput;
use futures::future::join_all;
use pressbox::{DatabaseEngine, Orchestrator, Site, SiteConfig, SiteStatus};
use serde_json::json;

fn status_icon(status: SiteStatus) -> &'static str {
    match status {
        SiteStatus::Running => "+",
        SiteStatus::Stopped => "o",
        SiteStatus::Provisioning | SiteStatus::Starting | SiteStatus::Stopping => ".",
        SiteStatus::Error => "x",
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn run_create(
    orchestrator: &Orchestrator,
    name: String,
    engine: Option<DatabaseEngine>,
    domain: Option<String>,
    wordpress_version: Option<String>,
    php_version: Option<String>,
    admin_user: Option<String>,
    admin_email: Option<String>,
    json: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let config = SiteConfig {
        name,
        domain,
        engine,
        php_version,
        wordpress_version,
        admin_user,
        admin_email,
        admin_password: None,
    };
    let site = orchestrator.create(config).await?;
    let admin_password = site.admin.password.clone().unwrap_or_default();

    if json {
        let mut value = serde_json::to_value(&site)?;
        value["admin"]["password"] = json!(admin_password);
        value["root"] = json!(site.paths.root.display().to_string());
        out.status(&serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    out.success(&format!("Created site '{}' ({})", site.name, site.id));
    out.status(&format!("  Directory:  {}", site.paths.root.display()));
    out.status(&format!("  WordPress:  {}", site.wordpress_version));
    out.status(&format!("  Database:   {} ({})", site.database.engine, site.database.name));
    out.status(&format!("  Port:       {}", site.port));
    out.status(&format!("  Admin:      {} / {}", site.admin.user, admin_password));
    out.blank();
    out.status("The admin password is not stored; note it now.");
    out.status(&format!("Start the site with: pressbox up {}", site.name));
    Ok(())
}

pub fn run_list(orchestrator: &Orchestrator, json: bool, out: &dyn UserOutput) -> anyhow::Result<()> {
    let sites = orchestrator.list();
    if json {
        out.status(&serde_json::to_string_pretty(&sites)?);
        return Ok(());
    }

    out.status("Sites:");
    out.status(&format!("{:-<72}", ""));
    if sites.is_empty() {
        out.status("  No sites yet. Create one with `pressbox create <name>`");
        return Ok(());
    }
    for site in &sites {
        out.status(&format!(
            "  {} {:<24} {:<9} {:<8} {}",
            status_icon(site.status),
            site.name,
            site.status,
            site.database.engine,
            site.url()
        ));
        if let Some(error) = &site.last_error {
            out.status(&format!("      last error: {}", error));
        }
    }
    Ok(())
}

/// Start `sites`, serve them until Ctrl-C, then stop them.
pub async fn run_up(orchestrator: &Orchestrator, sites: Vec<String>, out: &dyn UserOutput) -> anyhow::Result<()> {
    let results = join_all(sites.iter().map(|id| orchestrator.start(id))).await;

    let mut started: Vec<Site> = Vec::new();
    for (id, result) in sites.iter().zip(results) {
        match result {
            Ok(site) => {
                out.success(&format!("  {} {:<24} {}", status_icon(site.status), site.name, site.url()));
                started.push(site);
            }
            Err(e) => out.error(&format!("  x {:<24} {}", id, e.with_suggestion())),
        }
    }
    if started.is_empty() {
        anyhow::bail!("no site could be started");
    }

    out.blank();
    out.status("Serving. Press Ctrl-C to stop.");
    tokio::signal::ctrl_c().await?;
    out.blank();
    out.status("Stopping sites...");

    let failures = orchestrator.stop_all().await;
    for (id, e) in &failures {
        out.warning(&format!("Failed to stop {}: {}", id, e));
    }
    if failures.is_empty() {
        out.success("Sites stopped");
    }
    Ok(())
}

pub async fn run_delete(
    orchestrator: &Orchestrator,
    site: String,
    force: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let existing = orchestrator.get(&site)?;
    orchestrator.delete(&existing.id, force).await?;
    out.success(&format!("Deleted site '{}'", existing.name));
    if existing.database.engine.is_networked() {
        out.status(&format!(
            "Database '{}' was left in the {} server",
            existing.database.name, existing.database.engine
        ));
    }
    Ok(())
}
