use crate::output::UserOutput;
use pressbox::{Orchestrator, ServerEngine};

pub async fn run_db_status(orchestrator: &Orchestrator, json: bool, out: &dyn UserOutput) -> anyhow::Result<()> {
    let records = orchestrator.database_statuses().await?;
    if json {
        out.status(&serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    out.status("Database servers:");
    out.status(&format!("{:-<72}", ""));
    if records.is_empty() {
        out.status("  None found. Sites asking for MySQL will use SQLite instead.");
        return Ok(());
    }
    for record in &records {
        let state = match record.pid {
            Some(pid) if record.is_running => format!("running (PID {})", pid),
            _ => "stopped".to_string(),
        };
        out.status(&format!(
            "  {} {:<22} port {:<6} {}",
            if record.is_running { "+" } else { "o" },
            record.label(),
            record.listen_port,
            state
        ));
        out.status(&format!("      {}", record.executable_path.display()));
    }
    Ok(())
}

pub async fn run_db_start(orchestrator: &Orchestrator, engine: ServerEngine, out: &dyn UserOutput) -> anyhow::Result<()> {
    let record = orchestrator.start_engine(engine).await?;
    out.success(&format!(
        "{} is running on port {}",
        record.label(),
        record.listen_port
    ));
    Ok(())
}

pub async fn run_db_stop(orchestrator: &Orchestrator, engine: ServerEngine, out: &dyn UserOutput) -> anyhow::Result<()> {
    let stopped = orchestrator.stop_engine(engine).await?;
    if stopped.is_empty() {
        out.status(&format!("No running {} server found", engine));
    }
    for record in &stopped {
        out.success(&format!("Asked {} to shut down", record.label()));
    }
    Ok(())
}
