use crate::backtest::{BacktestStatus, DbTaskQueue, PublicBacktest};
use crate::storage::repository::{attempt_history, BacktestRequestRepository, JobStats};
use sea_orm::DatabaseConnection;
use std::fmt::Write as _;

/// Human-readable summary of one request, including its validation attempts.
pub async fn show(db: &DatabaseConnection, id: &str) -> anyhow::Result<String> {
    let model = BacktestRequestRepository::get_by_id(db, id).await?;
    let public = PublicBacktest::from(&model);

    let mut out = String::new();
    writeln!(out, "{}  [{}]", public.id, public.status)?;
    writeln!(
        out,
        "  {} | {} | {}..{}",
        public.strategy_title.as_deref().unwrap_or("-"),
        public.instrument_symbol,
        public.from_date,
        public.to_date
    )?;
    if let Some(err) = &public.error_message {
        writeln!(out, "  error: {err}")?;
    }
    writeln!(out, "  validation attempts: {}", public.validation_attempts)?;
    for rec in attempt_history(&model) {
        writeln!(out, "    #{}: {}", rec.attempt, first_line(&rec.error))?;
    }
    for (name, url) in [
        ("script", &public.script_url),
        ("validation data", &public.validation_data_url),
        ("full data", &public.full_data_url),
        ("log", &public.log_url),
        ("report", &public.report_url),
    ] {
        if let Some(url) = url {
            writeln!(out, "  {name}: {url}")?;
        }
    }
    Ok(out)
}

/// JSON rendering of the client-facing projection.
pub async fn show_json(db: &DatabaseConnection, id: &str) -> anyhow::Result<String> {
    let model = BacktestRequestRepository::get_by_id(db, id).await?;
    Ok(serde_json::to_string_pretty(&PublicBacktest::from(&model))?)
}

pub async fn list(db: &DatabaseConnection, owner_id: &str) -> anyhow::Result<String> {
    let rows = BacktestRequestRepository::list_by_owner(db, owner_id).await?;
    if rows.is_empty() {
        return Ok(format!("no backtests for {owner_id}\n"));
    }
    let mut out = String::new();
    for m in rows {
        writeln!(
            out,
            "{}  {:<24} {:<8} {}",
            m.id,
            m.status.as_str(),
            m.instrument_symbol,
            m.strategy_title.as_deref().unwrap_or("-")
        )?;
    }
    Ok(out)
}

pub async fn stats(db: &DatabaseConnection, queue: &DbTaskQueue) -> anyhow::Result<String> {
    let counts = BacktestRequestRepository::status_counts(db).await?;
    let jobs = queue.stats().await?;
    Ok(render_stats(&counts, &jobs))
}

fn render_stats(counts: &[(BacktestStatus, u64)], jobs: &JobStats) -> String {
    let mut out = String::from("requests:\n");
    if counts.is_empty() {
        out.push_str("  (none)\n");
    }
    for (status, n) in counts {
        out.push_str(&format!("  {:<24} {}\n", status.as_str(), n));
    }
    out.push_str(&format!(
        "jobs: total {} | queued {} | claimed {} | done {} | failed {} | redelivered {}\n",
        jobs.total, jobs.queued, jobs.claimed, jobs.done, jobs.failed, jobs.redelivered
    ));
    out
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_lists_counts_and_jobs() {
        let jobs = JobStats {
            total: 5,
            queued: 1,
            claimed: 1,
            done: 3,
            failed: 0,
            redelivered: 2,
        };
        let text = render_stats(&[(BacktestStatus::Completed, 3)], &jobs);
        assert!(text.contains("completed"));
        assert!(text.contains("redelivered 2"));

        let empty = render_stats(&[], &JobStats::default());
        assert!(empty.contains("(none)"));
    }
}
