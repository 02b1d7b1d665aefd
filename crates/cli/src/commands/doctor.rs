use ladder_core::config::{AppConfig, LoadOptions};
use ladder_core::{validate_ladder, LevelConfigStore};
use ladder_db::SqlLevelConfigRepository;
use serde::Serialize;

use super::{open_pool, CommandResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str, reason: &str) -> Self {
        Self { name, status: CheckStatus::Skipped, details: format!("skipped because {reason}") }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

const READINESS_FAILED_EXIT: u8 = 6;

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = match report.overall_status {
        CheckStatus::Pass => 0,
        _ => READINESS_FAILED_EXIT,
    };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::pass(
                "config_validation",
                "configuration loaded and validated",
            ));
            checks.extend(check_storage(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::fail("config_validation", error.to_string()));
            checks.push(DoctorCheck::skipped(
                "database_connectivity",
                "configuration did not load",
            ));
            checks.push(DoctorCheck::skipped("approval_ladder", "configuration did not load"));
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

/// Connectivity and ladder checks share one pool; the ladder is read as stored, never migrated.
fn check_storage(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![
                DoctorCheck::fail(
                    "database_connectivity",
                    format!("failed to initialize async runtime: {error}"),
                ),
                DoctorCheck::skipped("approval_ladder", "the async runtime did not start"),
            ];
        }
    };

    runtime.block_on(async {
        let pool = match open_pool(config).await {
            Ok(pool) => pool,
            Err((_, message, _)) => {
                return vec![
                    DoctorCheck::fail(
                        "database_connectivity",
                        format!("failed to connect to database: {message}"),
                    ),
                    DoctorCheck::skipped("approval_ladder", "the database is unreachable"),
                ];
            }
        };

        let connectivity = DoctorCheck::pass(
            "database_connectivity",
            format!("connected using `{}`", config.database.url),
        );
        let ladder = check_ladder(&pool, config.approval.max_levels).await;
        pool.close().await;
        vec![connectivity, ladder]
    })
}

async fn check_ladder(pool: &ladder_db::DbPool, max_levels: u32) -> DoctorCheck {
    let repository = SqlLevelConfigRepository::new(pool.clone());
    let levels = match repository.active_levels().await {
        Ok(levels) => levels,
        Err(error) => {
            return DoctorCheck::fail(
                "approval_ladder",
                format!("could not read approval levels ({error}); run `ladder migrate` first"),
            );
        }
    };

    if levels.is_empty() {
        return DoctorCheck::fail(
            "approval_ladder",
            "no active approval levels; add one with `ladder levels set`",
        );
    }

    match validate_ladder(&levels, max_levels) {
        Ok(()) => DoctorCheck::pass(
            "approval_ladder",
            format!("{} active level(s), top approver {}", levels.len(), top_approver(&levels)),
        ),
        Err(error) => DoctorCheck::fail("approval_ladder", error.to_string()),
    }
}

fn top_approver(levels: &[ladder_core::ApprovalLevelConfig]) -> &str {
    levels
        .iter()
        .max_by_key(|config| config.level)
        .map(|config| config.approver_email.as_str())
        .unwrap_or("-")
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::{render_human, CheckStatus, DoctorCheck, DoctorReport};

    #[test]
    fn human_report_marks_each_check() {
        let report = DoctorReport {
            overall_status: CheckStatus::Fail,
            summary: "doctor: one or more readiness checks failed".to_string(),
            checks: vec![
                DoctorCheck::pass("config_validation", "configuration loaded and validated"),
                DoctorCheck::fail("approval_ladder", "no active approval levels"),
                DoctorCheck::skipped("database_connectivity", "configuration did not load"),
            ],
        };

        let rendered = render_human(&report);
        assert!(rendered.contains("- [ok] config_validation"));
        assert!(rendered.contains("- [fail] approval_ladder: no active approval levels"));
        assert!(rendered.contains("- [skip] database_connectivity: skipped because"));
    }
}
