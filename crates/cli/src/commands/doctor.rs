use quoteflow_core::config::{AppConfig, LoadOptions};
use quoteflow_db::{connect_with_config, migrations::MIGRATOR, DbPool};
use serde::Serialize;

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
    fn skipped(name: &'static str, because: &str) -> Self {
        Self { name, status: CheckStatus::Skipped, details: format!("skipped because {because}") }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_pdf_template(&config));
            checks.extend(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            let because = "configuration did not load";
            checks.push(DoctorCheck::skipped("pdf_template", because));
            checks.push(DoctorCheck::skipped("database_connectivity", because));
            checks.push(DoctorCheck::skipped("schema_migrations", because));
        }
    }

    // Skipped checks are informational and do not fail an otherwise healthy run.
    let any_fail = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let overall_status = if any_fail { CheckStatus::Fail } else { CheckStatus::Pass };
    let summary = if any_fail {
        "doctor: one or more readiness checks failed".to_string()
    } else {
        "doctor: all readiness checks passed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_pdf_template(config: &AppConfig) -> DoctorCheck {
    const NAME: &str = "pdf_template";
    if !config.pdf.enabled {
        return DoctorCheck::skipped(NAME, "pdf snapshots are disabled");
    }
    match &config.pdf.template {
        None => DoctorCheck {
            name: NAME,
            status: CheckStatus::Pass,
            details: "using the built-in quote template".to_string(),
        },
        Some(path) => match std::fs::metadata(path) {
            Ok(metadata) if metadata.is_file() => DoctorCheck {
                name: NAME,
                status: CheckStatus::Pass,
                details: format!("custom template `{}` is readable", path.display()),
            },
            Ok(_) => DoctorCheck {
                name: NAME,
                status: CheckStatus::Fail,
                details: format!("`{}` is not a file", path.display()),
            },
            Err(error) => DoctorCheck {
                name: NAME,
                status: CheckStatus::Fail,
                details: format!("cannot read `{}`: {error}", path.display()),
            },
        },
    }
}

fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![
                DoctorCheck {
                    name: "database_connectivity",
                    status: CheckStatus::Fail,
                    details: format!("failed to initialize async runtime: {error}"),
                },
                DoctorCheck::skipped("schema_migrations", "no async runtime"),
            ];
        }
    };

    runtime.block_on(async {
        let pool = match connect_with_config(&config.database).await {
            Ok(pool) => pool,
            Err(error) => {
                return vec![
                    DoctorCheck {
                        name: "database_connectivity",
                        status: CheckStatus::Fail,
                        details: format!("failed to connect to database: {error}"),
                    },
                    DoctorCheck::skipped("schema_migrations", "the database is unreachable"),
                ];
            }
        };

        let checks = vec![
            DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Pass,
                details: format!("connected using `{}`", config.database.url),
            },
            check_schema(&pool).await,
        ];
        pool.close().await;
        checks
    })
}

/// Compares applied migrations with the ones embedded in this binary.
async fn check_schema(pool: &DbPool) -> DoctorCheck {
    const NAME: &str = "schema_migrations";
    let expected = MIGRATOR.iter().filter(|migration| migration.migration_type.is_up_migration());
    let expected: Vec<i64> = expected.map(|migration| migration.version).collect();

    let applied = sqlx::query_scalar::<_, i64>(
        "SELECT version FROM _sqlx_migrations WHERE success = 1 ORDER BY version",
    )
    .fetch_all(pool)
    .await
    .unwrap_or_default();

    let pending: Vec<String> = expected
        .iter()
        .filter(|version| !applied.contains(version))
        .map(|version| version.to_string())
        .collect();

    if pending.is_empty() {
        DoctorCheck {
            name: NAME,
            status: CheckStatus::Pass,
            details: format!("{} migration(s) applied", applied.len()),
        }
    } else {
        DoctorCheck {
            name: NAME,
            status: CheckStatus::Fail,
            details: format!(
                "pending migration(s): {}; run `quoteflow migrate`",
                pending.join(", ")
            ),
        }
    }
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
