//! Result table and CSV export.

use std::fmt::Write as _;
use std::io::Write as _;
use std::path::Path;

use loadgen_common::{LoadError, Result};
use loadgen_core::StepResult;
use time::macros::format_description;
use time::OffsetDateTime;

const CSV_HEADER: &str = "users,model,gpu,avg_latency,avg_ttft,max_latency,min_latency,error_rate,cpu_percent,memory_percent,total_requests,successful_requests,failed_requests,test_duration,recommendation";

pub fn render_table(results: &[StepResult]) -> String {
    if results.is_empty() {
        return "No results to show.".to_string();
    }
    let mut out = String::new();
    let rule = "=".repeat(140);
    let _ = writeln!(out, "{}\nLOAD TEST RESULTS\n{}", rule, rule);
    let _ = writeln!(
        out,
        "{:<8} {:<15} {:<12} {:<10} {:<8} {:<10} {:<10} {:<10} {:<8} {:<10} {:<10} {}",
        "Users", "Model", "GPU", "Avg (s)", "TTFT", "Max (s)", "Min (s)", "Errors %", "CPU %", "Memory %", "Requests", "Recommendation"
    );
    let _ = writeln!(out, "{}", "-".repeat(140));
    let mut any_aborted = false;
    for r in results {
        let users = if r.aborted_early {
            any_aborted = true;
            format!("{}*", r.users)
        } else {
            r.users.to_string()
        };
        let _ = writeln!(
            out,
            "{:<8} {:<15} {:<12} {:<10.2} {:<8.2} {:<10.2} {:<10.2} {:<10.1} {:<8.1} {:<10.1} {:<10} {} {}",
            users,
            r.model,
            r.gpu,
            r.avg_latency,
            r.avg_ttft,
            r.max_latency,
            r.min_latency,
            r.error_rate,
            r.cpu_percent,
            r.memory_percent,
            r.total_requests,
            r.recommendation.marker(),
            r.recommendation
        );
    }
    let _ = write!(out, "{}", "-".repeat(140));
    if any_aborted {
        let _ = write!(out, "\n* step aborted early because of a high error rate");
    }
    out
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub fn csv_row(r: &StepResult) -> String {
    format!(
        "{},{},{},{:.3},{:.3},{:.3},{:.3},{:.2},{:.2},{:.2},{},{},{},{:.1},{}",
        r.users,
        csv_field(&r.model),
        csv_field(&r.gpu),
        r.avg_latency,
        r.avg_ttft,
        r.max_latency,
        r.min_latency,
        r.error_rate,
        r.cpu_percent,
        r.memory_percent,
        r.total_requests,
        r.successful_requests,
        r.failed_requests,
        r.duration_secs,
        csv_field(r.recommendation.label())
    )
}

pub fn write_csv(results: &[StepResult], path: &Path) -> Result<()> {
    let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
    writeln!(file, "{}", CSV_HEADER)?;
    for r in results {
        writeln!(file, "{}", csv_row(r))?;
    }
    file.flush()?;
    Ok(())
}

pub fn local_now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

/// `ollama_load_test_<models>_<YYYYmmdd_HHMMSS>.csv`, model names made
/// filename-safe and capped at 50 characters.
pub fn default_output_name(models: &[String], at: OffsetDateTime) -> Result<String> {
    let cleaned: Vec<String> = models.iter().map(|m| m.replace(['/', ':'], "_")).collect();
    let joined: String = cleaned.join("_").chars().take(50).collect();
    let stamp = at
        .format(&format_description!("[year][month][day]_[hour][minute][second]"))
        .map_err(|e| LoadError::Message(format!("timestamp: {}", e)))?;
    Ok(format!("ollama_load_test_{}_{}.csv", joined, stamp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use loadgen_core::Recommendation;
    use time::macros::datetime;

    fn result(users: usize, aborted: bool) -> StepResult {
        StepResult {
            users,
            model: "llama3:8b".into(),
            gpu: "RTX 4090".into(),
            avg_latency: 1.23456,
            min_latency: 0.5,
            max_latency: 2.0,
            avg_ttft: 0.2,
            error_rate: 0.0,
            total_requests: 40,
            successful_requests: 40,
            failed_requests: 0,
            cpu_percent: 12.5,
            memory_percent: 55.0,
            duration_secs: 300.04,
            recommendation: Recommendation::Optimal,
            aborted_early: aborted,
        }
    }

    #[test]
    fn csv_has_header_and_one_row_per_result() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        write_csv(&[result(5, false), result(10, true)], &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], CSV_HEADER);
        assert_eq!(lines[1], "5,llama3:8b,RTX 4090,1.235,0.200,2.000,0.500,0.00,12.50,55.00,40,40,0,300.0,Optimal");
        assert!(lines[2].starts_with("10,"));
    }

    #[test]
    fn csv_quotes_fields_with_commas() {
        let mut r = result(5, false);
        r.gpu = "A100, 80GB".into();
        assert!(csv_row(&r).contains(",\"A100, 80GB\","));
    }

    #[test]
    fn default_name_sanitizes_models() {
        let at = datetime!(2024-03-05 14:07:09 UTC);
        let name = default_output_name(&["library/llama3:8b".into(), "mistral".into()], at).unwrap();
        assert_eq!(name, "ollama_load_test_library_llama3_8b_mistral_20240305_140709.csv");

        let long = vec!["m".repeat(80)];
        let name = default_output_name(&long, at).unwrap();
        assert_eq!(name, format!("ollama_load_test_{}_20240305_140709.csv", "m".repeat(50)));
    }

    #[test]
    fn table_marks_aborted_steps() {
        let table = render_table(&[result(5, false), result(10, true)]);
        assert!(table.contains("LOAD TEST RESULTS"));
        assert!(table.contains("10*"));
        assert!(table.contains("✅ Optimal"));
        assert!(table.contains("aborted early"));
        assert_eq!(render_table(&[]), "No results to show.");
    }
}
