use anyhow::Result;
use colored::Colorize;
use std::io::Write;
use std::time::Duration;

use super::ScenarioResult;

pub fn generate_console_report(
    out: &mut dyn Write,
    results: &[ScenarioResult],
    total_duration: Duration,
) -> Result<()> {
    writeln!(out)?;
    writeln!(out, "{}", "📊 Randomizer Check Summary".bright_cyan().bold())?;
    writeln!(out, "{}", "===========================".cyan())?;

    let total = results.len();
    let passed = results.iter().filter(|r| r.passed).count();
    let failed = total - passed;
    let checks: usize = results.iter().map(|r| r.checks_run).sum();

    writeln!(out, "Total scenarios: {total}")?;
    writeln!(out, "Passed: {}", passed.to_string().green())?;
    writeln!(out, "Failed: {}", failed.to_string().red())?;
    writeln!(out, "Checks run: {checks}")?;
    if total > 0 {
        #[allow(clippy::cast_precision_loss)]
        let success_rate = (passed as f64 / total as f64) * 100.0;
        writeln!(out, "Success rate: {success_rate:.1}%")?;
    }
    writeln!(out, "Total time: {total_duration:?}")?;
    writeln!(out)?;

    for result in results {
        let status = if result.passed {
            "✅ PASS".green()
        } else {
            "❌ FAIL".red()
        };
        writeln!(
            out,
            "{} {} (seed {:?})",
            status,
            result.scenario_name.bold(),
            result.seed
        )?;
        writeln!(out, "   Checks: {}", result.checks_run)?;
        writeln!(out, "   Time: {:?}", result.duration)?;
        if !result.failures.is_empty() {
            writeln!(out, "   Failures:")?;
            for failure in &result.failures {
                writeln!(out, "     • {}", failure.red())?;
            }
        }
        writeln!(out)?;
    }

    if let Some(slowest) = results.iter().max_by_key(|r| r.duration) {
        writeln!(
            out,
            "Slowest: {} seed {:?} ({:?})",
            slowest.scenario_name.yellow(),
            slowest.seed,
            slowest.duration
        )?;
    }
    Ok(())
}

pub fn generate_json_report(out: &mut dyn Write, results: &[ScenarioResult]) -> Result<()> {
    let json_output = serde_json::to_string_pretty(results)?;
    writeln!(out, "{json_output}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(passed: bool) -> ScenarioResult {
        let failures = if passed {
            Vec::new()
        } else {
            vec!["slot 4 holds a level 3 encounter over its cap of 2".to_string()]
        };
        ScenarioResult::new("offline", "abc", 6, failures, Duration::from_millis(3))
    }

    #[test]
    fn console_report_lists_failures() {
        let mut buffer = Vec::new();
        generate_console_report(&mut buffer, &[sample(true), sample(false)], Duration::ZERO)
            .unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("Total scenarios: 2"));
        assert!(text.contains("Checks run: 12"));
        assert!(text.contains("over its cap of 2"));
    }

    #[test]
    fn console_report_handles_no_results() {
        let mut buffer = Vec::new();
        generate_console_report(&mut buffer, &[], Duration::ZERO).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("Total scenarios: 0"));
        assert!(!text.contains("Success rate"));
    }

    #[test]
    fn json_report_is_an_array() {
        let mut buffer = Vec::new();
        generate_json_report(&mut buffer, &[sample(true)]).unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&buffer).unwrap();
        assert_eq!(parsed[0]["scenario_name"], "offline");
        assert_eq!(parsed[0]["passed"], true);
    }
}
