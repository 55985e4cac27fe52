//! This crate contains acceptance tests running the installed *pointer_taint* binary
//! on the recorded execution traces in the `traces/` directory.

use colored::*;
use std::process::Command;

/// A test case containing the necessary information to run an acceptance test.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub struct TraceTestCase {
    /// The name of the trace file (without extension)
    trace: &'static str,
    /// The name of the *pointer_taint*-check to execute
    check_name: &'static str,
    /// Additional command line arguments
    arguments: &'static [&'static str],
}

impl TraceTestCase {
    /// Create a new test case.
    pub fn new(
        trace: &'static str,
        check_name: &'static str,
        arguments: &'static [&'static str],
    ) -> TraceTestCase {
        TraceTestCase {
            trace,
            check_name,
            arguments,
        }
    }

    /// Get the file path of the trace
    fn get_filepath(&self) -> String {
        format!("traces/{}.json", self.trace)
    }

    /// Run the test case and print to the shell, whether the test case succeeded or not.
    /// Returns stdout + stderr of the test execution on failure.
    pub fn run_test(&self, num_expected_occurences: usize) -> Result<(), String> {
        let filepath = self.get_filepath();
        let output = Command::new("pointer_taint")
            .arg(&filepath)
            .arg("--policy")
            .arg(self.check_name)
            .arg("--quiet")
            .args(self.arguments)
            .output()
            .map_err(|err| format!("Could not execute pointer_taint: {err}"))?;
        if output.status.success() {
            let search_string = format!("[{}]", self.check_name);
            let num_warnings = String::from_utf8_lossy(&output.stdout)
                .lines()
                .filter(|line| line.starts_with(&search_string))
                .count();
            if num_warnings == num_expected_occurences {
                println!("{} \t {}", filepath, "[OK]".green());
                Ok(())
            } else {
                println!("{} \t {}", filepath, "[FAILED]".red());
                Err(format!(
                    "Expected occurrences: {num_expected_occurences}. Found: {num_warnings}"
                ))
            }
        } else {
            println!("{} \t {}", filepath, "[FAILED]".red());
            Err(String::from_utf8_lossy(&output.stdout).to_string()
                + &String::from_utf8_lossy(&output.stderr))
        }
    }
}

/// Print the error messages of failed checks.
/// The `error_log` tuples are of the form `(trace_filename, error_message)`.
pub fn print_errors(error_log: Vec<(String, String)>) {
    for (filepath, error) in error_log {
        println!("{}", format!("+++ Error for {filepath} +++").red());
        println!("{error}");
    }
}

/// Run all test cases, expecting `num_expected_occurences` warnings for each.
/// Panics if any test case fails.
pub fn run_all(test_cases: &[TraceTestCase], num_expected_occurences: usize) {
    let mut error_log = Vec::new();
    for test_case in test_cases {
        if let Err(error) = test_case.run_test(num_expected_occurences) {
            error_log.push((test_case.get_filepath(), error));
        }
    }
    if !error_log.is_empty() {
        print_errors(error_log);
        panic!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore]
    fn address_taint() {
        let test_cases = vec![
            TraceTestCase::new("tainted_pointer", "AddressTaint", &[]),
            TraceTestCase::new(
                "tainted_pointer",
                "AddressTaint",
                &["--func", "main", "--arg-index", "1", "--arg-size", "8"],
            ),
        ];
        run_all(&test_cases, 1);

        let test_cases = vec![
            TraceTestCase::new("bounds_check_bypass", "AddressTaint", &[]),
            TraceTestCase::new("tainted_pointer", "AddressTaint", &["--arg-index", "0"]),
        ];
        run_all(&test_cases, 0);
    }

    #[test]
    #[ignore]
    fn index_sentinel() {
        let test_cases = vec![
            TraceTestCase::new(
                "bounds_check_bypass",
                "IndexSentinel",
                &["--arg-index", "1", "--arg-size", "8"],
            ),
            TraceTestCase::new(
                "bounds_check_bypass",
                "IndexSentinel",
                &["--arg-index", "1", "--arg-size", "8", "--sentinel-tag", "5"],
            ),
        ];
        run_all(&test_cases, 1);

        let test_cases = vec![
            TraceTestCase::new("tainted_pointer", "IndexSentinel", &[]),
            // The index gets loaded from the buffer of the second argument.
            TraceTestCase::new(
                "bounds_check_bypass",
                "IndexSentinel",
                &["--arg-index", "0", "--arg-size", "8"],
            ),
        ];
        run_all(&test_cases, 0);
    }

    #[test]
    #[ignore]
    fn invalid_configuration() {
        let output = Command::new("pointer_taint")
            .arg("traces/tainted_pointer.json")
            .arg("--arg-index")
            .arg("0")
            .arg("--arg-index")
            .arg("1")
            .output()
            .unwrap();
        if output.status.success() {
            println!("{} \t {}", "invalid_configuration", "[FAILED]".red());
            panic!("Mismatched argument lists were accepted.");
        }
        println!("{} \t {}", "invalid_configuration", "[OK]".green());
    }

    #[test]
    #[ignore]
    fn json_output() {
        let output = Command::new("pointer_taint")
            .arg("traces/tainted_pointer.json")
            .arg("--json")
            .arg("--quiet")
            .output()
            .unwrap();
        let stdout = String::from_utf8(output.stdout).unwrap();
        if output.status.success() && stdout.trim_start().starts_with('[') && stdout.contains("\"rbx\"")
        {
            println!("{} \t {}", "json_output", "[OK]".green());
        } else {
            println!("{} \t {}", "json_output", "[FAILED]".red());
            panic!("{}", stdout);
        }
    }
}
