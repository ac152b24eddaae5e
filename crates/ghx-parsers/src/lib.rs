//! Five pure functions (§4.B) that turn unstructured diagnostic-tool
//! stdout into scalar verdicts. These are the trickiest part of the
//! orchestrator and are reimplemented line-accurately against the
//! reference behavior, boundary cases included.

const IB_SENTINEL: &str = "通过模块: 10/10";
const P2P_MATRIX_BEGIN: &str = "Bidirectional P2P=Enabled Bandwidth Matrix";
const P2P_MATRIX_END: &str = "P2P=Disabled Latency Matrix";
const NCCL_SENTINEL: &str = "Avg bus bandwidth";

/// Minimum accepted `nvbandwidth` value, GB/s.
pub const NVBANDWIDTH_MIN: f64 = 10.0;
/// Maximum accepted `nvbandwidth` value, GB/s.
pub const NVBANDWIDTH_MAX: f64 = 1200.0;

/// Extract the minimum accepted bandwidth value from `nvbandwidth`
/// stdout.
///
/// Only lines whose first non-whitespace character is a decimal digit
/// are considered. Tokens from the second one onward (the first is a row
/// index) are parsed as floats; a token that fails to parse stops the
/// scan of that line, but an in-range token does not stop it. Returns
/// the minimum of all accepted `[10, 1200]` values, or `0` if none.
#[must_use]
pub fn parse_nvbandwidth(output: &str) -> f64 {
    let mut values: Vec<f64> = Vec::new();
    for line in output.lines() {
        let starts_with_digit = line
            .trim_start()
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_digit());
        if !starts_with_digit {
            continue;
        }
        for token in line.split_whitespace().skip(1) {
            match token.parse::<f64>() {
                Ok(v) if v.is_finite() && (NVBANDWIDTH_MIN..=NVBANDWIDTH_MAX).contains(&v) => {
                    values.push(v);
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
    }
    min_or_zero(&values)
}

/// Scan `p2pBandwidthLatencyTest` stdout for the bidirectional matrix and
/// return the minimum strictly-positive, off-diagonal value.
///
/// The parser has two states: idle (not yet inside the matrix) and
/// collecting. It enters collecting on the first line containing the
/// matrix-begin literal and leaves it (terminally) on a line containing
/// the matrix-end literal. While collecting, blank lines and the column
/// header row (non-numeric first token) are ignored; every other row's
/// first token is discarded as a label and its 0-based position among
/// accepted data rows (not its literal value) is the row index, with
/// the rest of the line's tokens as column values and diagonal entries
/// (`row == column`) skipped.
#[must_use]
pub fn parse_p2p(output: &str) -> f64 {
    #[derive(PartialEq)]
    enum State {
        Idle,
        Collecting,
    }

    let mut state = State::Idle;
    let mut values: Vec<f64> = Vec::new();
    let mut row_count: i64 = 0;

    for line in output.lines() {
        if line.contains(P2P_MATRIX_BEGIN) {
            state = State::Collecting;
            row_count = 0;
            continue;
        }
        if line.contains(P2P_MATRIX_END) {
            state = State::Idle;
            continue;
        }
        if state != State::Collecting {
            continue;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let mut tokens = trimmed.split_whitespace();
        let Some(label) = tokens.next() else { continue };
        if !label.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        let row = row_count;
        row_count += 1;
        for (col, token) in tokens.enumerate() {
            let col = col as i64;
            if let Ok(v) = token.parse::<f64>() {
                if row != col && v > 0.0 {
                    values.push(v);
                }
            }
        }
    }

    min_or_zero(&values)
}

/// Minimum of `values`, or `0.0` if empty.
fn min_or_zero(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().copied().fold(f64::INFINITY, f64::min)
    }
}

/// Find the first line containing `"Avg bus bandwidth"` and return the
/// first whitespace-separated token on it that parses as a float, or `0`
/// if the sentinel is absent or no token on that line parses.
#[must_use]
pub fn parse_nccl(output: &str) -> f64 {
    for line in output.lines() {
        if line.contains(NCCL_SENTINEL) {
            return line
                .split_whitespace()
                .find_map(|token| token.parse::<f64>().ok())
                .unwrap_or(0.0);
        }
    }
    0.0
}

/// `dcgmi diag` passes iff the process exit code is `0`.
#[must_use]
pub const fn parse_dcgm(exit_code: i32) -> bool {
    exit_code == 0
}

/// The IB health script passes iff the sentinel literal appears anywhere
/// in the combined stdout+stderr, regardless of exit code: the script
/// can return nonzero on advisory warnings and the literal dominates.
/// `exit_code` is accepted for symmetry with the other parsers and call
/// sites that log it, but deliberately does not affect the verdict.
#[must_use]
pub fn parse_ib(combined_output: &str, _exit_code: i32) -> bool {
    combined_output.contains(IB_SENTINEL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prop_assert;
    use test_case::test_case;

    #[test]
    fn nvbandwidth_reports_minimum_of_accepted_values() {
        let output = "memcpy CE GPU0 GPU1\n0  55.2  56.0\n1  57.9  54.8\n";
        assert_eq!(parse_nvbandwidth(output), 54.8);
    }

    #[test]
    fn nvbandwidth_ignores_non_digit_leading_lines() {
        let output = "SUM CUDA ERROR\n0  55.2  56.0\n";
        assert_eq!(parse_nvbandwidth(output), 55.2);
    }

    #[test]
    fn nvbandwidth_stops_line_scan_on_unparseable_token() {
        let output = "0  55.2  N/A  12.0\n";
        // 12.0 comes after the unparseable token and must not be counted.
        assert_eq!(parse_nvbandwidth(output), 55.2);
    }

    #[test]
    fn nvbandwidth_rejects_out_of_range_values() {
        let output = "0  5.0  2000.0  60.0\n";
        assert_eq!(parse_nvbandwidth(output), 60.0);
    }

    #[test]
    fn nvbandwidth_empty_output_is_zero() {
        assert_eq!(parse_nvbandwidth(""), 0.0);
    }

    proptest::proptest! {
        #[test]
        fn nvbandwidth_result_is_always_in_range_or_zero(blob in ".{0,256}") {
            let v = parse_nvbandwidth(&blob);
            prop_assert!(v == 0.0 || (NVBANDWIDTH_MIN..=NVBANDWIDTH_MAX).contains(&v));
        }
    }

    #[test]
    fn p2p_collects_off_diagonal_minimum() {
        let output = "\
Bidirectional P2P=Enabled Bandwidth Matrix (GB/s)
   D\\D     0      1
     0  780.0  720.0
     1  725.0  781.0
P2P=Disabled Latency Matrix (us)
";
        assert_eq!(parse_p2p(output), 720.0);
    }

    #[test]
    fn p2p_without_terminal_line_still_returns_minimum() {
        let output = "\
Bidirectional P2P=Enabled Bandwidth Matrix (GB/s)
   D\\D     0      1
     0  780.0  720.0
     1  725.0  781.0
";
        assert_eq!(parse_p2p(output), 720.0);
    }

    #[test]
    fn p2p_ignores_blank_lines_and_diagonal() {
        let output = "\
Bidirectional P2P=Enabled Bandwidth Matrix (GB/s)

     0  780.0  720.0
     1  725.0  781.0
";
        assert_eq!(parse_p2p(output), 720.0);
    }

    #[test]
    fn p2p_no_matrix_begin_yields_zero() {
        assert_eq!(parse_p2p("nothing relevant here\n"), 0.0);
    }

    #[test]
    fn nccl_extracts_first_token_on_sentinel_line() {
        let output = "# Avg bus bandwidth : 145.3 GB/s\n";
        assert_eq!(parse_nccl(output), 145.3);
    }

    #[test_case("no sentinel here\n", 0.0; "missing sentinel returns zero")]
    #[test_case("Avg bus bandwidth : not_a_number\n", 0.0; "no parseable token on sentinel line")]
    fn nccl_boundary_cases(output: &str, expected: f64) {
        assert_eq!(parse_nccl(output), expected);
    }

    #[test]
    fn dcgm_passes_only_on_zero_exit() {
        assert!(parse_dcgm(0));
        assert!(!parse_dcgm(1));
    }

    #[test]
    fn ib_literal_dominates_nonzero_exit_code() {
        // S4: exits 2 but the sentinel is present.
        assert!(parse_ib("...\n通过模块: 10/10\n", 2));
    }

    #[test]
    fn ib_fails_without_literal_even_on_zero_exit() {
        assert!(!parse_ib("all good, nothing to report\n", 0));
    }
}
