use serde::Serialize;

/// Warning every configuration produced by fuel-ignition carries.
pub const UNUSED_HUMAN_READABLE_KEY: &str = "warning at*Unused key human_read";

/// Drops every line whose trimmed text matches `benign`, then trims the rest.
pub fn filter_validation_response(response: &str, benign: &glob::Pattern) -> String {
    response
        .split('\n')
        .filter(|line| !benign.matches(line.trim()))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub text: String,
}

impl ValidationOutcome {
    pub fn from_response(response: &str, benign: &glob::Pattern) -> Self {
        let text = filter_validation_response(response, benign);
        ValidationOutcome {
            valid: text.is_empty(),
            text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn benign() -> glob::Pattern {
        glob::Pattern::new(UNUSED_HUMAN_READABLE_KEY).unwrap()
    }

    const WARNING: &str =
        "warning at $.storage.files.0, line 1 col 412: Unused key human_read";

    #[test]
    fn only_the_benign_warning_means_valid() {
        let outcome = ValidationOutcome::from_response(&format!("{}\n", WARNING), &benign());
        assert_eq!(
            outcome,
            ValidationOutcome {
                valid: true,
                text: String::new()
            }
        );
    }

    #[test]
    fn other_diagnostics_are_kept() {
        let response = format!(
            "  {}\nerror at $.systemd.units.0, line 1 col 900: unit \"join_swarm.service\" is invalid\n{}\n",
            WARNING, WARNING
        );
        let outcome = ValidationOutcome::from_response(&response, &benign());
        assert!(!outcome.valid);
        assert_eq!(
            outcome.text,
            "error at $.systemd.units.0, line 1 col 900: unit \"join_swarm.service\" is invalid"
        );
    }

    #[test]
    fn empty_response_is_valid() {
        assert!(ValidationOutcome::from_response("", &benign()).valid);
        assert!(ValidationOutcome::from_response("\n \n", &benign()).valid);
    }

    #[test]
    fn filtering_is_idempotent() {
        let inputs = [
            String::new(),
            WARNING.to_string(),
            format!("\n  leading\n{}\ntrailing  \n\n", WARNING),
            "a\n\n b \n".to_string(),
            format!("{}\r\nwarning at $.x: Unused key other\n", WARNING),
        ];
        for input in inputs {
            let once = filter_validation_response(&input, &benign());
            assert_eq!(filter_validation_response(&once, &benign()), once, "{:?}", input);
        }
    }
}
