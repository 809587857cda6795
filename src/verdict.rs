use lazy_regex::regex_captures;

// https://rspamd.com/doc/faq.html#what-are-rspamd-actions
pub const COMMON_ACTIONS: [&str; 7] = [
    "discard",
    "reject",
    "greylist",
    "rewrite subject",
    "add header",
    "no action",
    "soft reject",
];

/// Result of classifying one message.
///
/// The action label is kept exactly as rspamc printed it; the set of labels
/// is owned by the rspamd configuration, not by us.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub action: String,
    pub score: Option<f64>,
    pub required_score: Option<f64>,
}

impl Verdict {
    pub fn new(action: impl Into<String>) -> Self {
        Verdict {
            action: action.into(),
            score: None,
            required_score: None,
        }
    }

    /// Parse the plain text report of `rspamc`, e.g.
    ///
    /// ```text
    /// Results for file: stdin (0.104 seconds)
    /// [Metric: default]
    /// Action: add header
    /// Spam: true
    /// Score: 7.42 / 15.00
    /// ```
    ///
    /// Returns `None` if the report carries no `Action:` line.
    pub fn parse(output: &str) -> Option<Verdict> {
        let (_, action) = regex_captures!(r"(?m)^Action:[ \t]*([^\r\n]*)", output)?;
        let action = action.trim();
        if action.is_empty() {
            return None;
        }
        let mut verdict = Verdict::new(action);
        if let Some((_, score, required)) = regex_captures!(
            r"(?m)^Score:[ \t]*(-?[0-9]+(?:\.[0-9]+)?)[ \t]*/[ \t]*(-?[0-9]+(?:\.[0-9]+)?)",
            output
        ) {
            verdict.score = score.parse().ok();
            verdict.required_score = required.parse().ok();
        }
        Some(verdict)
    }
}

#[test]
fn test_parse_full_report() {
    let output = "Results for file: stdin (0.104 seconds)\n\
                  [Metric: default]\n\
                  Action: add header\n\
                  Spam: true\n\
                  Score: 7.42 / 15.00\n\
                  Symbol: BAYES_SPAM (5.10)\n";
    let verdict = Verdict::parse(output).unwrap();
    assert_eq!(verdict.action, "add header");
    assert_eq!(verdict.score, Some(7.42));
    assert_eq!(verdict.required_score, Some(15.0));
}

#[test]
fn test_parse_crlf_and_negative_score() {
    let verdict = Verdict::parse("Action: no action\r\nScore: -1.50 / 15.00\r\n").unwrap();
    assert_eq!(verdict.action, "no action");
    assert_eq!(verdict.score, Some(-1.5));
}

#[test]
fn test_parse_without_score() {
    let verdict = Verdict::parse("Action: reject\n").unwrap();
    assert_eq!(verdict, Verdict::new("reject"));
}

#[test]
fn test_parse_first_action_wins() {
    let verdict = Verdict::parse("Action: greylist\nAction: reject\n").unwrap();
    assert_eq!(verdict.action, "greylist");
}

#[test]
fn test_parse_no_action() {
    assert_eq!(Verdict::parse(""), None);
    assert_eq!(Verdict::parse("Error: cannot connect to rspamd\n"), None);
    assert_eq!(Verdict::parse("Action:   \n"), None);
    // only at line start
    assert_eq!(Verdict::parse("Symbol: X (Action: reject)\n"), None);
}
