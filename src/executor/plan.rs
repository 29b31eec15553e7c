//! Extraction of numbered steps from free-form plan text.

use std::sync::LazyLock;

use regex::Regex;

/// A step line: optional bullet / heading / bold markers, then `N.`, `N)` or `N:`.
static STEP_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[-*+>]\s+|#{1,6}\s+)?(?:\*\*|__)?\d+(?:\*\*|__)?[.):](?:[^\d]|$)")
        .unwrap()
});

/// Return the numbered steps of `plan`, in order, trimmed.
///
/// Headings, commentary and blank lines are ignored. Text that only mentions a
/// number mid-sentence, or starts with a year or decimal (`2024 was...`,
/// `3.5 hours`), is not a step.
pub fn parse_plan_steps(plan: &str) -> Vec<String> {
    plan.lines()
        .map(str::trim)
        .filter(|line| STEP_LINE.is_match(line))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_numbered_list() {
        let steps = parse_plan_steps("1. Read the file\n2. Fetch the URL\n3. Summarize");
        assert_eq!(steps, vec!["1. Read the file", "2. Fetch the URL", "3. Summarize"]);
    }

    #[test]
    fn ignores_commentary_around_steps() {
        let plan = "Here is my plan for the task:\n\
                    \n\
                    1. Use `read_file` to read url_to_fetch.txt.\n\
                    2) Use `fetch` on the URL.\n\
                    \n\
                    This should take 2 steps. Let me know if you approve.\n";
        let steps = parse_plan_steps(plan);
        assert_eq!(
            steps,
            vec![
                "1. Use `read_file` to read url_to_fetch.txt.",
                "2) Use `fetch` on the URL."
            ]
        );
    }

    #[test]
    fn markdown_decorations_are_allowed() {
        let plan = "## Plan\n\
                    - 1. first\n\
                    **2.** second\n\
                    ### 3: third\n\
                    \t  4. indented\n";
        assert_eq!(parse_plan_steps(plan).len(), 4);
    }

    #[test]
    fn leading_numbers_that_are_not_steps() {
        let plan = "2024 was a good year.\n3.5 hours remain.\n10 files found.\n";
        assert!(parse_plan_steps(plan).is_empty());
    }

    #[test]
    fn numbering_without_space_after_marker() {
        let steps = parse_plan_steps("1.Read the file\n2)Fetch the URL\n3:Summarize\n4.5 is not a step");
        assert_eq!(steps, vec!["1.Read the file", "2)Fetch the URL", "3:Summarize"]);
    }

    #[test]
    fn no_steps_in_empty_or_prose_plan() {
        assert!(parse_plan_steps("").is_empty());
        assert!(parse_plan_steps("Just answer the question directly.").is_empty());
    }

    #[test]
    fn multi_digit_step_numbers() {
        let plan = (1..=12).map(|i| format!("{}. step {}", i, i)).collect::<Vec<_>>().join("\n");
        let steps = parse_plan_steps(&plan);
        assert_eq!(steps.len(), 12);
        assert_eq!(steps[11], "12. step 12");
    }
}
