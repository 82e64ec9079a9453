//! Spec folder conventions and `tasks.md` parsing.

use std::sync::LazyLock;

use regex::Regex;

/// Documents every spec folder must contain before code generation runs.
pub const REQUIRED_SPEC_DOCUMENTS: [&str; 3] = ["requirements.md", "design.md", "tasks.md"];

/// File listing the implementation tasks of a spec.
pub const TASKS_FILE: &str = "tasks.md";

/// `- [ ] 2.1 Title`: unchecked, numbered, not marked optional (`- [ ]*`).
static PENDING_TASK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*[-*]\s+\[ \]\s+(?:\*\*)?(?P<id>\d+(?:\.\d+)*)\.?(?:\*\*)?\s").expect("valid regex")
});

/// Return the id of the first unchecked task in a `tasks.md` document.
pub fn next_pending_task(tasks_markdown: &str) -> Option<String> {
    tasks_markdown
        .lines()
        .find_map(|line| PENDING_TASK_RE.captures(line))
        .map(|caps| caps["id"].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_first_unchecked_task() {
        let md = "\
# Implementation Plan

- [x] 1. Set up project
- [x] 1.1 Add config
- [ ] 1.2 Write lock manager
- [ ] 2. Poller
";
        assert_eq!(next_pending_task(md).as_deref(), Some("1.2"));
    }

    #[test]
    fn skips_optional_and_in_progress_tasks() {
        let md = "- [-] 1. Running\n- [ ]* 2. Optional docs\n- [ ] 3. Real work\n";
        assert_eq!(next_pending_task(md).as_deref(), Some("3"));
    }

    #[test]
    fn accepts_bold_ids() {
        assert_eq!(next_pending_task("- [ ] **4.1** Tests\n").as_deref(), Some("4.1"));
    }

    #[test]
    fn none_when_everything_done() {
        assert_eq!(next_pending_task("- [x] 1. Done\n- [x] 2. Done\n"), None);
        assert_eq!(next_pending_task(""), None);
    }
}
