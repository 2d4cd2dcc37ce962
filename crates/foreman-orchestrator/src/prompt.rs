//! Prompt assembly for the three roles.
//!
//! Every builder reads the run state and never changes it.

use std::fmt::Write as _;

use crate::config::Role;
use crate::run::AgentRun;

/// Literal the orchestrator emits once the objective is satisfied.
pub const COMPLETION_MARKER: &str = "Objective Complete:";

/// Opening of the one-line search request marker.
pub const SEARCH_MARKER_START: &str = "{'search_query': '";

/// Closing of the one-line search request marker.
pub const SEARCH_MARKER_END: &str = "'}";

const SEARCH_INSTRUCTION: &str = "\
Please also generate a JSON object containing a single 'search_query' key, \
which represents a question that, when asked online, would yield important information for solving the subtask. \
The question should be specific and targeted to elicit the most relevant and helpful resources. \
Format it like this, on a single line with no additional text before or after:
{'search_query': '<question>'}
";

const STRUCTURE_INSTRUCTION: &str = "\
Provide a relevant, brief and descriptive name for the project and include it in the final output in the format <project_name>name</project_name>.
If the deliverable consists of files, INCLUDE THE FOLLOWING:
1. Folder Structure: Provide the folder structure as a valid JSON object, where each key represents a folder or file, \
and nested objects represent subfolders. Use null values for files. Make sure all keys are enclosed in double quotes \
and the JSON has no syntax errors. Wrap the JSON object in <folder_structure> tags.
2. File Contents: For each file, wrap its contents in tags like this <file name=\"path/to/file\">contents</file>, \
where the name is the file's path from the root of the folder structure. DO NOT wrap file contents in triple backticks.
";

/// Whether `text` carries the completion marker.
pub fn is_complete(text: &str) -> bool {
    text.contains(COMPLETION_MARKER)
}

/// The question inside the first `{'search_query': '...'}` marker, if any.
pub fn extract_search_query(text: &str) -> Option<String> {
    let start = text.find(SEARCH_MARKER_START)? + SEARCH_MARKER_START.len();
    let rest = &text[start..];
    let end = rest.find(SEARCH_MARKER_END)?;
    let query = rest[..end].trim();
    (!query.is_empty()).then(|| query.to_string())
}

/// Prompt sent when a response was cut off at the output ceiling.
pub fn continuation(previous: &str, original: &str) -> String {
    format!(
        "**PROMPT**\n\nContinuing from the Previous Response and fulfilling the Original Query, \
         please continue the response exactly where it stopped. Do not repeat text that was already written.\n\n\
         **Previous Response:**\n\n{previous}\n\n\
         **Original Query:**\n\n{original}\n"
    )
}

/// Builds the plan, execute and refine prompts for one run.
pub struct PromptAssembler<'a> {
    run: &'a AgentRun,
}

impl<'a> PromptAssembler<'a> {
    /// Reads from `run`.
    pub fn new(run: &'a AgentRun) -> Self {
        Self { run }
    }

    /// Orchestrator prompt for the next task slot of `era`.
    pub fn plan(&self, era: usize) -> String {
        let run = self.run;
        let mut prompt = String::from("**PROMPT**\n\n");

        prompt.push_str("In order to fully, correctly and comprehensively complete the Objective");
        if run.include_files && !run.files.is_empty() {
            prompt.push_str(", using the file content");
        }
        prompt.push_str(", without forgetting anything from the previous results:\n");
        prompt.push_str(self.role_prompt(Role::Orchestrator));
        let _ = write!(
            prompt,
            "\nIf the previous results comprehensively complete all the requirements of the objective, \
             start your response with the phrase '{COMPLETION_MARKER}'. \
             DO NOT INCLUDE THE PHRASE '{COMPLETION_MARKER}' IN YOUR RESPONSE UNTIL THE OBJECTIVE IS FULLY COMPLETED!\n"
        );

        let _ = write!(prompt, "\n**Objective:**\n{}\n\n", run.objective);
        let _ = write!(prompt, "**Results:**\n{}\n\n", self.results_section(era));
        prompt.push_str(
            "IMPORTANT, YOUR JOB IS TO GENERATE A PROMPT FOR A SUBAGENT IF THE OBJECTIVE IS NOT COMPLETE!\n\n",
        );

        if run.include_files {
            for (name, content) in &run.files {
                let _ = write!(prompt, "**File content ({name}):**\n{content}\n\n");
            }
        }

        if run.use_search {
            prompt.push_str(SEARCH_INSTRUCTION);
        }

        prompt
    }

    /// Subagent prompt for task slot `task` of `era`.
    pub fn execute(
        &self,
        plan_response: &str,
        search_results: Option<&str>,
        era: usize,
        task: usize,
    ) -> String {
        let run = self.run;
        let mut prompt = String::from(plan_response);
        prompt.push('\n');

        if let Some(baseline) = run.baseline() {
            let _ = write!(prompt, "\n**Baseline Result**\n{baseline}\n");
        }

        if task > 0 {
            prompt.push_str("\n**Previous Task Results**\n");
            for (idx, result) in run.results(era).iter().enumerate() {
                let _ = writeln!(prompt, "**Task Result {idx}**\n{result}");
            }
        }

        if era == 0 && task == 0 && !run.files.is_empty() {
            prompt.push_str("\n**FILES**\n\n");
            for (name, content) in &run.files {
                let _ = write!(prompt, "**File content ({name})**\n{content}\n\n");
            }
        }

        if let Some(results) = search_results {
            let _ = write!(prompt, "\n**Search Results**\n{results}\n");
        }

        let _ = write!(prompt, "\n{}\n", self.role_prompt(Role::Subagent));
        prompt
    }

    /// Refiner prompt consolidating `era`.
    pub fn refine(&self, era: usize) -> String {
        let run = self.run;
        let mut prompt = format!("**Objective:**\n{}\n\n", run.objective);

        if let Some(baseline) = run.baseline() {
            let _ = write!(prompt, "**Baseline result:**\n{baseline}\n\n");
        }

        let subtasks = run
            .results(era)
            .iter()
            .enumerate()
            .map(|(idx, result)| format!("**Subtask {idx}**\n{result}"))
            .collect::<Vec<_>>()
            .join("\n\n");
        let _ = write!(prompt, "**Results:**\n{subtasks}\n\n");

        prompt.push_str("**PROMPT:**\n\n");
        prompt.push_str(self.role_prompt(Role::Refiner));
        prompt.push('\n');
        prompt.push_str(STRUCTURE_INSTRUCTION);
        prompt
    }

    fn role_prompt(&self, role: Role) -> &str {
        self.run.model.role(role).prompt_for(role)
    }

    fn results_section(&self, era: usize) -> String {
        let mut section = match self.run.baseline() {
            Some(baseline) => format!("**Baseline Results**\n{baseline}\n"),
            None => String::new(),
        };
        for (idx, result) in self.run.results(era).iter().enumerate() {
            let _ = write!(section, "**Subtask {idx} Results**\n{result}\n");
        }
        if section.is_empty() {
            section.push_str("None");
        }
        section
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_REFINER_PROMPT, DEFAULT_SUBAGENT_PROMPT, ModelConfig};

    fn run() -> AgentRun {
        AgentRun::new("demo", "Write a haiku", ModelConfig::new("mock", "mock", "mock"))
            .with_files([("notes.txt".to_string(), "use autumn imagery".to_string())])
    }

    #[test]
    fn test_extract_search_query() {
        let text = "Next subtask...\n{'search_query': 'best haiku structure'}\n";
        assert_eq!(extract_search_query(text).as_deref(), Some("best haiku structure"));
        assert_eq!(extract_search_query("no marker here"), None);
        assert_eq!(extract_search_query("{'search_query': ''}"), None);
        assert_eq!(extract_search_query("{'search_query': 'unterminated"), None);
    }

    #[test]
    fn test_completion_marker_detected_anywhere() {
        assert!(is_complete("Objective Complete: all done"));
        assert!(is_complete("Summary.\nObjective Complete: yes"));
        assert!(!is_complete("objective complete"));
    }

    #[test]
    fn test_plan_prompt_scopes_files_and_search() {
        let mut run = run();
        let without = PromptAssembler::new(&run).plan(0);
        assert!(without.contains(COMPLETION_MARKER));
        assert!(without.contains("Write a haiku"));
        assert!(without.contains("**Results:**\nNone"));
        assert!(!without.contains("use autumn imagery"));
        assert!(!without.contains("search_query"));

        run.include_files = true;
        run.use_search = true;
        let with = PromptAssembler::new(&run).plan(0);
        assert!(with.contains("**File content (notes.txt):**\nuse autumn imagery"));
        assert!(with.contains(SEARCH_MARKER_START));
    }

    #[test]
    fn test_plan_prompt_includes_baseline_and_era_results() {
        let mut run = run();
        run.era_results.push("first draft".to_string());
        run.begin_era(1);
        run.record_subtask(1, "q".to_string(), "second line".to_string());

        let prompt = PromptAssembler::new(&run).plan(1);
        assert!(prompt.contains("**Baseline Results**\nfirst draft"));
        assert!(prompt.contains("**Subtask 0 Results**\nsecond line"));
    }

    #[test]
    fn test_execute_prompt_context_by_slot() {
        let mut run = run();
        run.begin_era(0);

        let first = PromptAssembler::new(&run).execute("Do step one", None, 0, 0);
        assert!(first.starts_with("Do step one"));
        assert!(first.contains("use autumn imagery"));
        assert!(!first.contains("Previous Task Results"));
        assert!(first.trim_end().ends_with(DEFAULT_SUBAGENT_PROMPT));

        run.record_subtask(0, "q".to_string(), "step one output".to_string());
        let second = PromptAssembler::new(&run).execute("Do step two", Some("found it"), 0, 1);
        assert!(!second.contains("use autumn imagery"));
        assert!(second.contains("**Task Result 0**\nstep one output"));
        assert!(second.contains("**Search Results**\nfound it"));
    }

    #[test]
    fn test_execute_prompt_keeps_baseline_with_previous_results() {
        let mut run = run();
        run.era_results.push("era zero".to_string());
        run.begin_era(1);
        run.record_subtask(1, "q".to_string(), "task zero".to_string());

        let prompt = PromptAssembler::new(&run).execute("Next", None, 1, 1);
        assert!(prompt.contains("**Baseline Result**\nera zero"));
        assert!(prompt.contains("**Task Result 0**\ntask zero"));
        assert!(!prompt.contains("use autumn imagery"));
    }

    #[test]
    fn test_refine_prompt_demands_structure() {
        let mut run = run();
        run.begin_era(0);
        run.record_subtask(0, "q".to_string(), "a haiku".to_string());

        let prompt = PromptAssembler::new(&run).refine(0);
        assert!(prompt.starts_with("**Objective:**\nWrite a haiku"));
        assert!(prompt.contains("**Subtask 0**\na haiku"));
        assert!(prompt.contains(DEFAULT_REFINER_PROMPT));
        assert!(prompt.contains("<project_name>"));
        assert!(prompt.contains("<folder_structure>"));
        assert!(prompt.contains("<file name="));
        assert!(!prompt.contains("Baseline"));
    }

    #[test]
    fn test_continuation_prompt_carries_both_texts() {
        let prompt = continuation("partial answ", "original question");
        assert!(prompt.contains("**Previous Response:**\n\npartial answ"));
        assert!(prompt.contains("**Original Query:**\n\noriginal question"));
    }
}
