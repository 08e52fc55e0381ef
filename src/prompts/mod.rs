//! Prompts for each agent call of the course pipeline.
//!
//! Transcripts are always referenced by path, never inlined: the agent runs
//! inside the course directory and reads what it needs. Every prompt names
//! the exact files the agent is expected to write so the pipeline can look
//! at the filesystem instead of trusting the reply text.
//!
//! - [`build_discovery_prompt`] - plan the course into sub-tasks
//! - [`build_architecture_prompt`] - outline a large sub-task before chunking
//! - [`build_generation_prompt`] - generate a sub-task in one call
//! - [`build_chunk_prompt`] - generate one window of a large sub-task

use std::fmt::Write as _;

use crate::chunking::Chunk;
use crate::course::{Course, OUTPUT_DIR, STATE_DIR};
use crate::pipeline::{ArchitectureSpec, ManifestItem};

const DISCOVERY_TEMPLATE: &str = r#"You are planning study material for the course "{course_name}".

The course directory is your working directory. It contains {transcript_count} transcript files{subgroup_note}:

{transcripts}

Read the transcripts you need and split the course into self-contained sub-tasks (for example one per module or topic). Each sub-task lists the transcripts it draws from.

Write your plan as JSON to `{manifest_path}` with exactly this shape:

{
  "has_work": true,
  "items": [
    {"id": "module-1", "sourceRefs": ["01 - intro.srt"], "sizeClass": "small", "status": "not_started"}
  ],
  "skipped": ["transcripts that carry no teachable content"],
  "reason": null
}

If nothing in the course is worth turning into material, write `"has_work": false`, an empty `items` list and a short `reason`.

Reply with the same JSON when you are done."#;

const ARCHITECTURE_TEMPLATE: &str = r#"You are preparing to write material for the sub-task "{subtask_id}" of the course "{course_name}".

The sub-task covers {transcript_count} transcripts, too many to handle in one pass. Material will be written in several passes, each seeing only a window of transcripts. Before that, skim all of them and produce an architecture every pass will follow:

{transcripts}

Write it as JSON to `{architecture_path}`:

{
  "summary": "one paragraph on what the sub-task teaches",
  "outline": ["ordered section titles"],
  "files": [{"path": "output/{subtask_id}/01-basics.md", "purpose": "what goes in it"}],
  "conventions": ["naming, formatting and tone rules all passes share"]
}

Do not write any course material yet. Reply with the same JSON."#;

const GENERATION_TEMPLATE: &str = r#"You are writing study material for the sub-task "{subtask_id}" of the course "{course_name}".

Source transcripts (paths relative to your working directory):

{transcripts}

Read them and write the material as files under `{output_dir}/`. Keep the material faithful to the transcripts; do not invent topics they do not cover.

When you are done, reply with the list of files you wrote, one path per line."#;

const CHUNK_TEMPLATE: &str = r#"You are writing study material for the sub-task "{subtask_id}" of the course "{course_name}". This is pass {chunk_number} of {chunk_total}.

## Architecture

{architecture}

## Already written

{produced_files}

## Context from the previous pass

{overlap}

## Transcripts for this pass

{transcripts}

Read the transcripts for this pass and extend the material under `{output_dir}/`, following the architecture. Edit files that already exist instead of duplicating them. The context transcripts were covered by the previous pass; use them only for continuity.

When you are done, reply with the list of files you wrote or changed, one path per line."#;

/// Builds the discovery prompt for a course.
pub fn build_discovery_prompt(course: &Course) -> String {
    let subgroup_note = if course.has_subgroups {
        ", grouped into section directories"
    } else {
        ""
    };

    fill(
        DISCOVERY_TEMPLATE,
        &[
            ("course_name", &course.name),
            (
                "transcript_count",
                &course.source_material.len().to_string(),
            ),
            ("subgroup_note", subgroup_note),
            ("transcripts", &bullet_list(&course.source_material)),
            ("manifest_path", &format!("{STATE_DIR}/manifest.json")),
        ],
    )
}

/// Builds the architecture-extraction prompt for a large sub-task.
pub fn build_architecture_prompt(course: &Course, item: &ManifestItem) -> String {
    let architecture_path = format!(
        "{STATE_DIR}/architecture/{}.json",
        crate::course::sanitize_file_stem(&item.id)
    );

    fill(
        ARCHITECTURE_TEMPLATE,
        &[
            ("course_name", &course.name),
            ("subtask_id", &item.id),
            ("transcript_count", &item.source_refs.len().to_string()),
            ("transcripts", &bullet_list(&item.source_refs)),
            ("architecture_path", &architecture_path),
        ],
    )
}

/// Builds the single-call generation prompt for a sub-task.
pub fn build_generation_prompt(course: &Course, item: &ManifestItem) -> String {
    fill(
        GENERATION_TEMPLATE,
        &[
            ("course_name", &course.name),
            ("subtask_id", &item.id),
            ("transcripts", &bullet_list(&item.source_refs)),
            ("output_dir", OUTPUT_DIR),
        ],
    )
}

/// Builds the prompt for one chunk of a large sub-task.
///
/// `produced_files` are the files earlier chunks wrote, relative to the
/// course directory.
pub fn build_chunk_prompt(
    course: &Course,
    item: &ManifestItem,
    architecture: &ArchitectureSpec,
    chunk: &Chunk<String>,
    produced_files: &[String],
) -> String {
    let produced = if produced_files.is_empty() {
        "Nothing yet; this pass starts the material.".to_string()
    } else {
        bullet_list(produced_files)
    };

    let overlap = if chunk.overlap_from_previous.is_empty() {
        "None; this is the first pass.".to_string()
    } else {
        bullet_list(&chunk.overlap_from_previous)
    };

    fill(
        CHUNK_TEMPLATE,
        &[
            ("course_name", &course.name),
            ("subtask_id", &item.id),
            ("chunk_number", &(chunk.index + 1).to_string()),
            ("chunk_total", &chunk.total.to_string()),
            ("architecture", &render_architecture(architecture)),
            ("produced_files", &produced),
            ("overlap", &overlap),
            ("transcripts", &bullet_list(&chunk.items)),
            ("output_dir", OUTPUT_DIR),
        ],
    )
}

/// Substitutes `{name}` placeholders in one pass over the template.
///
/// Substituted values are never rescanned, so agent-written text that
/// happens to contain a placeholder stays literal. Braces that do not
/// name a known placeholder are kept as is.
fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open + 1..];
        let value = tail.find('}').and_then(|close| {
            let name = &tail[..close];
            values
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (close, *value))
        });
        match value {
            Some((close, value)) => {
                out.push_str(value);
                rest = &tail[close + 1..];
            }
            None => {
                out.push('{');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Renders an architecture spec as markdown for inclusion in a prompt.
pub fn render_architecture(spec: &ArchitectureSpec) -> String {
    let mut out = String::new();

    if !spec.summary.is_empty() {
        let _ = writeln!(out, "{}\n", spec.summary);
    }

    if !spec.outline.is_empty() {
        out.push_str("Outline:\n");
        for (i, section) in spec.outline.iter().enumerate() {
            let _ = writeln!(out, "{}. {}", i + 1, section);
        }
        out.push('\n');
    }

    if !spec.files.is_empty() {
        out.push_str("Planned files:\n");
        for file in &spec.files {
            match &file.purpose {
                Some(purpose) => {
                    let _ = writeln!(out, "- `{}`: {}", file.path, purpose);
                }
                None => {
                    let _ = writeln!(out, "- `{}`", file.path);
                }
            }
        }
        out.push('\n');
    }

    if !spec.conventions.is_empty() {
        out.push_str("Conventions:\n");
        out.push_str(&bullet_list(&spec.conventions));
        out.push('\n');
    }

    let trimmed = out.trim_end();
    if trimmed.is_empty() {
        "No architecture available; keep the structure consistent with the files already written."
            .to_string()
    } else {
        trimmed.to_string()
    }
}

fn bullet_list(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("- {item}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::plan;
    use crate::course::CourseState;
    use crate::pipeline::{PlannedFile, SubtaskStatus};

    fn course() -> Course {
        Course::new(
            "/courses/Rust Basics",
            vec!["01 - intro.srt".to_string(), "02 - ownership.srt".to_string()],
            false,
            CourseState::Pending,
        )
    }

    fn item(refs: usize) -> ManifestItem {
        ManifestItem {
            id: "module-1".to_string(),
            source_refs: (1..=refs).map(|i| format!("{i:02}.srt")).collect(),
            size_class: "large".to_string(),
            status: SubtaskStatus::NotStarted,
        }
    }

    #[test]
    fn test_discovery_prompt_references_paths() {
        let prompt = build_discovery_prompt(&course());
        assert!(prompt.contains("\"Rust Basics\""));
        assert!(prompt.contains("- 01 - intro.srt"));
        assert!(prompt.contains(".forge/manifest.json"));
        assert!(prompt.contains("2 transcript files"));
        assert!(!prompt.contains("section directories"));
    }

    #[test]
    fn test_generation_prompt() {
        let prompt = build_generation_prompt(&course(), &item(3));
        assert!(prompt.contains("\"module-1\""));
        assert!(prompt.contains("- 03.srt"));
        assert!(prompt.contains("`output/`"));
    }

    #[test]
    fn test_architecture_prompt_path_is_sanitized() {
        let mut item = item(20);
        item.id = "module 1/a".to_string();
        let prompt = build_architecture_prompt(&course(), &item);
        assert!(prompt.contains(".forge/architecture/module_1_a.json"));
        assert!(prompt.contains("20 transcripts"));
    }

    #[test]
    fn test_chunk_prompt_carries_context() {
        let item = item(23);
        let chunks = plan(&item.source_refs, 10, 2).unwrap();
        let spec = ArchitectureSpec {
            subtask: "module-1".to_string(),
            summary: "Ownership in depth".to_string(),
            outline: vec!["Moves".to_string()],
            files: vec![PlannedFile {
                path: "output/module-1/01.md".to_string(),
                purpose: None,
            }],
            conventions: vec![],
        };

        let first = build_chunk_prompt(&course(), &item, &spec, &chunks[0], &[]);
        assert!(first.contains("pass 1 of 2"));
        assert!(first.contains("None; this is the first pass."));
        assert!(first.contains("Nothing yet"));

        let produced = vec!["output/module-1/01.md".to_string()];
        let second = build_chunk_prompt(&course(), &item, &spec, &chunks[1], &produced);
        assert!(second.contains("pass 2 of 2"));
        assert!(second.contains("- 09.srt"));
        assert!(second.contains("- 23.srt"));
        assert!(second.contains("- output/module-1/01.md"));
        assert!(second.contains("Ownership in depth"));
    }

    #[test]
    fn test_agent_text_with_placeholders_stays_literal() {
        let mut item = item(23);
        item.id = "module-{course_name}".to_string();
        let chunks = plan(&item.source_refs, 10, 2).unwrap();
        let spec = ArchitectureSpec {
            subtask: item.id.clone(),
            summary: "Each pass reads {transcripts} and {overlap}".to_string(),
            outline: vec![],
            files: vec![],
            conventions: vec![],
        };

        let produced = vec!["output/{output_dir}.md".to_string()];
        let prompt = build_chunk_prompt(&course(), &item, &spec, &chunks[1], &produced);
        assert!(prompt.contains("Each pass reads {transcripts} and {overlap}"));
        assert!(prompt.contains("\"module-{course_name}\""));
        assert!(prompt.contains("- output/{output_dir}.md"));
        assert_eq!(prompt.matches("- 23.srt").count(), 1);
        assert_eq!(prompt.matches("- 09.srt").count(), 1);
    }

    #[test]
    fn test_fill_keeps_unknown_braces() {
        let filled = fill("{\n  \"id\": \"{id}\" } {other} {", &[("id", "m1")]);
        assert_eq!(filled, "{\n  \"id\": \"m1\" } {other} {");
    }

    #[test]
    fn test_render_empty_architecture() {
        let spec = ArchitectureSpec::empty("m");
        assert!(render_architecture(&spec).starts_with("No architecture available"));
    }
}
