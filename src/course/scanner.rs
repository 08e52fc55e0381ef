//! Course discovery on the filesystem.
//!
//! In single-course mode the input directory is the course. In recursive
//! mode every directory under the input is a candidate:
//!
//! - a directory that directly contains transcripts is a flat course;
//! - a directory without direct transcripts whose transcript-bearing
//!   children all look like numbered sections ("01 - Basics", "Module 2")
//!   is a course with subgroups.
//!
//! The walk never descends into a course it has found, and never enters
//! `output/`, `.forge/` or hidden directories. Everything is sorted in
//! natural order so repeated scans return the same courses in the same order.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use futures::stream::{self, StreamExt, TryStreamExt};
use regex::Regex;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use super::state::{classify, prepare};
use super::{Course, CourseState, OUTPUT_DIR, STATE_DIR};
use crate::error::ScanError;
use crate::events::{EventBus, ForgeEvent};

/// File extensions treated as transcripts.
pub const TRANSCRIPT_EXTENSIONS: &[&str] = &["srt", "vtt", "txt"];

/// Options controlling a scan.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Search below the input for many courses instead of treating the input
    /// as a single course.
    pub recursive: bool,
    /// How many courses are classified concurrently.
    pub scan_concurrency: usize,
    /// Classify only; leave abandoned output in place.
    pub read_only: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            recursive: false,
            scan_concurrency: 8,
            read_only: false,
        }
    }
}

/// Courses found by a scan, in natural order.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub courses: Vec<Course>,
    /// Number of abandoned attempts whose output was removed.
    pub cleaned: usize,
}

impl ScanReport {
    pub fn pending(&self) -> usize {
        self.courses.iter().filter(|c| c.is_pending()).count()
    }

    pub fn skipped(&self) -> usize {
        self.courses.len() - self.pending()
    }
}

/// Finds and classifies courses.
pub struct CourseScanner {
    options: ScanOptions,
    bus: Option<Arc<EventBus>>,
}

impl CourseScanner {
    pub fn new(options: ScanOptions) -> Self {
        Self { options, bus: None }
    }

    /// Publishes `scan:*` events on `bus`.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Scans `root`, classifies every course found and cleans up abandoned
    /// attempts.
    pub async fn scan(&self, root: &Path) -> Result<ScanReport, ScanError> {
        if !root.exists() {
            return Err(ScanError::NotFound(root.to_path_buf()));
        }
        if !root.is_dir() {
            return Err(ScanError::NotADirectory(root.to_path_buf()));
        }

        self.publish(ForgeEvent::ScanStarted {
            root: root.to_path_buf(),
            recursive: self.options.recursive,
        });

        let candidates = if self.options.recursive {
            find_course_dirs(root)?
        } else {
            vec![root.to_path_buf()]
        };

        let mut found = Vec::with_capacity(candidates.len());
        for dir in candidates {
            let (source_material, has_subgroups) = collect_source_material(&dir)?;
            if source_material.is_empty() {
                if !self.options.recursive {
                    return Err(ScanError::NoSourceMaterial(dir));
                }
                continue;
            }
            found.push((dir, source_material, has_subgroups));
        }

        // `buffered` keeps input order while classifying concurrently.
        let read_only = self.options.read_only;
        let classified: Vec<(Course, bool)> = stream::iter(found)
            .map(|(dir, source_material, has_subgroups)| async move {
                let classification = if read_only {
                    classify(&dir).await
                } else {
                    prepare(&dir).await
                }
                .map_err(|source| ScanError::Classify {
                    path: dir.clone(),
                    source,
                })?;
                let course = Course::new(
                    dir,
                    source_material,
                    has_subgroups,
                    classification.state,
                );
                Ok::<_, ScanError>((course, classification.requires_cleanup))
            })
            .buffered(self.options.scan_concurrency.max(1))
            .try_collect()
            .await?;

        let cleaned = if read_only {
            0
        } else {
            classified.iter().filter(|(_, cleaned)| *cleaned).count()
        };
        let courses: Vec<Course> = classified.into_iter().map(|(course, _)| course).collect();

        for course in &courses {
            debug!(
                course = %course.name,
                state = %course.state,
                transcripts = course.source_material.len(),
                has_subgroups = course.has_subgroups,
                "Classified course"
            );
        }

        let report = ScanReport { courses, cleaned };
        self.publish(ForgeEvent::ScanCompleted {
            total: report.courses.len(),
            pending: report.pending(),
            skipped: report.skipped(),
            cleaned: report.cleaned,
        });

        Ok(report)
    }

    fn publish(&self, event: ForgeEvent) {
        if let Some(bus) = &self.bus {
            bus.publish(event);
        }
    }
}

/// Walks `root` and returns course directories in natural order.
pub fn find_course_dirs(root: &Path) -> Result<Vec<PathBuf>, ScanError> {
    let mut courses = Vec::new();
    let mut walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by(|a, b| natural_cmp(&a.file_name().to_string_lossy(), &b.file_name().to_string_lossy()))
        .into_iter();

    while let Some(entry) = walker.next() {
        let entry = entry?;
        if !entry.file_type().is_dir() {
            continue;
        }
        if entry.depth() > 0 && is_excluded(&entry) {
            walker.skip_current_dir();
            continue;
        }
        if is_course_dir(entry.path())? {
            courses.push(entry.path().to_path_buf());
            walker.skip_current_dir();
        }
    }

    Ok(courses)
}

/// Collects transcripts under `course_dir` as `/`-separated relative paths
/// in natural order, and reports whether any sit in a subdirectory.
pub fn collect_source_material(course_dir: &Path) -> Result<(Vec<String>, bool), ScanError> {
    let mut refs: Vec<Vec<String>> = Vec::new();
    let walker = WalkDir::new(course_dir)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_excluded(e));

    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() || !is_transcript(entry.path()) {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(course_dir)
            .unwrap_or(entry.path());
        refs.push(
            relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect(),
        );
    }

    refs.sort_by(|a, b| {
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| natural_cmp(x, y))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or_else(|| a.len().cmp(&b.len()))
    });

    let has_subgroups = refs.iter().any(|parts| parts.len() > 1);
    Ok((refs.into_iter().map(|parts| parts.join("/")).collect(), has_subgroups))
}

fn is_course_dir(dir: &Path) -> Result<bool, ScanError> {
    let mut section_dirs = 0usize;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_file() && is_transcript(&path) {
            return Ok(true);
        }
        if file_type.is_dir() && !is_excluded_name(&entry.file_name().to_string_lossy()) {
            if !has_direct_transcripts(&path)? {
                continue;
            }
            if !looks_like_section(&entry.file_name().to_string_lossy()) {
                return Ok(false);
            }
            section_dirs += 1;
        }
    }
    Ok(section_dirs > 0)
}

fn has_direct_transcripts(dir: &Path) -> Result<bool, ScanError> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() && is_transcript(&entry.path()) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn section_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^(\d+|(section|module|part|chapter|week|unit|lesson)[\s_\-]*\d+)")
            .expect("section pattern is valid")
    })
}

fn looks_like_section(name: &str) -> bool {
    section_pattern().is_match(name.trim())
}

fn is_transcript(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| TRANSCRIPT_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn is_excluded(entry: &DirEntry) -> bool {
    entry.file_type().is_dir() && is_excluded_name(&entry.file_name().to_string_lossy())
}

fn is_excluded_name(name: &str) -> bool {
    name == OUTPUT_DIR || name == STATE_DIR || name.starts_with('.')
}

/// Natural ("human") string ordering: digit runs compare numerically, so
/// `"2 - intro"` sorts before `"10 - wrap-up"`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();

    loop {
        match (left.peek().copied(), right.peek().copied()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let lnum = take_digits(&mut left);
                let rnum = take_digits(&mut right);
                let ltrim = lnum.trim_start_matches('0');
                let rtrim = rnum.trim_start_matches('0');
                let ord = ltrim
                    .len()
                    .cmp(&rtrim.len())
                    .then_with(|| ltrim.cmp(rtrim));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(x), Some(y)) => {
                let ord = x.to_lowercase().cmp(y.to_lowercase());
                if ord != Ordering::Equal {
                    return ord;
                }
                left.next();
                right.next();
            }
        }
    }
}

fn take_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut digits = String::new();
    while let Some(c) = chars.peek().copied() {
        if !c.is_ascii_digit() {
            break;
        }
        digits.push(c);
        chars.next();
    }
    digits
}

/// Convenience for callers that only need states, e.g. the `status` command.
pub fn count_by_state(courses: &[Course]) -> (usize, usize) {
    let pending = courses
        .iter()
        .filter(|c| c.state == CourseState::Pending)
        .count();
    (pending, courses.len() - pending)
}
