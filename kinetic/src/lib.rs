//! Kinetic task ledger library.
//! Recognises checkbox task blocks in Markdown notes, stamps them with stable IDs,
//! consolidates them into one ledger, and keeps a project-grouped view in sync with it.

pub mod core {
    use serde::{Deserialize, Serialize};
    use std::fmt;

    /* ------------------------------- IDs ------------------------------- */

    /// Identifier convention. Engines take this explicitly instead of guessing from token shape.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum IdScheme {
        /// `^t123^`, placed right after the checkbox and issued by the allocator.
        Numeric,
        /// `^p3-water-plants`, appended at end of line and derived from the task text.
        Slug,
    }

    /// A task identifier in either scheme.
    #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(tag = "scheme", content = "value", rename_all = "snake_case")]
    pub enum TaskId {
        Numeric(u64),
        Slug(String),
    }

    impl TaskId {
        pub fn scheme(&self) -> IdScheme {
            match self {
                TaskId::Numeric(_) => IdScheme::Numeric,
                TaskId::Slug(_) => IdScheme::Slug,
            }
        }

        /// Token text as embedded in a task line.
        pub fn token(&self) -> String {
            match self {
                TaskId::Numeric(n) => format!("^t{n}^"),
                TaskId::Slug(s) => format!("^{s}"),
            }
        }
    }

    impl fmt::Display for TaskId {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                TaskId::Numeric(n) => write!(f, "t{n}"),
                TaskId::Slug(s) => f.write_str(s),
            }
        }
    }

    /* ---------------------------- Value Objects ---------------------------- */

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub enum Checkbox {
        Open, // [ ]
        Done, // [x]
    }

    impl Checkbox {
        pub fn mark(self) -> char {
            match self {
                Checkbox::Open => ' ',
                Checkbox::Done => 'x',
            }
        }
    }

    /// A header line followed by its more-indented child lines, kept verbatim.
    #[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct TaskBlock {
        pub lines: Vec<String>,
    }

    impl TaskBlock {
        pub fn new(lines: Vec<String>) -> Self {
            Self { lines }
        }

        pub fn header(&self) -> &str {
            self.lines.first().map(String::as_str).unwrap_or("")
        }
    }

    /// One row of the project registry table.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ProjectEntry {
        /// Upper-cased, e.g. `P3`.
        pub id: String,
        pub name: String,
        pub status: String,
    }

    /// Inline time markers counted in view summaries, in display order.
    pub const TIME_MARKERS: [&str; 5] = ["today", "tomorrow", "thisweek", "nextweek", "nextfewdays"];

    /* ---------------------------- Errors (domain) ---------------------------- */

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    #[serde(rename_all = "snake_case")]
    pub enum DocumentRole {
        Ledger,
        Projects,
    }

    impl fmt::Display for DocumentRole {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                DocumentRole::Ledger => f.write_str("tasks ledger"),
                DocumentRole::Projects => f.write_str("projects file"),
            }
        }
    }

    #[derive(Debug, thiserror::Error)]
    pub enum KineticError {
        #[error("{role} not found at {path}")]
        MissingDocument { role: DocumentRole, path: String },
        #[error("no project index table header found")]
        MalformedTableHeader,
        #[error("not a task header: {text:?}")]
        StructuralMismatch { text: String },
        #[error("numeric task id space exhausted")]
        IdSpaceExhausted,
    }
}

pub mod line {
    //! Line grammar shared by every engine.
    //!
    //! A task header is `ws* "- [" (" " | "x" | "X") "]"` followed by end of line or
    //! whitespace and free text. Numeric ID tokens look like `^t12^` and may sit anywhere;
    //! slug tokens look like `^p3-water-plants` and only count at end of line.

    use crate::core::{Checkbox, KineticError, TaskId};
    use nom::{
        IResult,
        branch::alt,
        bytes::complete::{tag, take_while, take_while1},
        character::complete::{char, digit1, one_of},
        combinator::{eof, map_res, opt, recognize, value},
        sequence::{delimited, preceded, tuple},
    };
    use std::fmt::Write;

    /// A classified line.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Line<'a> {
        OpenTaskHeader(TaskHeader<'a>),
        DoneTaskHeader(TaskHeader<'a>),
        TableRow(&'a str),
        Plain,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TaskHeader<'a> {
        /// Leading whitespace.
        pub indent: &'a str,
        /// Indent, bullet, checkbox and the whitespace after it.
        pub prefix: &'a str,
        pub checkbox: Checkbox,
        /// Everything after `prefix`.
        pub text: &'a str,
    }

    impl TaskHeader<'_> {
        /// Byte offset of the checkbox mark within the line.
        pub fn mark_offset(&self) -> usize {
            self.indent.len() + "- [".len()
        }
    }

    /// A well-formed numeric token located in a line.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NumericToken {
        pub start: usize,
        pub end: usize,
        pub value: u64,
    }

    /* ------------------------------ Parsers ------------------------------ */

    fn is_ws(c: char) -> bool {
        c.is_whitespace()
    }

    pub(crate) fn is_slug_char(c: char) -> bool {
        c.is_ascii_alphanumeric() || c == '_' || c == '-'
    }

    fn is_word_char(c: char) -> bool {
        c.is_ascii_alphanumeric() || c == '_'
    }

    fn header_prefix(i: &str) -> IResult<&str, (&str, Checkbox)> {
        let (i, indent) = take_while(is_ws)(i)?;
        let (i, _) = tag("- [")(i)?;
        let (i, checkbox) = alt((
            value(Checkbox::Open, char(' ')),
            value(Checkbox::Done, one_of("xX")),
        ))(i)?;
        let (i, _) = char(']')(i)?;
        let (i, _) = alt((take_while1(is_ws), eof))(i)?;
        Ok((i, (indent, checkbox)))
    }

    fn numeric_token(i: &str) -> IResult<&str, u64> {
        delimited(
            tag("^t"),
            map_res(digit1, |d: &str| d.parse::<u64>()),
            char('^'),
        )(i)
    }

    // `^t12^`, `^t12` or `^t^`.
    fn stray_numeric_token(i: &str) -> IResult<&str, &str> {
        recognize(preceded(
            tag("^t"),
            alt((tag("^"), recognize(tuple((digit1, opt(char('^'))))))),
        ))(i)
    }

    fn project_tag(i: &str) -> IResult<&str, &str> {
        preceded(tuple((char('#'), one_of("Pp"))), digit1)(i)
    }

    /* ---------------------------- Public API ---------------------------- */

    /// Parse `line` as a task header.
    pub fn parse_task_header(line: &str) -> Option<TaskHeader<'_>> {
        let (text, (indent, checkbox)) = header_prefix(line).ok()?;
        let prefix = &line[..line.len() - text.len()];
        Some(TaskHeader {
            indent,
            prefix,
            checkbox,
            text,
        })
    }

    pub fn classify(line: &str) -> Line<'_> {
        match parse_task_header(line) {
            Some(h) if h.checkbox == Checkbox::Open => Line::OpenTaskHeader(h),
            Some(h) => Line::DoneTaskHeader(h),
            None if line.trim_start().starts_with('|') => Line::TableRow(line),
            None => Line::Plain,
        }
    }

    /// Number of leading whitespace characters.
    pub fn indent_width(line: &str) -> usize {
        line.chars().take_while(|c| c.is_whitespace()).count()
    }

    pub fn is_blank(line: &str) -> bool {
        line.trim().is_empty()
    }

    /// Every well-formed `^tN^` token, left to right, non-overlapping.
    pub fn numeric_tokens(line: &str) -> Vec<NumericToken> {
        let mut out = Vec::new();
        let mut pos = 0;
        while let Some(off) = line[pos..].find('^') {
            let start = pos + off;
            match numeric_token(&line[start..]) {
                Ok((rest, value)) => {
                    let end = line.len() - rest.len();
                    out.push(NumericToken { start, end, value });
                    pos = end;
                }
                Err(_) => pos = start + 1,
            }
        }
        out
    }

    pub fn numeric_id(line: &str) -> Option<u64> {
        numeric_tokens(line).first().map(|t| t.value)
    }

    /// Trailing `^slug` token, if the line ends with one.
    pub fn trailing_slug(line: &str) -> Option<&str> {
        let trimmed = line.trim_end();
        let caret = trimmed.rfind('^')?;
        let slug = &trimmed[caret + 1..];
        (!slug.is_empty() && slug.chars().all(is_slug_char)).then_some(slug)
    }

    /// The line's ID: its numeric token when present, otherwise its trailing slug.
    pub fn task_id(line: &str) -> Option<TaskId> {
        numeric_id(line)
            .map(TaskId::Numeric)
            .or_else(|| trailing_slug(line).map(|s| TaskId::Slug(s.to_string())))
    }

    /// Remove numeric ID tokens, including partial ones like `^t12` or `^t^`.
    pub fn strip_numeric_tokens(text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        let mut removed = false;
        while let Some(off) = rest.find('^') {
            out.push_str(&rest[..off]);
            let candidate = &rest[off..];
            match stray_numeric_token(candidate) {
                Ok((after, matched)) if matched.ends_with('^') || !after.starts_with(is_slug_char) => {
                    removed = true;
                    rest = match after.strip_prefix(' ') {
                        Some(tail) if out.is_empty() || out.ends_with(char::is_whitespace) => tail,
                        _ => after,
                    };
                }
                _ => {
                    out.push('^');
                    rest = &candidate[1..];
                }
            }
        }
        out.push_str(rest);
        if removed { out.trim().to_string() } else { out }
    }

    /// Rewrite a task header so it carries exactly `^t{id}^`, right after the checkbox.
    pub fn with_numeric_id(line: &str, id: u64) -> Result<String, KineticError> {
        let header = parse_task_header(line).ok_or_else(|| KineticError::StructuralMismatch {
            text: line.to_string(),
        })?;
        let rest = strip_numeric_tokens(header.text);
        let mut out = String::with_capacity(line.len() + 8);
        out.push_str(header.prefix);
        if !header.prefix.ends_with(is_ws) {
            out.push(' ');
        }
        let _ = write!(out, "^t{id}^");
        if !rest.is_empty() {
            out.push(' ');
            out.push_str(&rest);
        }
        Ok(out)
    }

    /// Project ids (`P<digits>`) tagged inline as `#P<digits>`, in order, without repeats.
    pub fn project_tags(line: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut rest = line;
        while let Some(off) = rest.find('#') {
            let candidate = &rest[off..];
            match project_tag(candidate) {
                Ok((after, digits)) if !after.starts_with(is_word_char) => {
                    let id = format!("P{digits}");
                    if !out.contains(&id) {
                        out.push(id);
                    }
                    rest = after;
                }
                _ => rest = &candidate[1..],
            }
        }
        out
    }

    /// Cells of a pipe-delimited row; index 0 is whatever precedes the first pipe.
    pub fn table_cells(line: &str) -> Vec<&str> {
        line.split('|').map(str::trim).collect()
    }

}

pub mod block {
    //! Text block extraction: a header line plus its more-indented children.

    use crate::line::{indent_width, is_blank};
    use std::ops::Range;

    /// Line range of the block headed at `start`: the header, every following line indented
    /// deeper than it, and blank lines sitting between such children. A trailing run of blank
    /// lines is not part of the block.
    pub fn block_range<S: AsRef<str>>(lines: &[S], start: usize) -> Range<usize> {
        if start >= lines.len() {
            return lines.len()..lines.len();
        }
        let header_indent = indent_width(lines[start].as_ref());
        let mut end = start + 1;
        for (j, line) in lines.iter().enumerate().skip(start + 1) {
            let line = line.as_ref();
            if is_blank(line) {
                continue;
            }
            if indent_width(line) <= header_indent {
                break;
            }
            end = j + 1;
        }
        start..end
    }

    pub fn extract_block<S: AsRef<str>>(lines: &[S], start: usize) -> &[S] {
        &lines[block_range(lines, start)]
    }

}

pub mod ids {
    //! ID issuing: the monotonic numeric allocator and the slug generator.

    use crate::core::KineticError;
    use crate::line;
    use nom::{
        IResult,
        bytes::complete::take_while_m_n,
        character::complete::char,
        combinator::{all_consuming, recognize},
        sequence::tuple,
    };
    use serde::{Deserialize, Serialize};
    use std::collections::HashSet;

    /* ----------------------------- Allocator ----------------------------- */

    /// Monotonic numeric ID source. The counter only ever moves forward.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Allocator {
        next: u64,
        /// Set once `u64::MAX` has been issued or observed.
        #[serde(default)]
        exhausted: bool,
    }

    impl Allocator {
        pub fn new(next: u64) -> Self {
            Self {
                next: next.max(1),
                exhausted: false,
            }
        }

        /// The value the next allocation will return.
        pub fn peek(&self) -> u64 {
            self.next
        }

        /// Raise the counter past an ID seen in a ledger or note.
        pub fn observe(&mut self, id: u64) {
            if self.exhausted || id < self.next {
                return;
            }
            match id.checked_add(1) {
                Some(next) => self.next = next,
                None => {
                    self.next = id;
                    self.exhausted = true;
                }
            }
        }

        pub fn is_exhausted(&self) -> bool {
            self.exhausted
        }

        /// Fails once every numeric ID has been issued or observed.
        pub fn allocate(&mut self) -> Result<u64, KineticError> {
            if self.exhausted {
                return Err(KineticError::IdSpaceExhausted);
            }
            let id = self.next;
            match self.next.checked_add(1) {
                Some(next) => self.next = next,
                None => self.exhausted = true,
            }
            Ok(id)
        }
    }

    /* ------------------------------- Slugs ------------------------------- */

    pub const MAX_SLUG_LEN: usize = 40;
    pub const FALLBACK_SLUG: &str = "task";

    /// Human-readable ID for `header`, prefixed with the owning project and unique within `used`.
    pub fn slug_id(project_id: &str, header: &str, used: &HashSet<String>) -> String {
        let base = format!("{}-{}", project_id.to_lowercase(), slugify(slug_source(header)));
        if !used.contains(&base) {
            return base;
        }
        (2u64..)
            .map(|n| format!("{base}-{n}"))
            .find(|candidate| !used.contains(candidate))
            .unwrap_or(base)
    }

    fn slug_source(header: &str) -> &str {
        let content = match line::parse_task_header(header) {
            Some(h) => h.text,
            None => header.trim(),
        };
        let content = strip_trailing_slug(strip_trailing_date(content));
        let cut = content.find(['#', '@', '^']).unwrap_or(content.len());
        content[..cut].trim()
    }

    fn slugify(text: &str) -> String {
        let mut slug = String::with_capacity(text.len());
        for c in text.to_lowercase().chars() {
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                slug.push(c);
            } else if !slug.ends_with('-') {
                slug.push('-');
            }
        }
        let mut slug = slug.trim_matches('-').to_string();
        if slug.len() > MAX_SLUG_LEN {
            slug.truncate(MAX_SLUG_LEN);
            slug = slug.trim_end_matches('-').to_string();
        }
        if slug.is_empty() {
            FALLBACK_SLUG.to_string()
        } else {
            slug
        }
    }

    fn date_suffix(i: &str) -> IResult<&str, &str> {
        let digit = |c: char| c.is_ascii_digit();
        recognize(tuple((
            char('@'),
            take_while_m_n(4, 4, digit),
            char('-'),
            take_while_m_n(2, 2, digit),
            char('-'),
            take_while_m_n(2, 2, digit),
        )))(i)
    }

    // ` @2025-01-31` at end of text.
    fn strip_trailing_date(content: &str) -> &str {
        let Some(at) = content.rfind('@') else {
            return content;
        };
        let (head, tail) = content.split_at(at);
        match all_consuming(date_suffix)(tail) {
            Ok(_) if head.ends_with(char::is_whitespace) => head.trim_end(),
            _ => content,
        }
    }

    // ` ^existing-slug` at end of text.
    fn strip_trailing_slug(content: &str) -> &str {
        let Some(caret) = content.rfind('^') else {
            return content;
        };
        let (head, tail) = content.split_at(caret);
        let slug = &tail[1..];
        if !slug.is_empty()
            && slug.chars().all(line::is_slug_char)
            && head.ends_with(char::is_whitespace)
        {
            head.trim_end()
        } else {
            content
        }
    }

}

pub mod storage {
    //! Document and settings persistence. Document paths are vault-relative with `/` separators.

    use crate::settings::Settings;
    use anyhow::{Context, Result};
    use std::{
        collections::BTreeMap,
        fs, io,
        path::{Path, PathBuf},
    };
    use tracing::debug;

    pub const SETTINGS_DIR: &str = ".kinetic";
    pub const SETTINGS_FILE: &str = "settings.json";

    /// Whole-document text access.
    pub trait DocumentStore {
        /// Document text, or `None` when the document does not exist.
        fn read_text(&self, path: &str) -> Result<Option<String>>;

        fn write_text(&mut self, path: &str, text: &str) -> Result<()>;

        /// Every Markdown document in the store, sorted.
        fn list_documents(&self) -> Result<Vec<String>>;

        fn exists(&self, path: &str) -> bool;
    }

    /// Load/save of the small persisted settings record.
    pub trait SettingsStore {
        fn load(&self) -> Result<Option<Settings>>;
        fn save(&mut self, settings: &Settings) -> Result<()>;
    }

    /// `./Tasks//a.md` and `Tasks\a.md` both become `Tasks/a.md`.
    pub fn normalize_path(path: &str) -> String {
        path.replace('\\', "/")
            .split('/')
            .filter(|s| !s.is_empty() && *s != ".")
            .collect::<Vec<_>>()
            .join("/")
    }

    /* ---------------------------- Filesystem ---------------------------- */

    #[derive(Debug, Clone)]
    pub struct FsDocumentStore {
        root: PathBuf,
    }

    impl FsDocumentStore {
        pub fn new(root: impl Into<PathBuf>) -> Self {
            Self { root: root.into() }
        }

        pub fn root(&self) -> &Path {
            &self.root
        }

        fn abs(&self, path: &str) -> PathBuf {
            self.root.join(normalize_path(path))
        }
    }

    impl DocumentStore for FsDocumentStore {
        fn read_text(&self, path: &str) -> Result<Option<String>> {
            let abs = self.abs(path);
            match fs::read_to_string(&abs) {
                Ok(text) => {
                    debug!(path, bytes = text.len(), "read document");
                    Ok(Some(text))
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
                Err(err) => Err(err).with_context(|| format!("reading {:?}", abs)),
            }
        }

        fn write_text(&mut self, path: &str, text: &str) -> Result<()> {
            let abs = self.abs(path);
            if let Some(parent) = abs.parent() {
                fs::create_dir_all(parent).with_context(|| format!("creating {:?}", parent))?;
            }
            fs::write(&abs, text.as_bytes()).with_context(|| format!("writing {:?}", abs))?;
            debug!(path, bytes = text.len(), "wrote document");
            Ok(())
        }

        fn list_documents(&self) -> Result<Vec<String>> {
            let mut out = Vec::new();
            visit_dir(&self.root, &self.root, &mut out)?;
            out.sort();
            Ok(out)
        }

        fn exists(&self, path: &str) -> bool {
            self.abs(path).is_file()
        }
    }

    // Hidden directories (.obsidian, .kinetic, .git) and symlinks are skipped.
    fn visit_dir(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<()> {
        for entry in fs::read_dir(dir).with_context(|| format!("listing {:?}", dir))? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if file_type.is_symlink() {
                continue;
            }
            let path = entry.path();
            if file_type.is_dir() {
                if !entry.file_name().to_string_lossy().starts_with('.') {
                    visit_dir(root, &path, out)?;
                }
            } else if file_type.is_file()
                && path.extension().map(|ext| ext == "md").unwrap_or(false)
            {
                if let Ok(rel) = path.strip_prefix(root) {
                    let rel = rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect::<Vec<_>>()
                        .join("/");
                    out.push(rel);
                }
            }
        }
        Ok(())
    }

    /// Settings record kept as pretty JSON on disk.
    #[derive(Debug, Clone)]
    pub struct JsonSettingsStore {
        path: PathBuf,
    }

    impl JsonSettingsStore {
        pub fn new(path: impl Into<PathBuf>) -> Self {
            Self { path: path.into() }
        }

        pub fn for_vault(root: &Path) -> Self {
            Self::new(root.join(SETTINGS_DIR).join(SETTINGS_FILE))
        }

        pub fn path(&self) -> &Path {
            &self.path
        }
    }

    impl SettingsStore for JsonSettingsStore {
        fn load(&self) -> Result<Option<Settings>> {
            let text = match fs::read_to_string(&self.path) {
                Ok(text) => text,
                Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
                Err(err) => return Err(err).with_context(|| format!("reading {:?}", self.path)),
            };
            let settings = serde_json::from_str(&text)
                .with_context(|| format!("parsing settings {:?}", self.path))?;
            Ok(Some(settings))
        }

        fn save(&mut self, settings: &Settings) -> Result<()> {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent).with_context(|| format!("creating {:?}", parent))?;
            }
            let json = serde_json::to_string_pretty(settings)?;
            fs::write(&self.path, json.as_bytes())
                .with_context(|| format!("writing {:?}", self.path))?;
            debug!(path = ?self.path, next_id = settings.next_id, "saved settings");
            Ok(())
        }
    }

    /* ----------------------------- In-memory ----------------------------- */

    /// Map-backed store; records every write so callers can check for no-op runs.
    #[derive(Debug, Clone, Default)]
    pub struct MemoryDocumentStore {
        docs: BTreeMap<String, String>,
        writes: Vec<String>,
    }

    impl MemoryDocumentStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_document(mut self, path: &str, text: &str) -> Self {
            self.docs.insert(normalize_path(path), text.to_string());
            self
        }

        pub fn get(&self, path: &str) -> Option<&str> {
            self.docs.get(&normalize_path(path)).map(String::as_str)
        }

        /// Paths written so far, in order.
        pub fn writes(&self) -> &[String] {
            &self.writes
        }

        pub fn clear_writes(&mut self) {
            self.writes.clear();
        }
    }

    impl DocumentStore for MemoryDocumentStore {
        fn read_text(&self, path: &str) -> Result<Option<String>> {
            Ok(self.get(path).map(str::to_string))
        }

        fn write_text(&mut self, path: &str, text: &str) -> Result<()> {
            let path = normalize_path(path);
            self.docs.insert(path.clone(), text.to_string());
            self.writes.push(path);
            Ok(())
        }

        fn list_documents(&self) -> Result<Vec<String>> {
            Ok(self
                .docs
                .keys()
                .filter(|p| p.ends_with(".md"))
                .cloned()
                .collect())
        }

        fn exists(&self, path: &str) -> bool {
            self.docs.contains_key(&normalize_path(path))
        }
    }

    #[derive(Debug, Clone, Default)]
    pub struct MemorySettingsStore {
        record: Option<Settings>,
    }

    impl MemorySettingsStore {
        pub fn new(record: Option<Settings>) -> Self {
            Self { record }
        }

        pub fn record(&self) -> Option<&Settings> {
            self.record.as_ref()
        }
    }

    impl SettingsStore for MemorySettingsStore {
        fn load(&self) -> Result<Option<Settings>> {
            Ok(self.record.clone())
        }

        fn save(&mut self, settings: &Settings) -> Result<()> {
            self.record = Some(settings.clone());
            Ok(())
        }
    }

}

pub mod settings {
    //! The persisted settings record and the allocator boundary.

    use crate::ids::Allocator;
    use crate::storage::{SettingsStore, normalize_path};
    use anyhow::Result;
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use serde_with::{DefaultOnNull, serde_as};
    use std::collections::BTreeSet;

    pub const DEFAULT_LEDGER_PATH: &str = "Tasks/Kinetic-Tasks.md";
    pub const DEFAULT_PROJECTS_PATH: &str = "Projects.md";
    pub const DEFAULT_PEOPLE_PATH: &str = "People/Kinetic-People.md";
    pub const DEFAULT_STATUS_FILTER: &str = "In progress.";

    #[serde_as]
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Settings {
        /// Vault-relative path of the canonical ledger.
        #[serde(default = "default_ledger_path", alias = "compiledTasksFile")]
        pub ledger_path: String,

        /// Document holding the project index table and the generated view.
        #[serde(default = "default_projects_path")]
        pub projects_path: String,

        /// Derived views that are never scanned for tasks.
        #[serde(default = "default_excluded_paths")]
        pub excluded_paths: Vec<String>,

        /// `null` renders every project that has tasks.
        #[serde(default = "default_status_filter")]
        pub status_filter: Option<String>,

        /// Allocator counter.
        #[serde_as(as = "DefaultOnNull")]
        #[serde(default = "default_next_id")]
        pub next_id: u64,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub last_consolidated_at: Option<DateTime<Utc>>,
    }

    fn default_ledger_path() -> String {
        DEFAULT_LEDGER_PATH.to_string()
    }

    fn default_projects_path() -> String {
        DEFAULT_PROJECTS_PATH.to_string()
    }

    fn default_excluded_paths() -> Vec<String> {
        vec![DEFAULT_PROJECTS_PATH.to_string(), DEFAULT_PEOPLE_PATH.to_string()]
    }

    fn default_status_filter() -> Option<String> {
        Some(DEFAULT_STATUS_FILTER.to_string())
    }

    fn default_next_id() -> u64 {
        1
    }

    impl Default for Settings {
        fn default() -> Self {
            Self {
                ledger_path: default_ledger_path(),
                projects_path: default_projects_path(),
                excluded_paths: default_excluded_paths(),
                status_filter: default_status_filter(),
                next_id: default_next_id(),
                last_consolidated_at: None,
            }
        }
    }

    impl Settings {
        /// Documents never scanned for tasks: the configured exclusions, the ledger and the
        /// projects view.
        pub fn excluded_sources(&self) -> BTreeSet<String> {
            let mut out: BTreeSet<String> =
                self.excluded_paths.iter().map(|p| normalize_path(p)).collect();
            out.insert(normalize_path(&self.ledger_path));
            out.insert(normalize_path(&self.projects_path));
            out
        }

        pub fn status_filter(&self) -> Option<&str> {
            self.status_filter
                .as_deref()
                .filter(|s| !s.trim().is_empty())
        }
    }

    /// Stored record, or defaults when nothing has been saved yet.
    pub fn load_settings(store: &impl SettingsStore) -> Result<Settings> {
        Ok(store.load()?.unwrap_or_default())
    }

    pub fn load_allocator(settings: &Settings) -> Allocator {
        Allocator::new(settings.next_id)
    }

    pub fn persist_allocator(settings: &mut Settings, allocator: &Allocator) {
        settings.next_id = settings.next_id.max(allocator.peek());
    }

}

pub mod ledger {
    //! Ledger store adapter: the canonical document as raw lines plus an index of numeric IDs.

    use crate::core::{Checkbox, DocumentRole, KineticError};
    use crate::line;
    use crate::storage::DocumentStore;
    use anyhow::Result;
    use serde::Serialize;
    use std::collections::BTreeSet;
    use tracing::{debug, info};

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Ledger {
        path: String,
        lines: Vec<String>,
        numeric_ids: BTreeSet<u64>,
        existed: bool,
    }

    /// Read-only view of the ledger index.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct LedgerSummary {
        pub path: String,
        pub exists: bool,
        pub numeric_ids: Vec<u64>,
        pub slug_ids: Vec<String>,
        pub max_numeric_id: u64,
        pub open_tasks: usize,
        pub done_tasks: usize,
    }

    /// Split on `\n` only, so that joining the lines again restores the text byte for byte.
    pub fn split_lines(text: &str) -> Vec<String> {
        text.split('\n').map(str::to_string).collect()
    }

    impl Ledger {
        pub fn parse(path: &str, text: Option<&str>) -> Self {
            let lines = match text {
                Some(t) if !t.is_empty() => split_lines(t),
                _ => Vec::new(),
            };
            let mut ledger = Self {
                path: path.to_string(),
                lines,
                numeric_ids: BTreeSet::new(),
                existed: text.is_some(),
            };
            ledger.reindex();
            ledger
        }

        /// A missing ledger loads as an empty one; it is created on first save.
        pub fn load(store: &impl DocumentStore, path: &str) -> Result<Self> {
            let text = store.read_text(path)?;
            if text.is_none() {
                debug!(path, "ledger missing; starting empty");
            }
            Ok(Self::parse(path, text.as_deref()))
        }

        pub fn load_required(store: &impl DocumentStore, path: &str) -> Result<Self> {
            match store.read_text(path)? {
                Some(text) => Ok(Self::parse(path, Some(&text))),
                None => Err(KineticError::MissingDocument {
                    role: DocumentRole::Ledger,
                    path: path.to_string(),
                }
                .into()),
            }
        }

        pub fn path(&self) -> &str {
            &self.path
        }

        pub fn exists(&self) -> bool {
            self.existed
        }

        pub fn lines(&self) -> &[String] {
            &self.lines
        }

        pub fn contains(&self, id: u64) -> bool {
            self.numeric_ids.contains(&id)
        }

        pub fn max_numeric_id(&self) -> u64 {
            self.numeric_ids.last().copied().unwrap_or(0)
        }

        /// Append a block verbatim and index every numeric ID it carries.
        pub fn append_block<S: AsRef<str>>(&mut self, block: &[S]) {
            for line in block {
                let line = line.as_ref();
                self.numeric_ids
                    .extend(line::numeric_tokens(line).into_iter().map(|t| t.value));
                self.lines.push(line.to_string());
            }
        }

        pub fn replace_lines(&mut self, lines: Vec<String>) {
            self.lines = lines;
            self.reindex();
        }

        pub fn to_text(&self) -> String {
            self.lines.join("\n")
        }

        pub fn save(&mut self, store: &mut impl DocumentStore) -> Result<()> {
            store.write_text(&self.path, &self.to_text())?;
            self.existed = true;
            info!(path = %self.path, lines = self.lines.len(), "ledger written");
            Ok(())
        }

        pub fn summary(&self) -> LedgerSummary {
            let mut slug_ids = BTreeSet::new();
            let (mut open_tasks, mut done_tasks) = (0, 0);
            for l in &self.lines {
                let Some(header) = line::parse_task_header(l) else {
                    continue;
                };
                match header.checkbox {
                    Checkbox::Open => open_tasks += 1,
                    Checkbox::Done => done_tasks += 1,
                }
                if line::numeric_id(l).is_none() {
                    if let Some(slug) = line::trailing_slug(l) {
                        slug_ids.insert(slug.to_string());
                    }
                }
            }
            LedgerSummary {
                path: self.path.clone(),
                exists: self.existed,
                numeric_ids: self.numeric_ids.iter().copied().collect(),
                slug_ids: slug_ids.into_iter().collect(),
                max_numeric_id: self.max_numeric_id(),
                open_tasks,
                done_tasks,
            }
        }

        fn reindex(&mut self) {
            self.numeric_ids = self
                .lines
                .iter()
                .flat_map(|l| line::numeric_tokens(l))
                .map(|t| t.value)
                .collect();
        }
    }

}

pub mod consolidate {
    //! Pulls open tasks from every source note into the ledger, stamping numeric IDs where missing.
    //!
    //! Sources are read up front so that the allocator observes every numeric ID already present
    //! in the vault before issuing new ones.

    use crate::block::extract_block;
    use crate::core::Checkbox;
    use crate::ids::Allocator;
    use crate::ledger::{Ledger, split_lines};
    use crate::line;
    use crate::storage::{DocumentStore, normalize_path};
    use anyhow::Result;
    use serde::Serialize;
    use std::collections::BTreeSet;
    use tracing::{debug, info, warn};

    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
    pub struct ConsolidateReport {
        pub scanned_documents: usize,
        pub added_blocks: usize,
        pub allocated_ids: Vec<u64>,
        pub rewritten_documents: Vec<String>,
        pub unreadable_documents: Vec<String>,
        pub ledger_written: bool,
    }

    /// `excluded` holds normalized paths; the ledger is skipped regardless.
    /// The allocator is advanced in place; persisting it is the caller's job, including on error.
    pub fn consolidate(
        store: &mut impl DocumentStore,
        ledger_path: &str,
        excluded: &BTreeSet<String>,
        allocator: &mut Allocator,
    ) -> Result<ConsolidateReport> {
        let mut report = ConsolidateReport::default();
        let mut ledger = Ledger::load(&*store, ledger_path)?;
        allocator.observe(ledger.max_numeric_id());

        let sources = read_sources(&*store, ledger_path, excluded, &mut report)?;
        for (_, lines) in &sources {
            for token in lines.iter().flat_map(|l| line::numeric_tokens(l)) {
                allocator.observe(token.value);
            }
        }
        debug!(next_id = allocator.peek(), sources = sources.len(), "allocator seeded");

        for (path, mut lines) in sources {
            report.scanned_documents += 1;
            if consolidate_document(&path, &mut lines, &mut ledger, allocator, &mut report)? {
                store.write_text(&path, &lines.join("\n"))?;
                info!(path = %path, "stamped new task ids in source");
                report.rewritten_documents.push(path);
            }
        }

        if report.added_blocks > 0 || !ledger.exists() {
            ledger.save(store)?;
            report.ledger_written = true;
        }
        Ok(report)
    }

    fn read_sources(
        store: &impl DocumentStore,
        ledger_path: &str,
        excluded: &BTreeSet<String>,
        report: &mut ConsolidateReport,
    ) -> Result<Vec<(String, Vec<String>)>> {
        let ledger_path = normalize_path(ledger_path);
        let mut out = Vec::new();
        for path in store.list_documents()? {
            let normalized = normalize_path(&path);
            if normalized == ledger_path || excluded.contains(&normalized) {
                debug!(path = %path, "skipping excluded document");
                continue;
            }
            match store.read_text(&path) {
                Ok(Some(text)) => out.push((path, split_lines(&text))),
                Ok(None) => debug!(path = %path, "document vanished before it was read"),
                Err(err) => {
                    warn!(path = %path, "skipping unreadable document: {err:#}");
                    report.unreadable_documents.push(path);
                }
            }
        }
        Ok(out)
    }

    /// Returns true when any header in `lines` was rewritten.
    fn consolidate_document(
        path: &str,
        lines: &mut [String],
        ledger: &mut Ledger,
        allocator: &mut Allocator,
        report: &mut ConsolidateReport,
    ) -> Result<bool> {
        let mut changed = false;
        for i in 0..lines.len() {
            let existing = match line::parse_task_header(&lines[i]) {
                Some(header) if header.checkbox == Checkbox::Open => line::numeric_id(&lines[i]),
                _ => continue,
            };

            let id = match existing {
                Some(id) => id,
                None => {
                    let id = allocator.allocate()?;
                    match line::with_numeric_id(&lines[i], id) {
                        Ok(stamped) => lines[i] = stamped,
                        Err(err) => {
                            debug!(path, "{err}");
                            continue;
                        }
                    }
                    changed = true;
                    report.allocated_ids.push(id);
                    debug!(path, id, "allocated task id");
                    id
                }
            };

            if !ledger.contains(id) {
                ledger.append_block(extract_block(&lines[..], i));
                report.added_blocks += 1;
                debug!(path, id, "copied task block into ledger");
            }
        }
        Ok(changed)
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::core::KineticError;
        use crate::settings::Settings;
        use crate::storage::MemoryDocumentStore;

        const LEDGER: &str = "Tasks/Kinetic-Tasks.md";

        fn excluded() -> BTreeSet<String> {
            Settings::default().excluded_sources()
        }

        #[test]
        fn stamps_unidentified_task_and_appends_it() {
            let mut store = MemoryDocumentStore::new()
                .with_document(LEDGER, "- [ ] Buy milk #P1 ^p1-buy-milk")
                .with_document("A.md", "- [ ] Water plants #P2");
            let mut alloc = Allocator::new(7);

            let report = consolidate(&mut store, LEDGER, &excluded(), &mut alloc).expect("run");

            assert_eq!(store.get("A.md"), Some("- [ ] ^t7^ Water plants #P2"));
            assert_eq!(
                store.get(LEDGER),
                Some("- [ ] Buy milk #P1 ^p1-buy-milk\n- [ ] ^t7^ Water plants #P2")
            );
            assert_eq!(report.added_blocks, 1);
            assert_eq!(report.allocated_ids, vec![7]);
            assert_eq!(alloc.peek(), 8);
        }

        #[test]
        fn exhausted_id_space_fails_instead_of_reusing_an_id() {
            let mut store = MemoryDocumentStore::new()
                .with_document("A.md", "- [ ] ^t18446744073709551615^ Last
- [ ] New task");
            let mut alloc = Allocator::new(1);

            let err = consolidate(&mut store, LEDGER, &excluded(), &mut alloc).expect_err("exhausted");

            assert!(matches!(
                err.downcast_ref::<KineticError>(),
                Some(KineticError::IdSpaceExhausted)
            ));
            assert_eq!(store.get("A.md"), Some("- [ ] ^t18446744073709551615^ Last\n- [ ] New task"));
        }

        #[test]
        fn second_run_is_a_no_op() {
            let mut store = MemoryDocumentStore::new()
                .with_document("Daily/2025-01-01.md", "# Day\n- [ ] Call Bob\n  - details\n- [x] done")
                .with_document("Projects.md", "- [ ] view copy #P1");
            let mut alloc = Allocator::new(1);

            consolidate(&mut store, LEDGER, &excluded(), &mut alloc).expect("first");
            let ledger_before = store.get(LEDGER).map(str::to_string);
            let source_before = store.get("Daily/2025-01-01.md").map(str::to_string);
            store.clear_writes();

            let report = consolidate(&mut store, LEDGER, &excluded(), &mut alloc).expect("second");

            assert_eq!(report.added_blocks, 0);
            assert!(report.allocated_ids.is_empty());
            assert!(store.writes().is_empty());
            assert_eq!(store.get(LEDGER).map(str::to_string), ledger_before);
            assert_eq!(store.get("Daily/2025-01-01.md").map(str::to_string), source_before);
            assert_eq!(
                ledger_before.as_deref(),
                Some("- [ ] ^t1^ Call Bob\n  - details")
            );
        }

        #[test]
        fn existing_ids_are_copied_without_touching_source() {
            let mut store = MemoryDocumentStore::new()
                .with_document("Note.md", "- [ ] ^t40^ Plan trip\n\tbook hotel\n\nafter");
            let mut alloc = Allocator::new(1);

            let report = consolidate(&mut store, LEDGER, &excluded(), &mut alloc).expect("run");

            assert!(report.rewritten_documents.is_empty());
            assert_eq!(store.get(LEDGER), Some("- [ ] ^t40^ Plan trip\n\tbook hotel"));
            assert_eq!(alloc.peek(), 41);
        }

        #[test]
        fn ids_seen_in_sources_are_never_reissued() {
            let mut store = MemoryDocumentStore::new()
                .with_document("A.md", "- [ ] fresh")
                .with_document("B.md", "- [ ] ^t5^ stamped by an earlier run");
            let mut alloc = Allocator::new(5);

            consolidate(&mut store, LEDGER, &excluded(), &mut alloc).expect("run");

            assert_eq!(store.get("A.md"), Some("- [ ] ^t6^ fresh"));
        }

        #[test]
        fn missing_ledger_is_created_even_without_tasks() {
            let mut store = MemoryDocumentStore::new().with_document("A.md", "no tasks");
            let mut alloc = Allocator::new(1);
            let report = consolidate(&mut store, LEDGER, &excluded(), &mut alloc).expect("run");
            assert!(report.ledger_written);
            assert_eq!(store.get(LEDGER), Some(""));
        }
    }
}

pub mod dedup {
    //! Collapses ledger blocks sharing a numeric ID down to the first occurrence.
    //! Blocks without an ID are never merged, even when their text is identical.

    use crate::block::extract_block;
    use crate::ledger::Ledger;
    use crate::line;
    use crate::storage::DocumentStore;
    use anyhow::Result;
    use serde::Serialize;
    use std::collections::HashSet;
    use tracing::{debug, info};

    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
    pub struct DedupReport {
        pub dropped_blocks: usize,
        pub dropped_lines: usize,
        pub normalized_headers: usize,
        pub changed: bool,
    }

    /// Keep only the first numeric token on a header.
    pub fn normalize_header(header: &str) -> String {
        let tokens = line::numeric_tokens(header);
        if tokens.len() <= 1 {
            return header.to_string();
        }
        line::with_numeric_id(header, tokens[0].value).unwrap_or_else(|_| header.to_string())
    }

    pub fn dedup_lines(lines: &[String]) -> (Vec<String>, DedupReport) {
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(lines.len());
        let mut report = DedupReport::default();

        let mut i = 0;
        while i < lines.len() {
            if line::parse_task_header(&lines[i]).is_none() {
                out.push(lines[i].clone());
                i += 1;
                continue;
            }

            let block = extract_block(lines, i);
            let header = normalize_header(&block[0]);
            match line::numeric_id(&header) {
                Some(id) if !seen.insert(id) => {
                    debug!(id, lines = block.len(), "dropping duplicate block");
                    report.dropped_blocks += 1;
                    report.dropped_lines += block.len();
                }
                _ => {
                    if header != block[0] {
                        report.normalized_headers += 1;
                    }
                    out.push(header);
                    out.extend(block[1..].iter().cloned());
                }
            }
            i += block.len();
        }

        report.changed = out.as_slice() != lines;
        (out, report)
    }

    /// Rewrites the ledger only when something changed.
    pub fn dedup_ledger(store: &mut impl DocumentStore, ledger_path: &str) -> Result<DedupReport> {
        let mut ledger = Ledger::load_required(&*store, ledger_path)?;
        let (lines, report) = dedup_lines(ledger.lines());
        if report.changed {
            ledger.replace_lines(lines);
            ledger.save(store)?;
            info!(
                dropped = report.dropped_blocks,
                normalized = report.normalized_headers,
                "ledger deduplicated"
            );
        }
        Ok(report)
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::ledger::split_lines;
        use crate::storage::MemoryDocumentStore;

        fn lines(text: &str) -> Vec<String> {
            split_lines(text)
        }

        #[test]
        fn keeps_first_block_per_id() {
            let (out, report) = dedup_lines(&lines("- [ ] ^t1^ A\n- [ ] ^t1^ A (dup)"));
            assert_eq!(out, vec!["- [ ] ^t1^ A"]);
            assert_eq!(report.dropped_blocks, 1);
        }

        #[test]
        fn drops_children_with_the_duplicate() {
            let input = "# Ledger\n- [ ] ^t2^ B\n  - child\n- [x] ^t2^ B again\n  - other child\n- [ ] ^t3^ C";
            let (out, report) = dedup_lines(&lines(input));
            assert_eq!(out, lines("# Ledger\n- [ ] ^t2^ B\n  - child\n- [ ] ^t3^ C"));
            assert_eq!(report.dropped_lines, 2);
        }

        #[test]
        fn unidentified_duplicates_are_kept() {
            let input = lines("- [ ] Same text\n- [ ] Same text");
            let (out, report) = dedup_lines(&input);
            assert_eq!(out, input);
            assert!(!report.changed);
        }

        #[test]
        fn multi_token_headers_collapse_to_first_id() {
            let (out, report) = dedup_lines(&lines("- [ ] ^t4^ Pay ^t9^ rent\n- [ ] ^t9^ other"));
            assert_eq!(out, vec!["- [ ] ^t4^ Pay rent", "- [ ] ^t9^ other"]);
            assert_eq!(report.normalized_headers, 1);
        }

        #[test]
        fn done_headers_are_normalized_too() {
            let (out, report) = dedup_lines(&lines("- [x] ^t4^ a ^t9^\n  - note\n- [ ] ^t9^ b"));
            assert_eq!(out, vec!["- [x] ^t4^ a", "  - note", "- [ ] ^t9^ b"]);
            assert_eq!(report.normalized_headers, 1);
            assert_eq!(report.dropped_blocks, 0);
            assert!(report.changed);
        }

        #[test]
        fn no_ids_repeat_after_dedup() {
            let input = lines("- [ ] ^t1^ a\n- [ ] ^t2^ b\n- [ ] ^t1^ c\n- [x] ^t2^ d\n- [ ] ^t3^ e");
            let (out, _) = dedup_lines(&input);
            let ids: Vec<u64> = out.iter().filter_map(|l| line::numeric_id(l)).collect();
            let unique: HashSet<u64> = ids.iter().copied().collect();
            assert_eq!(ids.len(), unique.len());
        }

        #[test]
        fn ledger_is_left_alone_when_clean() {
            let mut store = MemoryDocumentStore::new().with_document("L.md", "- [ ] ^t1^ a");
            let report = dedup_ledger(&mut store, "L.md").expect("dedup");
            assert!(!report.changed);
            assert!(store.writes().is_empty());
            assert!(dedup_ledger(&mut store, "missing.md").is_err());
        }
    }
}

pub mod projects {
    //! Project index parser: the Markdown table whose first header cell is `ID`.

    use crate::core::{KineticError, ProjectEntry};
    use crate::line;
    use indexmap::IndexMap;

    /// Project id (`P3`) to its registry row, in table order.
    pub type ProjectIndex = IndexMap<String, ProjectEntry>;

    pub fn parse_project_index<S: AsRef<str>>(lines: &[S]) -> Result<ProjectIndex, KineticError> {
        let header_idx = lines
            .iter()
            .position(|l| is_index_header(l.as_ref()))
            .ok_or(KineticError::MalformedTableHeader)?;

        let mut start = header_idx + 1;
        if lines.get(start).is_some_and(|l| is_separator_row(l.as_ref())) {
            start += 1;
        }

        let mut index = ProjectIndex::new();
        for row in &lines[start..] {
            let row = row.as_ref();
            if !row.trim().starts_with('|') {
                break;
            }
            let cells = line::table_cells(row);
            let id_cell = cells.get(1).copied().unwrap_or("");
            if !is_project_id(id_cell) {
                continue;
            }
            let id = id_cell.to_uppercase();
            let name = cells
                .get(2)
                .copied()
                .filter(|c| !c.is_empty())
                .unwrap_or(id.as_str())
                .to_string();
            let status = cells.get(3).copied().unwrap_or("").to_string();
            index.insert(id.clone(), ProjectEntry { id, name, status });
        }
        Ok(index)
    }

    // `| ID | ...`, case-insensitive, with `ID` as a whole word.
    fn is_index_header(line: &str) -> bool {
        let Some(rest) = line.strip_prefix('|') else {
            return false;
        };
        let rest = rest.trim_start_matches(' ');
        rest.get(..2).is_some_and(|s| s.eq_ignore_ascii_case("id"))
            && !rest[2..].starts_with(|c: char| c.is_ascii_alphanumeric() || c == '_')
    }

    fn is_separator_row(line: &str) -> bool {
        let trimmed = line.trim();
        trimmed.starts_with('|')
            && trimmed.contains('-')
            && trimmed.chars().all(|c| matches!(c, '|' | '-' | ':' | ' ' | '\t'))
    }

    fn is_project_id(cell: &str) -> bool {
        let mut chars = cell.chars();
        matches!(chars.next(), Some('P' | 'p'))
            && !cell[1..].is_empty()
            && cell[1..].chars().all(|c| c.is_ascii_digit())
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn parses_rows_until_table_ends() {
            let lines = [
                "# Projects",
                "| Id | Project Name | Status |",
                "| --- | :--- | --- |",
                "| p3 | Garden | In progress. |",
                "| P4 |  | Someday |",
                "| X1 | Not a project | - |",
                "| P5 | Short row |",
                "after the table",
                "| P9 | Ignored | In progress. |",
            ];
            let index = parse_project_index(&lines).expect("index");
            assert_eq!(index.keys().collect::<Vec<_>>(), vec!["P3", "P4", "P5"]);
            assert_eq!(index["P3"].name, "Garden");
            assert_eq!(index["P3"].status, "In progress.");
            assert_eq!(index["P4"].name, "P4");
            assert_eq!(index["P5"].status, "");
        }

        #[test]
        fn first_row_is_kept_when_there_is_no_separator() {
            let lines = ["| ID | Name | Status |", "| P1 | Home | Active |"];
            let index = parse_project_index(&lines).expect("index");
            assert_eq!(index.len(), 1);
        }

        #[test]
        fn missing_table_is_reported() {
            let lines = ["| Identity | x |", "no table here"];
            assert!(matches!(
                parse_project_index(&lines),
                Err(KineticError::MalformedTableHeader)
            ));
        }
    }
}

pub mod view {
    //! Existing Projects view: ledger tasks grouped by `#P<n>` tag, filtered by project status.
    //!
    //! The section is regenerated in full on every run and spliced over the previous one; it is
    //! never patched incrementally, so edits made inside the generated section do not survive.

    use crate::block::block_range;
    use crate::core::{DocumentRole, KineticError, ProjectEntry, TIME_MARKERS, TaskBlock};
    use crate::ids::slug_id;
    use crate::ledger::{Ledger, split_lines};
    use crate::line::{self, Line};
    use crate::projects::{ProjectIndex, parse_project_index};
    use crate::storage::DocumentStore;
    use anyhow::Result;
    use indexmap::IndexMap;
    use serde::Serialize;
    use std::{cmp::Ordering, collections::HashSet, fmt::Write, ops::Range};
    use tracing::{debug, info, warn};

    pub const SECTION_HEADING: &str = "# Existing Projects";

    /// Project id to its open task blocks, in ledger order.
    pub type TasksByProject = IndexMap<String, Vec<TaskBlock>>;

    #[derive(Debug, Clone, Default)]
    pub struct ProjectBlocks {
        pub tasks_by_project: TasksByProject,
        /// Ledger lines after slug stamping.
        pub lines: Vec<String>,
        /// Slug ids written onto headers that had no id.
        pub stamped: Vec<String>,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct RenderedSection {
        pub text: String,
        pub projects: Vec<String>,
        pub tasks: usize,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct ViewReport {
        pub indexed_projects: usize,
        pub projects: Vec<String>,
        pub tasks: usize,
        pub stamped_ids: Vec<String>,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct Summary {
        pub total: usize,
        pub markers: IndexMap<&'static str, usize>,
    }

    impl Summary {
        pub fn of(blocks: &[TaskBlock]) -> Self {
            let mut markers: IndexMap<&'static str, usize> =
                TIME_MARKERS.iter().map(|m| (*m, 0)).collect();
            for block in blocks {
                let header = block.header().to_lowercase();
                for (marker, count) in markers.iter_mut() {
                    if header.contains(&format!("#{marker}")) {
                        *count += 1;
                    }
                }
            }
            Self {
                total: blocks.len(),
                markers,
            }
        }

        pub fn render(&self) -> String {
            let plural = if self.total == 1 { "" } else { "s" };
            let mut out = format!("**Summary:** {} open task{plural}", self.total);
            let pieces: Vec<String> = self
                .markers
                .iter()
                .filter(|(_, n)| **n > 0)
                .map(|(m, n)| format!("{n} #{m}"))
                .collect();
            if !pieces.is_empty() {
                let _ = write!(out, " ({})", pieces.join(", "));
            }
            out
        }
    }

    /// Group open, project-tagged ledger blocks by tag. Headers carrying no id of either scheme
    /// get a slug id appended, keyed on their first project tag.
    pub fn collect_project_blocks(ledger_lines: &[String]) -> ProjectBlocks {
        let mut lines = ledger_lines.to_vec();
        let mut found: Vec<(Vec<String>, Range<usize>)> = Vec::new();

        let mut i = 0;
        while i < lines.len() {
            let tags = match line::classify(&lines[i]) {
                Line::OpenTaskHeader(_) => line::project_tags(&lines[i]),
                _ => Vec::new(),
            };
            if tags.is_empty() {
                i += 1;
                continue;
            }
            let range = block_range(&lines, i);
            i = range.end;
            found.push((tags, range));
        }

        let mut used: HashSet<String> = lines
            .iter()
            .filter_map(|l| line::task_id(l))
            .map(|id| id.to_string())
            .collect();
        let mut stamped = Vec::new();
        for (tags, range) in &found {
            let header = &lines[range.start];
            if line::task_id(header).is_some() {
                continue;
            }
            let slug = slug_id(&tags[0], header, &used);
            let eol = if header.ends_with('\r') { "\r" } else { "" };
            let updated = format!("{} ^{}{eol}", header.trim_end(), slug);
            debug!(slug = %slug, "stamped slug id on ledger header");
            lines[range.start] = updated;
            used.insert(slug.clone());
            stamped.push(slug);
        }

        let mut tasks_by_project = TasksByProject::new();
        for (tags, range) in found {
            for tag in tags {
                tasks_by_project
                    .entry(tag)
                    .or_default()
                    .push(TaskBlock::new(lines[range.clone()].to_vec()));
            }
        }

        ProjectBlocks {
            tasks_by_project,
            lines,
            stamped,
        }
    }

    /// Case-insensitive, ignoring trailing `.`, `!` and whitespace.
    pub fn status_matches(status: &str, filter: &str) -> bool {
        fn normalize(s: &str) -> String {
            s.to_lowercase()
                .trim_end_matches(|c: char| c == '.' || c == '!' || c.is_whitespace())
                .to_string()
        }
        normalize(status) == normalize(filter)
    }

    fn project_number(id: &str) -> Option<u64> {
        id.get(1..).and_then(|n| n.parse().ok())
    }

    fn compare_project_ids(a: &str, b: &str) -> Ordering {
        match (project_number(a), project_number(b)) {
            (Some(na), Some(nb)) => na.cmp(&nb).then_with(|| a.cmp(b)),
            _ => a.cmp(b),
        }
    }

    pub fn build_section(
        index: &ProjectIndex,
        tasks_by_project: &TasksByProject,
        status_filter: Option<&str>,
    ) -> RenderedSection {
        let mut ids: Vec<&String> = tasks_by_project.keys().collect();
        ids.sort_by(|a, b| compare_project_ids(a, b));

        let mut text = format!("{SECTION_HEADING}\n\n");
        let mut projects = Vec::new();
        let mut tasks = 0;

        for id in ids {
            let entry = index.get(id.as_str()).cloned().unwrap_or_else(|| ProjectEntry {
                id: id.clone(),
                name: id.clone(),
                status: String::new(),
            });
            if let Some(filter) = status_filter {
                if !status_matches(&entry.status, filter) {
                    debug!(project = %id, status = %entry.status, "filtered out by status");
                    continue;
                }
            }
            let Some(blocks) = tasks_by_project.get(id.as_str()) else {
                continue;
            };
            if blocks.is_empty() {
                continue;
            }

            let _ = writeln!(text, "## 📁 {} ({})\n", entry.name, id);
            let _ = writeln!(text, "{}\n", Summary::of(blocks).render());
            for block in blocks {
                for l in &block.lines {
                    text.push_str(l);
                    text.push('\n');
                }
                text.push('\n');
            }
            projects.push(id.clone());
            tasks += blocks.len();
        }

        RenderedSection {
            text: format!("{}\n", text.trim_end()),
            projects,
            tasks,
        }
    }

    pub fn find_section_start<S: AsRef<str>>(lines: &[S]) -> Option<usize> {
        let marker = SECTION_HEADING.to_lowercase();
        lines
            .iter()
            .position(|l| l.as_ref().trim().to_lowercase().starts_with(&marker))
    }

    /// Replace everything from the section heading down, keeping the content above verbatim
    /// apart from collapsing the blank lines before the section to exactly one.
    pub fn splice_section<S: AsRef<str>>(lines: &[S], section: &str) -> String {
        let keep = find_section_start(lines).unwrap_or(lines.len());
        let mut prefix: Vec<&str> = lines[..keep].iter().map(|l| l.as_ref()).collect();
        while prefix.last().is_some_and(|l| l.trim().is_empty()) {
            prefix.pop();
        }
        if prefix.is_empty() {
            return format!("{}\n", section.trim_end());
        }
        format!("{}\n\n{}\n", prefix.join("\n"), section.trim_end())
    }

    /// Requires both the projects document and the ledger to exist. Writes the ledger first when
    /// slug ids were stamped, then the projects document when its text changed.
    pub fn rebuild_projects_view(
        store: &mut impl DocumentStore,
        projects_path: &str,
        ledger_path: &str,
        status_filter: Option<&str>,
    ) -> Result<ViewReport> {
        let projects_text =
            store
                .read_text(projects_path)?
                .ok_or_else(|| KineticError::MissingDocument {
                    role: DocumentRole::Projects,
                    path: projects_path.to_string(),
                })?;
        let projects_lines = split_lines(&projects_text);
        let index = parse_project_index(&projects_lines).unwrap_or_else(|err| {
            warn!(path = projects_path, "{err}; treating project index as empty");
            ProjectIndex::new()
        });

        let mut ledger = Ledger::load_required(&*store, ledger_path)?;
        let collected = collect_project_blocks(ledger.lines());
        if !collected.stamped.is_empty() {
            ledger.replace_lines(collected.lines.clone());
            ledger.save(store)?;
        }

        let section = build_section(&index, &collected.tasks_by_project, status_filter);
        let updated = splice_section(&projects_lines, &section.text);
        if updated != projects_text {
            store.write_text(projects_path, &updated)?;
        }
        info!(
            projects = section.projects.len(),
            tasks = section.tasks,
            "existing projects section rebuilt"
        );

        Ok(ViewReport {
            indexed_projects: index.len(),
            projects: section.projects,
            tasks: section.tasks,
            stamped_ids: collected.stamped,
        })
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::storage::MemoryDocumentStore;

        fn lines(text: &str) -> Vec<String> {
            split_lines(text)
        }

        #[test]
        fn files_blocks_under_every_tag_and_stamps_slugs() {
            let ledger = lines(
                "- [ ] Fix fence #P3 #P1\n  - buy posts\n- [ ] ^t4^ Prune roses #P3\n- [x] Old #P3\n- [ ] untagged",
            );
            let collected = collect_project_blocks(&ledger);

            assert_eq!(collected.stamped, vec!["p3-fix-fence"]);
            assert_eq!(collected.lines[0], "- [ ] Fix fence #P3 #P1 ^p3-fix-fence");
            assert_eq!(collected.lines[2], "- [ ] ^t4^ Prune roses #P3");
            let p3 = &collected.tasks_by_project["P3"];
            assert_eq!(p3.len(), 2);
            assert_eq!(p3[0].lines, vec!["- [ ] Fix fence #P3 #P1 ^p3-fix-fence", "  - buy posts"]);
            assert_eq!(collected.tasks_by_project["P1"].len(), 1);
        }

        #[test]
        fn stamping_keeps_crlf_line_endings() {
            let ledger = lines("- [ ] Water #P3\r\n  - hose\r\n- [ ] Weed #P3 ^p3-weed\r");
            let collected = collect_project_blocks(&ledger);
            assert_eq!(collected.stamped, vec!["p3-water"]);
            assert_eq!(collected.lines[0], "- [ ] Water #P3 ^p3-water\r");
            assert_eq!(collected.lines[2], "- [ ] Weed #P3 ^p3-weed\r");
        }

        #[test]
        fn renders_filtered_sorted_section_with_summary() {
            let project_lines = lines(
                "| ID | Name | Status |\n|---|---|---|\n| P3 | Garden | In progress. |\n| P10 | House | in progress |\n| P2 | Later | Someday |",
            );
            let index = parse_project_index(&project_lines).expect("index");
            let ledger = lines(
                "- [ ] Weed beds #P3 #today ^p3-weed\n- [ ] Mulch #P3 #thisweek #TODAY ^p3-mulch\n- [ ] Paint #P10 ^p10-paint\n- [ ] Idle #P2 ^p2-idle",
            );
            let collected = collect_project_blocks(&ledger);

            let section = build_section(&index, &collected.tasks_by_project, Some("In progress."));

            assert_eq!(section.projects, vec!["P3", "P10"]);
            assert_eq!(
                section.text,
                "# Existing Projects\n\n## 📁 Garden (P3)\n\n**Summary:** 2 open tasks (2 #today, 1 #thisweek)\n\n- [ ] Weed beds #P3 #today ^p3-weed\n\n- [ ] Mulch #P3 #thisweek #TODAY ^p3-mulch\n\n## 📁 House (P10)\n\n**Summary:** 1 open task\n\n- [ ] Paint #P10 ^p10-paint\n"
            );

            let all = build_section(&index, &collected.tasks_by_project, None);
            assert_eq!(all.projects, vec!["P2", "P3", "P10"]);
        }

        #[test]
        fn unknown_projects_only_show_without_a_filter() {
            let collected = collect_project_blocks(&lines("- [ ] Orphan #P7 ^p7-orphan"));
            let index = ProjectIndex::new();
            assert!(build_section(&index, &collected.tasks_by_project, Some("In progress.")).projects.is_empty());
            let all = build_section(&index, &collected.tasks_by_project, None);
            assert!(all.text.contains("## 📁 P7 (P7)"));
        }

        #[test]
        fn splice_replaces_old_section_and_collapses_blanks() {
            let doc = lines("# Projects\nintro\n\n\n# Existing Projects\n\nstale\n");
            let out = splice_section(&doc, "# Existing Projects\n\nfresh\n");
            assert_eq!(out, "# Projects\nintro\n\n# Existing Projects\n\nfresh\n");

            let fresh = splice_section(&lines("intro"), "# Existing Projects\n");
            assert_eq!(fresh, "intro\n\n# Existing Projects\n");
        }

        #[test]
        fn scenario_garden_project() {
            let mut store = MemoryDocumentStore::new()
                .with_document(
                    "Projects.md",
                    "# Projects\n\n| ID | Name | Status |\n| --- | --- | --- |\n| P3 | Garden | In progress. |\n",
                )
                .with_document("Tasks/Kinetic-Tasks.md", "- [ ] ^t1^ Weed #P3\n- [ ] Water #P3");

            let report = rebuild_projects_view(
                &mut store,
                "Projects.md",
                "Tasks/Kinetic-Tasks.md",
                Some("In progress."),
            )
            .expect("rebuild");

            assert_eq!(report.projects, vec!["P3"]);
            assert_eq!(report.stamped_ids, vec!["p3-water"]);
            let projects = store.get("Projects.md").expect("projects");
            assert_eq!(projects.matches("## 📁 Garden (P3)").count(), 1);
            assert!(projects.contains("**Summary:** 2 open tasks\n"));
            assert!(projects.starts_with("# Projects\n\n| ID | Name | Status |"));
            assert_eq!(
                store.get("Tasks/Kinetic-Tasks.md"),
                Some("- [ ] ^t1^ Weed #P3\n- [ ] Water #P3 ^p3-water")
            );
        }

        #[test]
        fn rebuild_requires_both_documents() {
            let mut store = MemoryDocumentStore::new().with_document("Projects.md", "x");
            let err = rebuild_projects_view(&mut store, "Projects.md", "L.md", None).expect_err("ledger");
            assert!(matches!(
                err.downcast_ref::<KineticError>(),
                Some(KineticError::MissingDocument { role: DocumentRole::Ledger, .. })
            ));
            let err = rebuild_projects_view(&mut store, "Nope.md", "L.md", None).expect_err("projects");
            assert!(matches!(
                err.downcast_ref::<KineticError>(),
                Some(KineticError::MissingDocument { role: DocumentRole::Projects, .. })
            ));
        }
    }
}

pub mod completion {
    //! Carries "done" marks from the generated view back to the ledger, by task ID.

    use crate::core::{DocumentRole, KineticError, TaskId};
    use crate::ledger::{Ledger, split_lines};
    use crate::line::{self, Line};
    use crate::storage::DocumentStore;
    use crate::view::find_section_start;
    use anyhow::Result;
    use serde::Serialize;
    use std::collections::BTreeSet;
    use tracing::{debug, info};

    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    #[serde(tag = "outcome", rename_all = "snake_case")]
    pub enum CompletionOutcome {
        NoCompletedIds,
        NoMatchingOpenTasks { completed: Vec<TaskId> },
        Flipped { completed: Vec<TaskId>, flipped: Vec<TaskId> },
    }

    /// IDs on done headers inside the generated section. Nothing outside it counts.
    pub fn collect_completed_ids<S: AsRef<str>>(lines: &[S]) -> BTreeSet<TaskId> {
        let Some(start) = find_section_start(lines) else {
            return BTreeSet::new();
        };
        lines[start..]
            .iter()
            .map(|l| l.as_ref())
            .filter(|l| matches!(line::classify(l), Line::DoneTaskHeader(_)))
            .filter_map(line::task_id)
            .collect()
    }

    /// Flip open ledger headers whose ID is in `completed`. Only the mark character changes.
    /// Returns the IDs of the flipped lines, in ledger order.
    pub fn apply_completions(lines: &mut [String], completed: &BTreeSet<TaskId>) -> Vec<TaskId> {
        let mut flipped = Vec::new();
        for l in lines.iter_mut() {
            let Some(id) = line::task_id(l).filter(|id| completed.contains(id)) else {
                continue;
            };
            let offset = match line::classify(l) {
                Line::OpenTaskHeader(h) => h.mark_offset(),
                Line::DoneTaskHeader(_) => continue,
                _ => {
                    let err = KineticError::StructuralMismatch { text: l.clone() };
                    debug!(id = %id, "{err}");
                    continue;
                }
            };
            l.replace_range(offset..offset + 1, "x");
            flipped.push(id);
        }
        flipped
    }

    pub fn sync_completions(
        store: &mut impl DocumentStore,
        projects_path: &str,
        ledger_path: &str,
    ) -> Result<CompletionOutcome> {
        let projects_text =
            store
                .read_text(projects_path)?
                .ok_or_else(|| KineticError::MissingDocument {
                    role: DocumentRole::Projects,
                    path: projects_path.to_string(),
                })?;
        let completed = collect_completed_ids(&split_lines(&projects_text));
        if completed.is_empty() {
            info!("no completed tasks in the projects view");
            return Ok(CompletionOutcome::NoCompletedIds);
        }

        let mut ledger = Ledger::load_required(&*store, ledger_path)?;
        let mut lines = ledger.lines().to_vec();
        let flipped = apply_completions(&mut lines, &completed);
        let completed: Vec<TaskId> = completed.into_iter().collect();
        if flipped.is_empty() {
            info!(completed = completed.len(), "no matching open tasks in the ledger");
            return Ok(CompletionOutcome::NoMatchingOpenTasks { completed });
        }

        ledger.replace_lines(lines);
        ledger.save(store)?;
        info!(flipped = flipped.len(), "completions synced to ledger");
        Ok(CompletionOutcome::Flipped { completed, flipped })
    }

}

pub mod commands {
    //! Command runners shared by the CLI: each runs one engine and reports a [`Status`].

    use crate::completion::{CompletionOutcome, sync_completions};
    use crate::consolidate::consolidate;
    use crate::core::KineticError;
    use crate::dedup::dedup_ledger;
    use crate::ledger::{Ledger, LedgerSummary};
    use crate::settings::{Settings, load_allocator, load_settings, persist_allocator};
    use crate::storage::{DocumentStore, SettingsStore};
    use crate::view::rebuild_projects_view;
    use anyhow::Result;
    use chrono::Utc;
    use serde::Serialize;
    use tracing::warn;

    pub mod exit_codes {
        pub const SUCCESS: u8 = 0;
        pub const FAILED: u8 = 1;
        pub const MISSING_DOCUMENT: u8 = 2;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    #[serde(rename_all = "snake_case")]
    pub enum StatusKind {
        Ok,
        /// Nothing to do; not an error.
        Info,
        Failed,
    }

    /// Outcome of one command, shown to the user as text or JSON.
    #[derive(Debug, Clone, PartialEq, Serialize)]
    pub struct Status {
        pub kind: StatusKind,
        pub message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub report: Option<serde_json::Value>,
        #[serde(skip)]
        code: u8,
    }

    impl Status {
        fn new(kind: StatusKind, message: String, report: impl Serialize) -> Result<Self> {
            Ok(Self {
                kind,
                message,
                report: Some(serde_json::to_value(report)?),
                code: exit_codes::SUCCESS,
            })
        }

        pub fn from_error(err: &anyhow::Error) -> Self {
            let code = match err.downcast_ref::<KineticError>() {
                Some(KineticError::MissingDocument { .. }) => exit_codes::MISSING_DOCUMENT,
                _ => exit_codes::FAILED,
            };
            Self {
                kind: StatusKind::Failed,
                message: format!("{err:#}"),
                report: None,
                code,
            }
        }

        pub fn exit_code(&self) -> u8 {
            self.code
        }
    }

    fn plural(n: usize, word: &str) -> String {
        if n == 1 {
            format!("{n} {word}")
        } else {
            format!("{n} {word}s")
        }
    }

    /* ------------------------------ Runners ------------------------------ */

    /// `settings` is the effective configuration for this run. Only the allocator counter and the
    /// run timestamp are written back, onto the stored record, and the counter is saved even when
    /// consolidation fails part-way.
    pub fn run_consolidate(
        docs: &mut impl DocumentStore,
        settings_store: &mut impl SettingsStore,
        settings: &Settings,
    ) -> Result<Status> {
        let mut allocator = load_allocator(settings);
        let result = consolidate(
            docs,
            &settings.ledger_path,
            &settings.excluded_sources(),
            &mut allocator,
        );

        let mut record = load_settings(&*settings_store)?;
        persist_allocator(&mut record, &allocator);
        if result.is_ok() {
            record.last_consolidated_at = Some(Utc::now());
        } else {
            warn!(next_id = record.next_id, "consolidation failed; saving allocator state");
        }
        settings_store.save(&record)?;

        let report = result?;
        let kind = if report.added_blocks == 0 {
            StatusKind::Info
        } else {
            StatusKind::Ok
        };
        let message = format!(
            "Added {} to {}; rewrote {}; allocated {}.",
            plural(report.added_blocks, "task"),
            settings.ledger_path,
            plural(report.rewritten_documents.len(), "document"),
            plural(report.allocated_ids.len(), "id"),
        );
        Status::new(kind, message, report)
    }

    pub fn run_dedupe(docs: &mut impl DocumentStore, settings: &Settings) -> Result<Status> {
        let report = dedup_ledger(docs, &settings.ledger_path)?;
        let (kind, message) = if report.changed {
            (
                StatusKind::Ok,
                format!(
                    "Dropped {} ({}); normalized {}.",
                    plural(report.dropped_blocks, "duplicate block"),
                    plural(report.dropped_lines, "line"),
                    plural(report.normalized_headers, "header"),
                ),
            )
        } else {
            (StatusKind::Info, "No duplicate tasks found.".to_string())
        };
        Status::new(kind, message, report)
    }

    pub fn run_rebuild_projects(docs: &mut impl DocumentStore, settings: &Settings) -> Result<Status> {
        let report = rebuild_projects_view(
            docs,
            &settings.projects_path,
            &settings.ledger_path,
            settings.status_filter(),
        )?;
        let mut message = format!(
            "Rendered {} with {} into {}.",
            plural(report.projects.len(), "project"),
            plural(report.tasks, "task"),
            settings.projects_path,
        );
        if !report.stamped_ids.is_empty() {
            message.push_str(&format!(
                " Stamped {} in the ledger.",
                plural(report.stamped_ids.len(), "new id")
            ));
        }
        Status::new(StatusKind::Ok, message, report)
    }

    pub fn run_sync_completions(docs: &mut impl DocumentStore, settings: &Settings) -> Result<Status> {
        let outcome = sync_completions(docs, &settings.projects_path, &settings.ledger_path)?;
        let (kind, message) = match &outcome {
            CompletionOutcome::NoCompletedIds => (
                StatusKind::Info,
                format!("No completed tasks found in {}.", settings.projects_path),
            ),
            CompletionOutcome::NoMatchingOpenTasks { completed } => (
                StatusKind::Info,
                format!(
                    "Found {} but no matching open tasks in the ledger.",
                    plural(completed.len(), "completed task")
                ),
            ),
            CompletionOutcome::Flipped { completed, flipped } => (
                StatusKind::Ok,
                format!(
                    "Marked {} done in the ledger ({} in the view).",
                    plural(flipped.len(), "task"),
                    plural(completed.len(), "completed id"),
                ),
            ),
        };
        Status::new(kind, message, outcome)
    }

    #[derive(Debug, Clone, Serialize)]
    pub struct InspectReport {
        #[serde(flatten)]
        pub ledger: LedgerSummary,
        pub next_id: u64,
    }

    pub fn run_inspect(docs: &impl DocumentStore, settings: &Settings) -> Result<Status> {
        let ledger = Ledger::load(docs, &settings.ledger_path)?;
        let mut allocator = load_allocator(settings);
        allocator.observe(ledger.max_numeric_id());
        let report = InspectReport {
            ledger: ledger.summary(),
            next_id: allocator.peek(),
        };
        let s = &report.ledger;
        let message = if s.exists {
            format!(
                "{}: {} open, {} done; {} numeric ids (max t{}), {} slug ids; next id t{}.",
                s.path,
                s.open_tasks,
                s.done_tasks,
                s.numeric_ids.len(),
                s.max_numeric_id,
                s.slug_ids.len(),
                report.next_id,
            )
        } else {
            format!("{}: not created yet; next id t{}.", s.path, report.next_id)
        };
        Status::new(StatusKind::Info, message, report)
    }

}
