//! Source preprocessor: `#include`, `#define` and `#undef`.
//!
//! Runs before lexing and produces a single expanded text. Every output
//! line remembers which file and line it came from, so diagnostics in
//! later stages point at the original source even across includes.
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

use smol_str::SmolStr;

use crate::error::{Pos, PreprocessError};

/// A line is rewritten at most this many times before the expansion is
/// declared non-terminating (mutually recursive macros).
const MACRO_EXPANSION_CAP: usize = 64;

/// Preprocessed translation unit: the expanded text plus per-line
/// provenance for diagnostics.
#[derive(Debug)]
pub struct PreprocessedSource {
    text: String,
    map: Vec<LineOrigin>,
}

#[derive(Debug, Clone)]
struct LineOrigin {
    file: SmolStr,
    line: u32,
}

impl PreprocessedSource {
    /// Wrap plain source text that never went through directives.
    ///
    /// Intended for hosts that already hold the text in memory; the
    /// line map is the identity.
    pub fn from_source(text: impl Into<String>, file: impl AsRef<str>) -> Self {
        let text = text.into();
        let file = SmolStr::new(file.as_ref());
        let line_count = text.lines().count().max(1);
        let map = (1..=line_count)
            .map(|line| LineOrigin {
                file: file.clone(),
                line: line as u32,
            })
            .collect();
        Self { text, map }
    }

    #[inline]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Original (file, line) for a 1-based line of the expanded text.
    pub fn origin(&self, line: u32) -> (SmolStr, u32) {
        match self.map.get(line.saturating_sub(1) as usize) {
            Some(origin) => (origin.file.clone(), origin.line),
            // Position past the last line, e.g. the end-of-source token.
            None => match self.map.last() {
                Some(origin) => (origin.file.clone(), origin.line + 1),
                None => (SmolStr::new(""), line),
            },
        }
    }
}

/// Handles textual inclusion and macro substitution.
pub struct Preprocessor {
    base_dir: PathBuf,
    macros: HashMap<String, String>,
    /// Canonical paths of files currently being expanded, outermost first.
    in_progress: Vec<PathBuf>,
    lines: Vec<String>,
    map: Vec<LineOrigin>,
}

impl Preprocessor {
    pub fn new() -> Self {
        Self {
            base_dir: PathBuf::new(),
            macros: HashMap::new(),
            in_progress: Vec::new(),
            lines: Vec::new(),
            map: Vec::new(),
        }
    }

    /// Main entry point: expand the file at `path` and everything it
    /// includes. The base directory for include resolution is the
    /// directory of `path`.
    pub fn preprocess(
        mut self,
        path: impl AsRef<Path>,
    ) -> Result<PreprocessedSource, PreprocessError> {
        let path = path.as_ref();
        self.base_dir = match path.parent() {
            Some(dir) if dir.as_os_str().is_empty() => PathBuf::from("."),
            Some(dir) => dir.to_path_buf(),
            None => PathBuf::from("."),
        };
        self.process_file(path, None)?;
        Ok(self.finish())
    }

    /// Expand in-memory source text. Includes resolve against the
    /// current working directory.
    pub fn preprocess_str(
        mut self,
        source: &str,
        name: &str,
    ) -> Result<PreprocessedSource, PreprocessError> {
        self.base_dir = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let dir = self.base_dir.clone();
        self.process_content(source, SmolStr::new(name), &dir)?;
        Ok(self.finish())
    }

    fn finish(self) -> PreprocessedSource {
        PreprocessedSource {
            text: self.lines.join("\n"),
            map: self.map,
        }
    }

    fn process_file(
        &mut self,
        path: &Path,
        include_pos: Option<&Pos>,
    ) -> Result<(), PreprocessError> {
        let canonical = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());

        if self.in_progress.contains(&canonical) {
            let mut cycle: Vec<String> = self
                .in_progress
                .iter()
                .map(|p| p.display().to_string())
                .collect();
            cycle.push(canonical.display().to_string());
            return Err(PreprocessError::CircularInclude {
                cycle: cycle.join(" -> "),
                pos: include_pos.cloned().unwrap_or_else(|| Pos {
                    file: SmolStr::new(path.display().to_string()),
                    line: 1,
                    column: 1,
                }),
            });
        }

        let content =
            fs::read_to_string(path).map_err(|cause| PreprocessError::Unreadable {
                path: path.display().to_string(),
                cause,
            })?;

        let label = SmolStr::new(path.display().to_string());
        let dir = canonical
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        self.in_progress.push(canonical);
        let result = self.process_content(&content, label, &dir);
        self.in_progress.pop();
        result
    }

    fn process_content(
        &mut self,
        content: &str,
        file: SmolStr,
        current_dir: &Path,
    ) -> Result<(), PreprocessError> {
        for (index, raw) in content.lines().enumerate() {
            let line_no = index as u32 + 1;
            let pos = Pos {
                file: file.clone(),
                line: line_no,
                column: 1,
            };

            // Directives are only recognized at column zero.
            if let Some(rest) = raw.strip_prefix('#') {
                self.directive(rest, &pos, current_dir)?;
                continue;
            }

            let expanded = self.expand_line(raw, &pos)?;
            self.lines.push(expanded);
            self.map.push(LineOrigin {
                file: file.clone(),
                line: line_no,
            });
        }
        Ok(())
    }

    fn directive(
        &mut self,
        rest: &str,
        pos: &Pos,
        current_dir: &Path,
    ) -> Result<(), PreprocessError> {
        let rest = rest.trim_start();
        if let Some(args) = rest.strip_prefix("include") {
            let name = parse_include(args.trim()).ok_or_else(|| {
                PreprocessError::MalformedDirective {
                    detail: format!("#include expects \"path\" or <path>, got '{}'", args.trim()),
                    pos: pos.clone(),
                }
            })?;
            let resolved = self.resolve_include(&name, current_dir, pos)?;
            self.process_file(&resolved, Some(pos))
        } else if let Some(args) = rest.strip_prefix("define") {
            let (name, body) = parse_define(args, pos)?;
            self.macros.insert(name, body);
            Ok(())
        } else if let Some(args) = rest.strip_prefix("undef") {
            // Undefining an unknown name is silently allowed.
            if let Some(name) = leading_identifier(args.trim()) {
                self.macros.remove(name);
            }
            Ok(())
        } else {
            Err(PreprocessError::MalformedDirective {
                detail: format!("unknown directive '#{}'", rest.split_whitespace().next().unwrap_or("")),
                pos: pos.clone(),
            })
        }
    }

    /// Search order: absolute path as-is, the including file's
    /// directory, the base directory, the current working directory.
    fn resolve_include(
        &self,
        name: &str,
        current_dir: &Path,
        pos: &Pos,
    ) -> Result<PathBuf, PreprocessError> {
        let candidate = Path::new(name);
        if candidate.is_absolute() {
            if candidate.exists() {
                return Ok(candidate.to_path_buf());
            }
        } else {
            let relative = current_dir.join(candidate);
            if relative.exists() {
                return Ok(relative);
            }
            let base = self.base_dir.join(candidate);
            if base.exists() {
                return Ok(base);
            }
            if candidate.exists() {
                return Ok(candidate.to_path_buf());
            }
        }
        Err(PreprocessError::MissingInclude {
            name: name.to_string(),
            pos: pos.clone(),
        })
    }

    /// Replace whole-identifier occurrences of defined macros, repeating
    /// until a pass changes nothing or the iteration cap is hit.
    fn expand_line(&self, line: &str, pos: &Pos) -> Result<String, PreprocessError> {
        if self.macros.is_empty() {
            return Ok(line.to_string());
        }

        let mut current = line.to_string();
        for _ in 0..MACRO_EXPANSION_CAP {
            let next = self.expand_once(&current);
            if next == current {
                return Ok(current);
            }
            current = next;
        }
        Err(PreprocessError::MacroRecursion { pos: pos.clone() })
    }

    fn expand_once(&self, line: &str) -> String {
        let mut out = String::with_capacity(line.len());
        let bytes = line.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            let c = bytes[i] as char;
            if c.is_ascii_alphabetic() || c == '_' {
                let start = i;
                while i < bytes.len() {
                    let c = bytes[i] as char;
                    if c.is_ascii_alphanumeric() || c == '_' {
                        i += 1;
                    } else {
                        break;
                    }
                }
                let ident = &line[start..i];
                match self.macros.get(ident) {
                    Some(body) => out.push_str(body),
                    None => out.push_str(ident),
                }
            } else {
                // Identifiers are ASCII; any other byte passes through.
                let ch_len = line[i..].chars().next().map(char::len_utf8).unwrap_or(1);
                out.push_str(&line[i..i + ch_len]);
                i += ch_len;
            }
        }
        out
    }
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse the argument of `#include`: `"path"` or `<path>`.
fn parse_include(rest: &str) -> Option<String> {
    if rest.len() >= 2 && rest.starts_with('"') && rest.ends_with('"') {
        return Some(rest[1..rest.len() - 1].to_string());
    }
    if rest.len() >= 2 && rest.starts_with('<') && rest.ends_with('>') {
        return Some(rest[1..rest.len() - 1].to_string());
    }
    None
}

/// Parse the argument of `#define`: a macro name, then an optional body
/// after the first whitespace run.
fn parse_define(args: &str, pos: &Pos) -> Result<(String, String), PreprocessError> {
    let rest = args.trim_start();
    if rest.is_empty() {
        return Err(PreprocessError::MalformedDirective {
            detail: "#define is missing a macro name".to_string(),
            pos: pos.clone(),
        });
    }
    let name = leading_identifier(rest).ok_or_else(|| PreprocessError::MalformedDirective {
        detail: format!("invalid macro name in '#define {}'", rest),
        pos: pos.clone(),
    })?;
    let body = rest[name.len()..].trim().to_string();
    Ok((name.to_string(), body))
}

/// Longest identifier prefix (`[A-Za-z_][A-Za-z0-9_]*`), if any.
fn leading_identifier(text: &str) -> Option<&str> {
    let mut chars = text.char_indices();
    match chars.next() {
        Some((_, c)) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return None,
    }
    let end = chars
        .find(|(_, c)| !c.is_ascii_alphanumeric() && *c != '_')
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    Some(&text[..end])
}
